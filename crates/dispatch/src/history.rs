// SPDX-License-Identifier: BUSL-1.1

//! Per-serial print history (§3 "History entry") — a bounded ring buffer so
//! a busy printer's history never grows unbounded memory, unlike the
//! prepend-and-truncate pattern this is ported from.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use crate::model::{epoch_ms, EpochMs};

const RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryEntry {
    pub timestamp: EpochMs,
    pub tenant: String,
    pub stage: &'static str,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

pub struct HistoryLog {
    by_serial: RwLock<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self { by_serial: RwLock::new(HashMap::new()) }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        serial: &str,
        tenant: &str,
        stage: &'static str,
        token: &str,
        customer: Option<String>,
        order: Option<String>,
    ) {
        let entry = HistoryEntry {
            timestamp: epoch_ms(),
            tenant: tenant.to_owned(),
            stage,
            token: token.to_owned(),
            customer,
            order,
        };
        let mut by_serial = self.by_serial.write().await;
        let ring = by_serial.entry(serial.to_owned()).or_default();
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Oldest-first window of recorded events for one serial.
    pub async fn for_serial(&self, serial: &str) -> Vec<HistoryEntry> {
        self.by_serial.read().await.get(serial).map(|r| r.iter().cloned().collect()).unwrap_or_default()
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}
