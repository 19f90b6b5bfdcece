// SPDX-License-Identifier: BUSL-1.1

//! Audit Sink (§4.I) — best-effort fan-out of lifecycle events. Modeled on
//! the aggregator hub pattern: a `broadcast` channel so a slow or absent
//! subscriber never blocks dispatch. `broadcast`'s lagged-receiver handling
//! drops old events for that subscriber rather than applying backpressure to
//! the sender, which is exactly the "drop events rather than block" contract
//! §4.I asks for.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{epoch_ms, EpochMs};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum AuditEvent {
    Received { serial: Option<String>, tenant: String, token: String, timestamp: EpochMs },
    Offered { serial: String, tenant: String, token: String, timestamp: EpochMs },
    Sent { serial: String, tenant: String, token: String, timestamp: EpochMs },
    Completed { serial: String, tenant: String, token: String, timestamp: EpochMs },
    Requeued { tenant: String, token: String, reason: &'static str, timestamp: EpochMs },
    Failed { tenant: String, token: String, timestamp: EpochMs },
}

/// Handle shared by every component that emits lifecycle events.
#[derive(Clone)]
pub struct AuditSink {
    tx: broadcast::Sender<AuditEvent>,
}

impl AuditSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never fails, never blocks — if there are no
    /// subscribers this is a cheap no-op.
    pub fn emit(&self, event: AuditEvent) {
        let _ = self.tx.send(event);
    }

    pub fn now() -> EpochMs {
        epoch_ms()
    }
}

impl Default for AuditSink {
    fn default() -> Self {
        Self::new()
    }
}
