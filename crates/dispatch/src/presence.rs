// SPDX-License-Identifier: BUSL-1.1

//! Presence Tracker (§4.C) — last-contact bookkeeping per printer serial.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::model::{epoch_ms, EpochMs};

/// A serial is considered online within this many milliseconds of its last
/// poll — three times the expected 5s poll period, to tolerate one missed
/// poll without flapping.
pub const ONLINE_WINDOW_MS: u64 = 15_000;

#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub last_seen: EpochMs,
    pub last_address: String,
}

/// Read-only snapshot of a serial's presence, for the query surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PresenceSnapshot {
    pub serial: String,
    pub last_seen: Option<EpochMs>,
    pub age_ms: Option<u64>,
    pub address: Option<String>,
    pub online: bool,
}

pub struct PresenceTracker {
    records: RwLock<HashMap<String, PresenceRecord>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    pub async fn mark_seen(&self, serial: &str, address: &str) {
        let now = epoch_ms();
        let mut records = self.records.write().await;
        records.insert(serial.to_owned(), PresenceRecord { last_seen: now, last_address: address.to_owned() });
    }

    fn snapshot_of(serial: &str, record: Option<&PresenceRecord>, now: EpochMs) -> PresenceSnapshot {
        match record {
            Some(r) => {
                let age_ms = now.saturating_sub(r.last_seen);
                PresenceSnapshot {
                    serial: serial.to_owned(),
                    last_seen: Some(r.last_seen),
                    age_ms: Some(age_ms),
                    address: Some(r.last_address.clone()),
                    online: age_ms <= ONLINE_WINDOW_MS,
                }
            }
            None => PresenceSnapshot {
                serial: serial.to_owned(),
                last_seen: None,
                age_ms: None,
                address: None,
                online: false,
            },
        }
    }

    /// Online serials only, most-recently-seen first.
    pub async fn online_snapshot(&self) -> Vec<PresenceSnapshot> {
        let now = epoch_ms();
        let records = self.records.read().await;
        let mut online: Vec<PresenceSnapshot> = records
            .iter()
            .map(|(serial, record)| Self::snapshot_of(serial, Some(record), now))
            .filter(|snap| snap.online)
            .collect();
        online.sort_by_key(|s| s.last_seen);
        online.reverse();
        online
    }

    /// Every serial named in `configured`, including those never seen.
    pub async fn all_configured_snapshot(&self, configured: &[String]) -> Vec<PresenceSnapshot> {
        let now = epoch_ms();
        let records = self.records.read().await;
        configured.iter().map(|serial| Self::snapshot_of(serial, records.get(serial), now)).collect()
    }

    /// Raw dump of every presence record ever recorded, including serials
    /// no longer configured (§4.G raw presence dump).
    pub async fn raw_dump(&self) -> Vec<PresenceSnapshot> {
        let now = epoch_ms();
        let records = self.records.read().await;
        records.keys().map(|serial| Self::snapshot_of(serial, records.get(serial), now)).collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unseen_serial_is_offline() {
        let tracker = PresenceTracker::new();
        let snaps = tracker.all_configured_snapshot(&["S1".to_string()]).await;
        assert_eq!(snaps.len(), 1);
        assert!(!snaps[0].online);
        assert!(snaps[0].last_seen.is_none());
    }

    #[tokio::test]
    async fn seen_serial_is_online_immediately() {
        let tracker = PresenceTracker::new();
        tracker.mark_seen("S1", "10.0.0.1").await;
        let online = tracker.online_snapshot().await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].serial, "S1");
        assert_eq!(online[0].address.as_deref(), Some("10.0.0.1"));
    }
}
