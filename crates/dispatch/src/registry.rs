// SPDX-License-Identifier: BUSL-1.1

//! Device Registry (§4.A) — resolves a physical printer serial to the
//! ordered set of tenants it prints for.

use indexmap::IndexMap;

use tokio::sync::RwLock;

/// One `(tenant, serial)` pair as emitted by the remote config source.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct RegistryEntry {
    pub tenant: String,
    pub serial: String,
}

/// Device ↔ tenant mapping, with the tenant order per serial preserved as the
/// insertion order from the config source (stable for deterministic tests).
/// Serials themselves are also kept in insertion order, via `IndexMap`, so the
/// query surface's "all configured printers" listing is deterministic rather
/// than depending on hash iteration order.
pub struct DeviceRegistry {
    // serial -> tenants, in config-source order. A serial absent from this
    // map has no tenants and polls from it always miss.
    by_serial: RwLock<IndexMap<String, Vec<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { by_serial: RwLock::new(IndexMap::new()) }
    }

    pub fn from_entries(entries: &[RegistryEntry]) -> Self {
        let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
        for entry in entries {
            map.entry(entry.serial.clone()).or_default().push(entry.tenant.clone());
        }
        Self { by_serial: RwLock::new(map) }
    }

    /// Tenants bound to `serial`, in stable order. Empty if the serial is unknown.
    pub async fn tenants_for(&self, serial: &str) -> Vec<String> {
        self.by_serial.read().await.get(serial).cloned().unwrap_or_default()
    }

    pub async fn is_known(&self, serial: &str) -> bool {
        self.by_serial.read().await.contains_key(serial)
    }

    /// All configured serials, each with its tenant list.
    pub async fn all_serials(&self) -> Vec<(String, Vec<String>)> {
        self.by_serial.read().await.iter().map(|(s, t)| (s.clone(), t.clone())).collect()
    }

    /// Atomically swap the full mapping.
    ///
    /// Returns the set of serials whose tenant list changed (added, removed,
    /// or reordered) — used by the job store to know which round-robin
    /// cursors must be reset (§4.A: unchanged lists keep their cursor, any
    /// other change resets to 0).
    pub async fn replace_all(&self, entries: &[RegistryEntry]) -> Vec<String> {
        let mut next: IndexMap<String, Vec<String>> = IndexMap::new();
        for entry in entries {
            next.entry(entry.serial.clone()).or_default().push(entry.tenant.clone());
        }

        let mut current = self.by_serial.write().await;
        let mut changed = Vec::new();
        for serial in current.keys().chain(next.keys()).cloned().collect::<std::collections::HashSet<_>>() {
            if current.get(&serial) != next.get(&serial) {
                changed.push(serial);
            }
        }
        *current = next;
        changed
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> Vec<RegistryEntry> {
        pairs
            .iter()
            .map(|(tenant, serial)| RegistryEntry { tenant: (*tenant).into(), serial: (*serial).into() })
            .collect()
    }

    #[tokio::test]
    async fn unknown_serial_has_no_tenants() {
        let registry = DeviceRegistry::new();
        assert!(registry.tenants_for("ghost").await.is_empty());
        assert!(!registry.is_known("ghost").await);
    }

    #[tokio::test]
    async fn preserves_insertion_order_per_serial() {
        let registry = DeviceRegistry::from_entries(&entries(&[("tA", "S1"), ("tB", "S1"), ("tC", "S1")]));
        assert_eq!(registry.tenants_for("S1").await, vec!["tA", "tB", "tC"]);
    }

    #[tokio::test]
    async fn replace_all_reports_only_changed_serials() {
        let registry = DeviceRegistry::from_entries(&entries(&[("tA", "S1"), ("tB", "S2")]));

        // Same mapping twice: nothing changed.
        let changed = registry.replace_all(&entries(&[("tA", "S1"), ("tB", "S2")])).await;
        assert!(changed.is_empty());

        // S2's tenant list changes; S1's doesn't.
        let changed = registry.replace_all(&entries(&[("tA", "S1"), ("tC", "S2")])).await;
        assert_eq!(changed, vec!["S2".to_string()]);
        assert_eq!(registry.tenants_for("S1").await, vec!["tA"]);
        assert_eq!(registry.tenants_for("S2").await, vec!["tC"]);
    }

    #[tokio::test]
    async fn replace_all_drops_vanished_serials() {
        let registry = DeviceRegistry::from_entries(&entries(&[("tA", "S1")]));
        registry.replace_all(&entries(&[("tB", "S2")])).await;
        assert!(registry.tenants_for("S1").await.is_empty());
        assert_eq!(registry.tenants_for("S2").await, vec!["tB"]);
    }
}
