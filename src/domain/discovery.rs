//! Discovery Registry
//!
//! Named peripherals seen by the adapter, keyed by [`PeripheralId`].

use crate::domain::models::{
    ConnectionStatus, DiscoveredPeripheral, PeripheralId, PeripheralRecord,
};
use std::collections::BTreeMap;

/// Full copy of the registry handed to consumers, ordered by identity.
pub type PeripheralSnapshot = BTreeMap<PeripheralId, PeripheralRecord>;

/// Outcome of feeding a discovery event into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    /// Advertiser had no display name and was not recorded
    Filtered,
}

#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    peripherals: BTreeMap<PeripheralId, PeripheralRecord>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly named peripheral or refresh an existing one in place.
    ///
    /// Refreshing keeps the connection status; anonymous advertisers are
    /// dropped without touching the registry.
    pub fn upsert(&mut self, discovered: DiscoveredPeripheral) -> Upsert {
        let name = match discovered.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => name,
            None => return Upsert::Filtered,
        };

        if let Some(record) = self.peripherals.get_mut(&discovered.id) {
            record.name = name;
            record.advertisement = discovered.advertisement;
            record.rssi = discovered.rssi;
            return Upsert::Updated;
        }

        self.peripherals.insert(
            discovered.id.clone(),
            PeripheralRecord {
                id: discovered.id,
                name,
                advertisement: discovered.advertisement,
                rssi: discovered.rssi,
                status: ConnectionStatus::Discovered,
            },
        );
        Upsert::Inserted
    }

    /// Update the connection status of a known peripheral.
    /// Returns false if the identity is not registered.
    pub fn set_status(&mut self, id: &PeripheralId, status: ConnectionStatus) -> bool {
        match self.peripherals.get_mut(id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.peripherals.contains_key(id)
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&PeripheralRecord> {
        self.peripherals.get(id)
    }

    pub fn ids(&self) -> Vec<PeripheralId> {
        self.peripherals.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> PeripheralSnapshot {
        self.peripherals.clone()
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    pub fn clear(&mut self) {
        self.peripherals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_advertisements_keep_one_entry() {
        let mut registry = DiscoveryRegistry::new();
        for rssi in [-70, -60, -50] {
            registry.upsert(DiscoveredPeripheral::new("AA:identity1", Some("Sensor1"), Some(rssi)));
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&PeripheralId::from("AA:identity1")].rssi, Some(-50));
    }

    #[test]
    fn test_unnamed_advertisers_filtered() {
        let mut registry = DiscoveryRegistry::new();
        assert_eq!(
            registry.upsert(DiscoveredPeripheral::new("anon", None, Some(-40))),
            Upsert::Filtered
        );
        assert_eq!(
            registry.upsert(DiscoveredPeripheral::new("blank", Some("  "), Some(-40))),
            Upsert::Filtered
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_preserves_status() {
        let mut registry = DiscoveryRegistry::new();
        let id = PeripheralId::from("p1");
        assert_eq!(
            registry.upsert(DiscoveredPeripheral::new("p1", Some("Thermo"), None)),
            Upsert::Inserted
        );
        assert!(registry.set_status(&id, ConnectionStatus::Connected));
        assert_eq!(
            registry.upsert(DiscoveredPeripheral::new("p1", Some("Thermo v2"), Some(-30))),
            Upsert::Updated
        );

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, ConnectionStatus::Connected);
        assert_eq!(record.name, "Thermo v2");
    }

    #[test]
    fn test_snapshot_sorted_by_identity() {
        let mut registry = DiscoveryRegistry::new();
        registry.upsert(DiscoveredPeripheral::new("c", Some("Same"), None));
        registry.upsert(DiscoveredPeripheral::new("a", Some("Same"), None));
        registry.upsert(DiscoveredPeripheral::new("b", Some("Same"), None));

        let ids: Vec<PeripheralId> = registry.snapshot().into_keys().collect();
        let expected: Vec<PeripheralId> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(ids, expected);
        assert!(!registry.set_status(&"zzz".into(), ConnectionStatus::Connecting));
    }
}
