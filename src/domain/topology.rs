//! Topology Registry
//!
//! Peripheral → service → characteristic tree built from the adapter's GATT
//! discovery passes.
//!
//! Every write replaces a whole value: a service-discovery pass swaps in a
//! freshly built service map for the peripheral, and a characteristic pass
//! swaps in a freshly built service record. Readers never observe a map that
//! is half way through being rebuilt.

use crate::domain::error::TopologyError;
use crate::domain::gatt::CharacteristicProperties;
use crate::domain::models::{
    CharacteristicRecord, DiscoveredCharacteristic, PeripheralId, ServiceRecord,
};
use std::collections::{BTreeMap, HashMap};

/// Services of one peripheral keyed by service UUID.
pub type ServiceMap = BTreeMap<String, ServiceRecord>;

#[derive(Debug, Default)]
pub struct TopologyRegistry {
    peripherals: HashMap<PeripheralId, ServiceMap>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `peripheral` with the services of the
    /// latest discovery pass.
    ///
    /// Returns the service UUIDs now registered, without duplicates.
    pub fn replace_services<I>(&mut self, peripheral: &PeripheralId, services: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let map: ServiceMap = services
            .into_iter()
            .map(|uuid| {
                let record = ServiceRecord::new(uuid.clone(), peripheral.clone());
                (uuid, record)
            })
            .collect();

        let uuids = map.keys().cloned().collect();
        self.peripherals.insert(peripheral.clone(), map);
        uuids
    }

    /// Record the characteristics of one service, replacing any from an
    /// earlier pass. The service must belong to the current topology.
    pub fn insert_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
        characteristics: Vec<DiscoveredCharacteristic>,
    ) -> Result<ServiceRecord, TopologyError> {
        let services = self
            .peripherals
            .get_mut(peripheral)
            .ok_or_else(|| TopologyError::UnknownPeripheral(peripheral.clone()))?;
        let existing = services
            .get(service)
            .ok_or_else(|| TopologyError::UnknownService {
                peripheral: peripheral.clone(),
                service: service.to_string(),
            })?;

        let mut rebuilt = ServiceRecord::new(existing.uuid.clone(), peripheral.clone());
        for characteristic in characteristics {
            let record = CharacteristicRecord {
                uuid: characteristic.uuid.clone(),
                service: rebuilt.uuid.clone(),
                properties: CharacteristicProperties::from_bits(characteristic.properties),
                value: None,
            };
            rebuilt.characteristics.insert(characteristic.uuid, record);
        }

        services.insert(service.to_string(), rebuilt.clone());
        Ok(rebuilt)
    }

    /// Store a value received for a characteristic.
    ///
    /// An absent value leaves the last known value in place.
    pub fn update_value(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
        characteristic: &str,
        value: Option<Vec<u8>>,
    ) -> Result<CharacteristicRecord, TopologyError> {
        let record = self
            .peripherals
            .get_mut(peripheral)
            .and_then(|services| services.get_mut(service))
            .and_then(|s| s.characteristics.get_mut(characteristic))
            .ok_or_else(|| TopologyError::UnknownCharacteristic {
                peripheral: peripheral.clone(),
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            })?;

        if let Some(value) = value {
            record.value = Some(value);
        }
        Ok(record.clone())
    }

    pub fn services(&self, peripheral: &PeripheralId) -> Option<ServiceMap> {
        self.peripherals.get(peripheral).cloned()
    }

    pub fn service(&self, peripheral: &PeripheralId, service: &str) -> Option<&ServiceRecord> {
        self.peripherals.get(peripheral)?.get(service)
    }

    pub fn characteristic(
        &self,
        peripheral: &PeripheralId,
        service: &str,
        characteristic: &str,
    ) -> Option<&CharacteristicRecord> {
        self.service(peripheral, service)?
            .characteristics
            .get(characteristic)
    }

    pub fn remove(&mut self, peripheral: &PeripheralId) -> Option<ServiceMap> {
        self.peripherals.remove(peripheral)
    }

    pub fn clear(&mut self) {
        self.peripherals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gatt::property_bits;

    fn p1() -> PeripheralId {
        PeripheralId::from("p1")
    }

    #[test]
    fn test_rediscovery_replaces_services() {
        let mut topology = TopologyRegistry::new();
        topology.replace_services(&p1(), vec!["A".to_string(), "B".to_string()]);
        topology.replace_services(&p1(), vec!["C".to_string()]);

        let services = topology.services(&p1()).unwrap();
        assert_eq!(services.keys().collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn test_peripherals_are_independent() {
        let mut topology = TopologyRegistry::new();
        let p2 = PeripheralId::from("p2");
        topology.replace_services(&p1(), vec!["A".to_string()]);
        topology.replace_services(&p2, vec!["B".to_string()]);
        topology.replace_services(&p1(), vec!["C".to_string()]);

        assert!(topology.service(&p2, "B").is_some());
        assert!(topology.service(&p1(), "A").is_none());
    }

    #[test]
    fn test_characteristics_require_service() {
        let mut topology = TopologyRegistry::new();
        let chars = vec![DiscoveredCharacteristic::new("2A00", property_bits::READ)];

        let err = topology
            .insert_characteristics(&p1(), "1800", chars.clone())
            .unwrap_err();
        assert_eq!(err, TopologyError::UnknownPeripheral(p1()));

        topology.replace_services(&p1(), vec!["180F".to_string()]);
        let err = topology
            .insert_characteristics(&p1(), "1800", chars.clone())
            .unwrap_err();
        assert!(matches!(err, TopologyError::UnknownService { .. }));

        topology.replace_services(&p1(), vec!["1800".to_string()]);
        let service = topology.insert_characteristics(&p1(), "1800", chars).unwrap();
        assert_eq!(service.characteristic_ids().len(), 1);
        assert!(service.characteristics["2A00"].properties.read);
        assert_eq!(service.characteristics["2A00"].service, "1800");
    }

    #[test]
    fn test_stale_characteristics_dropped_after_rediscovery() {
        let mut topology = TopologyRegistry::new();
        topology.replace_services(&p1(), vec!["A".to_string()]);
        topology
            .insert_characteristics(&p1(), "A", vec![DiscoveredCharacteristic::new("x", 0)])
            .unwrap();
        topology.replace_services(&p1(), vec!["B".to_string()]);

        assert!(topology
            .insert_characteristics(&p1(), "A", vec![DiscoveredCharacteristic::new("x", 0)])
            .is_err());
        assert!(topology.characteristic(&p1(), "A", "x").is_none());
    }

    #[test]
    fn test_value_updates() {
        let mut topology = TopologyRegistry::new();
        topology.replace_services(&p1(), vec!["180F".to_string()]);
        topology
            .insert_characteristics(
                &p1(),
                "180F",
                vec![DiscoveredCharacteristic::new("2A19", property_bits::READ)],
            )
            .unwrap();

        let record = topology
            .update_value(&p1(), "180F", "2A19", Some(vec![87]))
            .unwrap();
        assert_eq!(record.value, Some(vec![87]));

        let record = topology.update_value(&p1(), "180F", "2A19", None).unwrap();
        assert_eq!(record.value, Some(vec![87]));

        assert!(topology.update_value(&p1(), "180F", "2A1A", None).is_err());
    }
}
