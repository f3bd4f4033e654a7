use crate::domain::error::AdapterError;
use crate::domain::gatt::CharacteristicProperties;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Power/availability state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }

    /// Human readable description, suitable for a status label.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unknown => "adapter state is unknown",
            Self::Resetting => "adapter is resetting",
            Self::Unsupported => "BLE is not supported on this adapter",
            Self::Unauthorized => "not authorized to use BLE",
            Self::PoweredOff => "adapter is powered off",
            Self::PoweredOn => "adapter is powered on",
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Stable identifier of a physical peripheral.
///
/// The only key used by the registries. Display names are never unique and
/// never act as keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Advertisement metadata carried by a discovery event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub tx_power_level: Option<i16>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_data: BTreeMap<String, Vec<u8>>,
    pub services: Vec<String>,
    pub connectable: Option<bool>,
}

/// A discovery event as reported by the adapter, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub advertisement: AdvertisementData,
    pub rssi: Option<i16>,
}

impl DiscoveredPeripheral {
    pub fn new(id: impl Into<PeripheralId>, name: Option<&str>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            advertisement: AdvertisementData::default(),
            rssi,
        }
    }
}

/// Connection status of a known peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Discovered,
    Connecting,
    Connected,
    Disconnected(Option<AdapterError>),
}

/// A named peripheral held by the discovery registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRecord {
    pub id: PeripheralId,
    pub name: String,
    pub advertisement: AdvertisementData,
    pub rssi: Option<i16>,
    pub status: ConnectionStatus,
}

/// A characteristic reported by the adapter, with its raw property bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: String,
    pub properties: u16,
}

impl DiscoveredCharacteristic {
    pub fn new(uuid: impl Into<String>, properties: u16) -> Self {
        Self {
            uuid: uuid.into(),
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub uuid: String,
    /// Owning service UUID
    pub service: String,
    pub properties: CharacteristicProperties,
    /// Last value received from the peripheral, if any
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: String,
    pub peripheral: PeripheralId,
    pub characteristics: BTreeMap<String, CharacteristicRecord>,
}

impl ServiceRecord {
    pub fn new(uuid: impl Into<String>, peripheral: PeripheralId) -> Self {
        Self {
            uuid: uuid.into(),
            peripheral,
            characteristics: BTreeMap::new(),
        }
    }

    /// Identifiers of the characteristics discovered so far.
    pub fn characteristic_ids(&self) -> BTreeSet<String> {
        self.characteristics.keys().cloned().collect()
    }
}

/// Options forwarded to the adapter with a connect command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Give up and report a connect failure after this long
    pub timeout: Option<Duration>,
}

/// Controller-level state derived from the adapter state and activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not activated yet, shut down, or waiting for the first adapter report
    Inactive,
    /// Adapter reported Unknown, Resetting, Unsupported or Unauthorized
    Unready(AdapterState),
    PoweredOff,
    Scanning,
}

/// Per-peripheral link phase while a connection is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    DiscoveringServices,
    DiscoveringCharacteristics { pending: BTreeSet<String> },
}

/// Controller callbacks packaged as values, for channel based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerNotification {
    PeripheralsUpdated(BTreeMap<PeripheralId, PeripheralRecord>),
    Connected(PeripheralId),
    Disconnected {
        peripheral: PeripheralId,
        error: Option<AdapterError>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: ServiceRecord,
    },
    CharacteristicValueUpdated {
        peripheral: PeripheralId,
        characteristic: CharacteristicRecord,
        value: Option<Vec<u8>>,
    },
    Failure {
        peripheral: PeripheralId,
        error: Option<AdapterError>,
    },
}
