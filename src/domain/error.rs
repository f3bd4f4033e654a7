use crate::domain::models::{AdapterState, PeripheralId};
use thiserror::Error;

/// Failures reported by the adapter, either when a command is rejected
/// outright or later alongside an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Adapter unavailable: {0}")]
    Unavailable(String),

    #[error("Adapter is powered off")]
    PoweredOff,

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),

    #[error("Connection error: {0}")]
    ConnectionFailed(String),

    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Adapter has been released")]
    Released,
}

/// Rejections on the controller command surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Controller is not active")]
    NotActive,

    #[error("Controller has been shut down; activate a new one")]
    Released,

    #[error("Invalid argument: unknown peripheral {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("Invalid argument: unknown characteristic {characteristic} in service {service} of {peripheral}")]
    UnknownCharacteristic {
        peripheral: PeripheralId,
        service: String,
        characteristic: String,
    },

    #[error("Adapter unavailable ({0})")]
    AdapterUnavailable(AdapterState),

    #[error("Peripheral {0} is already connecting or connected")]
    AlreadyConnected(PeripheralId),

    #[error("Peripheral {0} is not connected")]
    NotConnected(PeripheralId),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("No async runtime available to schedule the controller")]
    NoRuntime,

    #[error("Controller task has stopped")]
    Closed,
}

impl ControllerError {
    /// True for errors caused by an argument the caller supplied.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::UnknownPeripheral(_) | Self::UnknownCharacteristic { .. }
        )
    }
}

/// Lookup failures inside the topology registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("No services recorded for {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("Service {service} is not part of the current topology of {peripheral}")]
    UnknownService {
        peripheral: PeripheralId,
        service: String,
    },

    #[error("Characteristic {characteristic} is not part of service {service} of {peripheral}")]
    UnknownCharacteristic {
        peripheral: PeripheralId,
        service: String,
        characteristic: String,
    },
}
