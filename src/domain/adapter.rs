//! Adapter capability
//!
//! The narrow interface the controller drives the radio through. Commands
//! are fire-and-forget: an `Err` only means the adapter refused the command
//! on the spot; every real outcome arrives later as an [`AdapterEvent`]
//! pushed into the [`EventSink`] handed over at activation.

use crate::domain::error::AdapterError;
use crate::domain::models::{
    AdapterState, ConnectOptions, DiscoveredCharacteristic, DiscoveredPeripheral, PeripheralId,
};
use tokio::sync::mpsc;

/// Events raised by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    PeripheralDiscovered(DiscoveredPeripheral),
    Connected {
        peripheral: PeripheralId,
    },
    ConnectFailed {
        peripheral: PeripheralId,
        error: Option<AdapterError>,
    },
    Disconnected {
        peripheral: PeripheralId,
        error: Option<AdapterError>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<String>,
        error: Option<AdapterError>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: String,
        characteristics: Vec<DiscoveredCharacteristic>,
        error: Option<AdapterError>,
    },
    ValueUpdated {
        peripheral: PeripheralId,
        service: String,
        characteristic: String,
        value: Option<Vec<u8>>,
        error: Option<AdapterError>,
    },
}

/// Everything the controller's serialized loop reacts to besides commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Adapter(AdapterEvent),
    RescanTick,
}

/// Delivers adapter events onto the controller's serialized queue.
///
/// Cloneable and `Send`, so adapters may emit from any thread or task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns false once the controller is gone.
    pub fn emit(&self, event: AdapterEvent) -> bool {
        self.tx.send(ControllerEvent::Adapter(event)).is_ok()
    }
}

/// The radio/transport stack as seen by the controller.
pub trait Adapter: Send + 'static {
    /// Begin delivering events. Called once, at activation.
    fn start(&mut self, events: EventSink) -> Result<(), AdapterError>;

    fn start_scan(&mut self) -> Result<(), AdapterError>;

    fn stop_scan(&mut self) -> Result<(), AdapterError>;

    fn connect(
        &mut self,
        peripheral: &PeripheralId,
        options: &ConnectOptions,
    ) -> Result<(), AdapterError>;

    fn cancel_connection(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError>;

    fn discover_services(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError>;

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
    ) -> Result<(), AdapterError>;

    fn read_value(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
        characteristic: &str,
    ) -> Result<(), AdapterError>;

    /// Stop event delivery and drop platform resources. The adapter is not
    /// reused afterwards.
    fn release(&mut self);
}
