//! Consumer callback contract

use crate::domain::discovery::PeripheralSnapshot;
use crate::domain::error::AdapterError;
use crate::domain::models::{
    CharacteristicRecord, ControllerNotification, PeripheralId, ServiceRecord,
};
use tokio::sync::mpsc;

/// Implemented by whatever embeds the controller. Every method is required.
///
/// Callbacks run on the controller's serialized task and receive copies;
/// keep them short and hand heavy work elsewhere.
pub trait ControllerDelegate: Send {
    /// Full, authoritative set of known peripherals. Supersedes any
    /// previous snapshot.
    fn on_peripherals_updated(&mut self, peripherals: PeripheralSnapshot);

    fn on_disconnected(&mut self, peripheral: &PeripheralId, error: Option<&AdapterError>);

    fn on_connected(&mut self, peripheral: &PeripheralId);

    /// Characteristic discovery finished for one service.
    ///
    /// Deciding whether to read or subscribe to the characteristics is up to
    /// the consumer; the controller never reads on its own.
    fn on_characteristics_discovered(&mut self, peripheral: &PeripheralId, service: &ServiceRecord);

    /// `value` is `None` when the update carried no value or could not be
    /// decoded.
    fn on_characteristic_value_updated(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRecord,
        value: Option<&[u8]>,
    );

    fn on_failure(&mut self, peripheral: &PeripheralId, error: Option<&AdapterError>);
}

/// Delegate that forwards every callback into a channel as a
/// [`ControllerNotification`].
pub struct ChannelDelegate {
    sender: mpsc::UnboundedSender<ControllerNotification>,
}

impl ChannelDelegate {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControllerNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, notification: ControllerNotification) {
        // Receiver gone means the consumer stopped listening
        let _ = self.sender.send(notification);
    }
}

impl ControllerDelegate for ChannelDelegate {
    fn on_peripherals_updated(&mut self, peripherals: PeripheralSnapshot) {
        self.send(ControllerNotification::PeripheralsUpdated(peripherals));
    }

    fn on_disconnected(&mut self, peripheral: &PeripheralId, error: Option<&AdapterError>) {
        self.send(ControllerNotification::Disconnected {
            peripheral: peripheral.clone(),
            error: error.cloned(),
        });
    }

    fn on_connected(&mut self, peripheral: &PeripheralId) {
        self.send(ControllerNotification::Connected(peripheral.clone()));
    }

    fn on_characteristics_discovered(&mut self, peripheral: &PeripheralId, service: &ServiceRecord) {
        self.send(ControllerNotification::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service: service.clone(),
        });
    }

    fn on_characteristic_value_updated(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRecord,
        value: Option<&[u8]>,
    ) {
        self.send(ControllerNotification::CharacteristicValueUpdated {
            peripheral: peripheral.clone(),
            characteristic: characteristic.clone(),
            value: value.map(<[u8]>::to_vec),
        });
    }

    fn on_failure(&mut self, peripheral: &PeripheralId, error: Option<&AdapterError>) {
        self.send(ControllerNotification::Failure {
            peripheral: peripheral.clone(),
            error: error.cloned(),
        });
    }
}
