//! Simulated Adapter
//!
//! In-memory stand-in for a BLE radio. Every command the controller issues is
//! recorded in order. The paired [`SimulatedRadio`] handle lets a test or a
//! demo inject adapter events and inspect the command log.
//!
//! Built with [`SimulatedAdapter::with_peripherals`], the adapter also answers
//! commands from a scripted GATT model, so whole connect → discover → read
//! flows can run without hardware.

use crate::domain::adapter::{Adapter, AdapterEvent, EventSink};
use crate::domain::error::AdapterError;
use crate::domain::gatt::property_bits;
use crate::domain::models::{
    AdapterState, ConnectOptions, DiscoveredCharacteristic, DiscoveredPeripheral, PeripheralId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// A command as received by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCommand {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics(PeripheralId, String),
    ReadValue(PeripheralId, String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCharacteristic {
    pub uuid: String,
    pub properties: u16,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedService {
    pub uuid: String,
    pub characteristics: Vec<SimulatedCharacteristic>,
}

impl SimulatedService {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            characteristics: Vec::new(),
        }
    }

    pub fn characteristic(
        mut self,
        uuid: impl Into<String>,
        properties: u16,
        value: Option<Vec<u8>>,
    ) -> Self {
        self.characteristics.push(SimulatedCharacteristic {
            uuid: uuid.into(),
            properties,
            value,
        });
        self
    }
}

/// Scripted peripheral used by the auto-responding mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<SimulatedService>,
    /// Refuse connections with a connect failure
    pub unreachable: bool,
}

impl SimulatedPeripheral {
    pub fn new(id: impl Into<PeripheralId>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi: Some(-60),
            services: Vec::new(),
            unreachable: false,
        }
    }

    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn service(mut self, service: SimulatedService) -> Self {
        self.services.push(service);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    fn advertisement(&self) -> DiscoveredPeripheral {
        DiscoveredPeripheral::new(self.id.clone(), self.name.as_deref(), self.rssi)
    }

    fn find_service(&self, uuid: &str) -> Option<&SimulatedService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }
}

#[derive(Default)]
struct RadioState {
    commands: Vec<AdapterCommand>,
    sink: Option<EventSink>,
    started: bool,
    released: bool,
    scanning: bool,
    /// Scripted model; `None` means commands are only recorded
    model: Option<BTreeMap<PeripheralId, SimulatedPeripheral>>,
    connected: BTreeSet<PeripheralId>,
    /// Confirm cancelled links from a separate task after this delay
    cancel_delay: Option<Duration>,
}

impl RadioState {
    fn emit(&self, event: AdapterEvent) -> bool {
        match &self.sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }
}

fn lock(state: &Mutex<RadioState>) -> MutexGuard<'_, RadioState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The adapter half, handed to the controller.
pub struct SimulatedAdapter {
    state: Arc<Mutex<RadioState>>,
}

/// The test half: inject events and inspect what the controller asked for.
#[derive(Clone)]
pub struct SimulatedRadio {
    state: Arc<Mutex<RadioState>>,
}

impl SimulatedAdapter {
    /// Recording-only adapter. Nothing happens unless the radio handle
    /// emits it.
    pub fn new() -> (Self, SimulatedRadio) {
        Self::build(RadioState::default())
    }

    /// Auto-responding adapter over a scripted set of peripherals. Reports
    /// `PoweredOn` as soon as it is started.
    pub fn with_peripherals(
        peripherals: impl IntoIterator<Item = SimulatedPeripheral>,
    ) -> (Self, SimulatedRadio) {
        let model = peripherals
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self::build(RadioState {
            model: Some(model),
            ..RadioState::default()
        })
    }

    fn build(state: RadioState) -> (Self, SimulatedRadio) {
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: state.clone(),
            },
            SimulatedRadio { state },
        )
    }

    /// Record a command and hand back the guard for the scripted response.
    fn record(&self, command: AdapterCommand) -> Result<MutexGuard<'_, RadioState>, AdapterError> {
        let mut state = lock(&self.state);
        if state.released {
            return Err(AdapterError::Released);
        }
        debug!("Simulated adapter received {:?}", command);
        state.commands.push(command);
        Ok(state)
    }
}

impl Adapter for SimulatedAdapter {
    fn start(&mut self, events: EventSink) -> Result<(), AdapterError> {
        let mut state = lock(&self.state);
        if state.released {
            return Err(AdapterError::Released);
        }
        state.sink = Some(events);
        state.started = true;
        if state.model.is_some() {
            state.emit(AdapterEvent::StateChanged(AdapterState::PoweredOn));
        }
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), AdapterError> {
        let mut state = self.record(AdapterCommand::StartScan)?;
        state.scanning = true;
        if let Some(model) = &state.model {
            for peripheral in model.values() {
                state.emit(AdapterEvent::PeripheralDiscovered(peripheral.advertisement()));
            }
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), AdapterError> {
        let mut state = self.record(AdapterCommand::StopScan)?;
        state.scanning = false;
        Ok(())
    }

    fn connect(
        &mut self,
        peripheral: &PeripheralId,
        _options: &ConnectOptions,
    ) -> Result<(), AdapterError> {
        let mut state = self.record(AdapterCommand::Connect(peripheral.clone()))?;
        let Some(model) = &state.model else {
            return Ok(());
        };

        let event = match model.get(peripheral) {
            Some(p) if !p.unreachable => AdapterEvent::Connected {
                peripheral: peripheral.clone(),
            },
            Some(_) => AdapterEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                error: Some(AdapterError::ConnectionFailed(
                    "peripheral did not respond".to_string(),
                )),
            },
            None => {
                return Err(AdapterError::UnknownPeripheral(peripheral.to_string()));
            }
        };
        if matches!(event, AdapterEvent::Connected { .. }) {
            state.connected.insert(peripheral.clone());
        }
        state.emit(event);
        Ok(())
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        let mut state = self.record(AdapterCommand::CancelConnection(peripheral.clone()))?;
        if !state.connected.remove(peripheral) {
            return Ok(());
        }

        let event = AdapterEvent::Disconnected {
            peripheral: peripheral.clone(),
            error: None,
        };
        match (state.cancel_delay, state.sink.clone()) {
            // The sink outlives release, like a platform callback would
            (Some(delay), Some(sink)) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !sink.emit(event) {
                        debug!("Late disconnect confirmation dropped");
                    }
                });
            }
            _ => {
                state.emit(event);
            }
        }
        Ok(())
    }

    fn discover_services(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        let state = self.record(AdapterCommand::DiscoverServices(peripheral.clone()))?;
        let Some(model) = &state.model else {
            return Ok(());
        };

        let services = model
            .get(peripheral)
            .map(|p| p.services.iter().map(|s| s.uuid.clone()).collect())
            .unwrap_or_default();
        state.emit(AdapterEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            services,
            error: None,
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
    ) -> Result<(), AdapterError> {
        let state = self.record(AdapterCommand::DiscoverCharacteristics(
            peripheral.clone(),
            service.to_string(),
        ))?;
        let Some(model) = &state.model else {
            return Ok(());
        };

        let event = match model.get(peripheral).and_then(|p| p.find_service(service)) {
            Some(s) => AdapterEvent::CharacteristicsDiscovered {
                peripheral: peripheral.clone(),
                service: service.to_string(),
                characteristics: s
                    .characteristics
                    .iter()
                    .map(|c| DiscoveredCharacteristic::new(c.uuid.clone(), c.properties))
                    .collect(),
                error: None,
            },
            None => AdapterEvent::CharacteristicsDiscovered {
                peripheral: peripheral.clone(),
                service: service.to_string(),
                characteristics: Vec::new(),
                error: Some(AdapterError::Gatt(format!("no service {}", service))),
            },
        };
        state.emit(event);
        Ok(())
    }

    fn read_value(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
        characteristic: &str,
    ) -> Result<(), AdapterError> {
        let state = self.record(AdapterCommand::ReadValue(
            peripheral.clone(),
            service.to_string(),
            characteristic.to_string(),
        ))?;
        let Some(model) = &state.model else {
            return Ok(());
        };

        let found = model
            .get(peripheral)
            .and_then(|p| p.find_service(service))
            .and_then(|s| s.characteristics.iter().find(|c| c.uuid == characteristic));
        let (value, error) = match found {
            Some(c) if c.properties & property_bits::READ != 0 => (c.value.clone(), None),
            Some(_) => (None, Some(AdapterError::Gatt("read not permitted".to_string()))),
            None => (
                None,
                Some(AdapterError::Gatt(format!("no characteristic {}", characteristic))),
            ),
        };
        state.emit(AdapterEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
            value,
            error,
        });
        Ok(())
    }

    fn release(&mut self) {
        let mut state = lock(&self.state);
        state.released = true;
        state.scanning = false;
        state.sink = None;
        debug!("Simulated adapter released");
    }
}

impl SimulatedRadio {
    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<AdapterCommand> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }

    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }

    /// Push an event as if the radio raised it. Returns false when the
    /// adapter has not been started or the controller is gone.
    pub fn emit(&self, event: AdapterEvent) -> bool {
        lock(&self.state).emit(event)
    }

    pub fn set_state(&self, adapter_state: AdapterState) -> bool {
        self.emit(AdapterEvent::StateChanged(adapter_state))
    }

    pub fn power_on(&self) -> bool {
        self.set_state(AdapterState::PoweredOn)
    }

    /// Power loss: the state change followed by a disconnect for every live
    /// link, the way platform stacks report it.
    pub fn power_off(&self) -> bool {
        let mut state = lock(&self.state);
        let delivered = state.emit(AdapterEvent::StateChanged(AdapterState::PoweredOff));
        let connected = std::mem::take(&mut state.connected);
        for peripheral in connected {
            state.emit(AdapterEvent::Disconnected {
                peripheral,
                error: Some(AdapterError::PoweredOff),
            });
        }
        delivered
    }

    pub fn advertise(&self, id: impl Into<PeripheralId>, name: Option<&str>, rssi: i16) -> bool {
        self.emit(AdapterEvent::PeripheralDiscovered(DiscoveredPeripheral::new(
            id,
            name,
            Some(rssi),
        )))
    }

    /// Confirm cancelled connections asynchronously, `delay` after the
    /// cancel. Needs a tokio runtime when the cancel is issued.
    pub fn confirm_cancels_after(&self, delay: Duration) {
        lock(&self.state).cancel_delay = Some(delay);
    }

    /// Peer-initiated disconnect.
    pub fn drop_link(&self, peripheral: &PeripheralId, error: Option<AdapterError>) -> bool {
        let mut state = lock(&self.state);
        state.connected.remove(peripheral);
        state.emit(AdapterEvent::Disconnected {
            peripheral: peripheral.clone(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adapter::ControllerEvent;
    use tokio::sync::mpsc;

    fn started(
        peripherals: Vec<SimulatedPeripheral>,
    ) -> (SimulatedAdapter, SimulatedRadio, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (mut adapter, radio) = SimulatedAdapter::with_peripherals(peripherals);
        let (tx, rx) = mpsc::unbounded_channel();
        adapter.start(EventSink::new(tx)).unwrap();
        (adapter, radio, rx)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> AdapterEvent {
        match rx.try_recv() {
            Ok(ControllerEvent::Adapter(event)) => event,
            other => panic!("expected adapter event, got {:?}", other),
        }
    }

    #[test]
    fn test_recording_adapter_is_silent() {
        let (mut adapter, radio) = SimulatedAdapter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        adapter.start(EventSink::new(tx)).unwrap();
        adapter.start_scan().unwrap();
        adapter.connect(&"p1".into(), &ConnectOptions::default()).unwrap();

        assert!(rx.try_recv().is_err());
        assert!(radio.is_started());
        assert!(radio.is_scanning());
        assert_eq!(
            radio.commands(),
            vec![AdapterCommand::StartScan, AdapterCommand::Connect("p1".into())]
        );
    }

    #[test]
    fn test_scripted_flow() {
        let thermometer = SimulatedPeripheral::new("p1", Some("Thermo")).service(
            SimulatedService::new("1809").characteristic("2A1C", property_bits::READ, Some(vec![1])),
        );
        let (mut adapter, _radio, mut rx) = started(vec![thermometer]);
        let p1 = PeripheralId::from("p1");

        assert_eq!(next(&mut rx), AdapterEvent::StateChanged(AdapterState::PoweredOn));

        adapter.start_scan().unwrap();
        assert!(matches!(next(&mut rx), AdapterEvent::PeripheralDiscovered(d) if d.id == p1));

        adapter.connect(&p1, &ConnectOptions::default()).unwrap();
        assert_eq!(next(&mut rx), AdapterEvent::Connected { peripheral: p1.clone() });

        adapter.discover_services(&p1).unwrap();
        assert_eq!(
            next(&mut rx),
            AdapterEvent::ServicesDiscovered {
                peripheral: p1.clone(),
                services: vec!["1809".to_string()],
                error: None,
            }
        );

        adapter.read_value(&p1, "1809", "2A1C").unwrap();
        assert!(matches!(
            next(&mut rx),
            AdapterEvent::ValueUpdated { value: Some(v), error: None, .. } if v == vec![1]
        ));

        adapter.cancel_connection(&p1).unwrap();
        assert_eq!(
            next(&mut rx),
            AdapterEvent::Disconnected { peripheral: p1, error: None }
        );
    }

    #[test]
    fn test_unreachable_and_unknown_peripherals() {
        let (mut adapter, _radio, mut rx) =
            started(vec![SimulatedPeripheral::new("far", Some("Far")).unreachable()]);
        next(&mut rx);

        adapter.connect(&"far".into(), &ConnectOptions::default()).unwrap();
        assert!(matches!(next(&mut rx), AdapterEvent::ConnectFailed { error: Some(_), .. }));

        assert_eq!(
            adapter.connect(&"ghost".into(), &ConnectOptions::default()),
            Err(AdapterError::UnknownPeripheral("ghost".to_string()))
        );
    }

    #[test]
    fn test_released_adapter_refuses_commands() {
        let (mut adapter, radio) = SimulatedAdapter::new();
        adapter.release();

        assert!(radio.is_released());
        assert_eq!(adapter.start_scan(), Err(AdapterError::Released));
        assert!(!radio.emit(AdapterEvent::StateChanged(AdapterState::PoweredOn)));
        assert!(radio.commands().is_empty());
    }
}
