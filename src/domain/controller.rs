//! Controller state machine
//!
//! Owns the discovery and topology registries and the rescan timer, turns
//! adapter events into consumer callbacks and validates consumer commands
//! before they reach the adapter.
//!
//! A `Controller` is driven from exactly one task; see
//! [`crate::infrastructure::bluetooth::service`] for the loop that does so.

use crate::domain::adapter::{Adapter, AdapterEvent, ControllerEvent, EventSink};
use crate::domain::delegate::ControllerDelegate;
use crate::domain::discovery::{DiscoveryRegistry, PeripheralSnapshot, Upsert};
use crate::domain::error::{AdapterError, ControllerError};
use crate::domain::models::{
    AdapterState, ConnectOptions, ConnectionStatus, ControllerState, DiscoveredCharacteristic,
    DiscoveredPeripheral, LinkState, PeripheralId,
};
use crate::domain::rescan::{RescanTimer, DEFAULT_RESCAN_INTERVAL};
use crate::domain::settings::Settings;
use crate::domain::topology::{ServiceMap, TopologyRegistry};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Controller behavior knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub rescan_interval: Duration,
    /// Repeating rescan timer, or a single tick per (re)start
    pub timer_repeats: bool,
    /// Issue service discovery as soon as a connection is established
    pub discover_services_on_connect: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
            timer_repeats: true,
            discover_services_on_connect: true,
        }
    }
}

impl From<&Settings> for ControllerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            rescan_interval: Duration::from_millis(settings.rescan_interval_ms),
            timer_repeats: settings.timer_repeats,
            discover_services_on_connect: settings.discover_services_on_connect,
        }
    }
}

pub struct Controller {
    adapter: Option<Box<dyn Adapter>>,
    delegate: Box<dyn ControllerDelegate>,
    config: ControllerConfig,
    events: mpsc::UnboundedSender<ControllerEvent>,
    discovery: DiscoveryRegistry,
    topology: TopologyRegistry,
    links: HashMap<PeripheralId, LinkState>,
    /// None until the adapter reports its first state
    adapter_state: Option<AdapterState>,
    state_tx: watch::Sender<AdapterState>,
    rescan: RescanTimer,
    active: bool,
    /// Links cancelled at shutdown whose disconnect has not arrived yet
    awaiting_disconnect: BTreeSet<PeripheralId>,
}

impl Controller {
    /// Create an inactive controller.
    ///
    /// `events` is the sending half of the queue the owning task drains;
    /// adapter events and timer ticks are pushed into it. `runtime` is where
    /// the rescan timer is scheduled.
    pub fn new(
        adapter: Box<dyn Adapter>,
        delegate: Box<dyn ControllerDelegate>,
        config: ControllerConfig,
        events: mpsc::UnboundedSender<ControllerEvent>,
        runtime: Handle,
    ) -> Self {
        let rescan = RescanTimer::new(config.rescan_interval, config.timer_repeats, runtime);
        let (state_tx, _) = watch::channel(AdapterState::Unknown);
        Self {
            adapter: Some(adapter),
            delegate,
            config,
            events,
            discovery: DiscoveryRegistry::new(),
            topology: TopologyRegistry::new(),
            links: HashMap::new(),
            adapter_state: None,
            state_tx,
            rescan,
            active: false,
            awaiting_disconnect: BTreeSet::new(),
        }
    }

    /// Hand the adapter its event sink and start the rescan timer.
    pub fn activate(&mut self) -> Result<(), ControllerError> {
        if self.active {
            return Ok(());
        }
        let adapter = self.adapter.as_mut().ok_or(ControllerError::Released)?;
        adapter.start(EventSink::new(self.events.clone()))?;

        self.active = true;
        self.rescan.start(self.events.clone());
        info!("Controller activated");
        Ok(())
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::RescanTick => self.on_rescan_tick(),
            ControllerEvent::Adapter(event) => self.on_adapter_event(event),
        }
    }

    fn on_adapter_event(&mut self, event: AdapterEvent) {
        // Disconnects keep flowing after shutdown: they are how bulk
        // cancellation completes.
        if !self.active && !matches!(event, AdapterEvent::Disconnected { .. }) {
            debug!("Controller inactive, ignoring adapter event: {:?}", event);
            return;
        }

        match event {
            AdapterEvent::StateChanged(state) => self.on_state_changed(state),
            AdapterEvent::PeripheralDiscovered(discovered) => self.on_discovered(discovered),
            AdapterEvent::Connected { peripheral } => self.on_connected(peripheral),
            AdapterEvent::ConnectFailed { peripheral, error } => {
                self.on_connect_failed(peripheral, error)
            }
            AdapterEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(peripheral, error)
            }
            AdapterEvent::ServicesDiscovered {
                peripheral,
                services,
                error,
            } => self.on_services_discovered(peripheral, services, error),
            AdapterEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
                error,
            } => self.on_characteristics_discovered(peripheral, service, characteristics, error),
            AdapterEvent::ValueUpdated {
                peripheral,
                service,
                characteristic,
                value,
                error,
            } => self.on_value_updated(peripheral, service, characteristic, value, error),
        }
    }

    fn on_state_changed(&mut self, state: AdapterState) {
        let previous = self.adapter_state.replace(state);
        self.state_tx.send_replace(state);
        info!("Adapter state: {}", state);

        match state {
            AdapterState::PoweredOn => {
                // The adapter forgets scan intent across power cycles
                if let Some(adapter) = self.adapter.as_mut() {
                    if let Err(e) = adapter.start_scan() {
                        warn!("Failed to start scan: {}", e);
                    }
                }
                self.rescan.start(self.events.clone());
            }
            AdapterState::PoweredOff => {
                self.leave_powered_on(previous);
                if previous != Some(AdapterState::PoweredOff) {
                    self.surface_power_loss();
                }
            }
            _ => self.leave_powered_on(previous),
        }
    }

    fn leave_powered_on(&mut self, previous: Option<AdapterState>) {
        self.rescan.stop();
        if previous != Some(AdapterState::PoweredOn) {
            return;
        }
        if let Some(adapter) = self.adapter.as_mut() {
            if let Err(e) = adapter.stop_scan() {
                debug!("Failed to stop scan: {}", e);
            }
        }
    }

    /// Links do not survive the radio powering down. The transport reports
    /// the individual disconnects; here the registry is brought in line and
    /// the consumer gets a fresh snapshot straight away.
    fn surface_power_loss(&mut self) {
        if self.links.is_empty() {
            return;
        }

        for (peripheral, _) in self.links.drain() {
            self.topology.remove(&peripheral);
            self.discovery.set_status(
                &peripheral,
                ConnectionStatus::Disconnected(Some(AdapterError::PoweredOff)),
            );
        }
        self.publish_snapshot();
    }

    fn on_discovered(&mut self, discovered: DiscoveredPeripheral) {
        let id = discovered.id.clone();
        match self.discovery.upsert(discovered) {
            Upsert::Filtered => {
                trace!("Ignoring unnamed advertiser {}", id);
                return;
            }
            Upsert::Inserted => info!("Discovered peripheral {}", id),
            Upsert::Updated => debug!("Refreshed peripheral {}", id),
        }
        self.publish_snapshot();
    }

    fn on_rescan_tick(&mut self) {
        // A tick queued before the timer was stopped is stale
        let wanted = matches!(self.adapter_state, None | Some(AdapterState::PoweredOn));
        if !self.active || !wanted {
            trace!("Dropping stale rescan tick");
            return;
        }
        trace!("Rescan tick, re-delivering {} peripherals", self.discovery.len());
        self.publish_snapshot();
    }

    fn publish_snapshot(&mut self) {
        self.delegate.on_peripherals_updated(self.discovery.snapshot());
    }

    fn on_connected(&mut self, peripheral: PeripheralId) {
        info!("Connected to {}", peripheral);
        self.links.insert(peripheral.clone(), LinkState::Connected);
        self.discovery
            .set_status(&peripheral, ConnectionStatus::Connected);
        self.delegate.on_connected(&peripheral);

        if self.config.discover_services_on_connect {
            self.request_services(&peripheral);
        }
    }

    fn on_connect_failed(&mut self, peripheral: PeripheralId, error: Option<AdapterError>) {
        warn!(
            "Failed to connect to {}: {}",
            peripheral,
            describe(error.as_ref())
        );
        self.links.remove(&peripheral);
        self.discovery
            .set_status(&peripheral, ConnectionStatus::Disconnected(error.clone()));
        self.delegate.on_failure(&peripheral, error.as_ref());
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<AdapterError>) {
        info!(
            "Disconnected from {}: {}",
            peripheral,
            describe(error.as_ref())
        );
        self.links.remove(&peripheral);
        self.awaiting_disconnect.remove(&peripheral);
        self.topology.remove(&peripheral);
        self.discovery
            .set_status(&peripheral, ConnectionStatus::Disconnected(error.clone()));
        self.delegate.on_disconnected(&peripheral, error.as_ref());
    }

    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        services: Vec<String>,
        error: Option<AdapterError>,
    ) {
        if !self.links.contains_key(&peripheral) {
            warn!("Services reported for {} without a live link, ignoring", peripheral);
            return;
        }

        if let Some(error) = error {
            warn!("Service discovery failed for {}: {}", peripheral, error);
            self.links.insert(peripheral.clone(), LinkState::Connected);
            self.delegate.on_failure(&peripheral, Some(&error));
            return;
        }

        let services = self.topology.replace_services(&peripheral, services);
        info!("Discovered {} services on {}", services.len(), peripheral);

        let mut pending = BTreeSet::new();
        if let Some(adapter) = self.adapter.as_mut() {
            for service in services {
                match adapter.discover_characteristics(&peripheral, &service) {
                    Ok(()) => {
                        pending.insert(service);
                    }
                    Err(e) => warn!(
                        "Could not discover characteristics of {} on {}: {}",
                        service, peripheral, e
                    ),
                }
            }
        }

        let link = if pending.is_empty() {
            LinkState::Connected
        } else {
            LinkState::DiscoveringCharacteristics { pending }
        };
        self.links.insert(peripheral, link);
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: String,
        characteristics: Vec<DiscoveredCharacteristic>,
        error: Option<AdapterError>,
    ) {
        if let Some(error) = error {
            warn!(
                "Characteristic discovery failed for {} on {}: {}",
                service, peripheral, error
            );
            self.finish_service(&peripheral, &service);
            self.delegate.on_failure(&peripheral, Some(&error));
            return;
        }

        match self
            .topology
            .insert_characteristics(&peripheral, &service, characteristics)
        {
            Ok(record) => {
                debug!(
                    "Service {} on {}: {} characteristics",
                    service,
                    peripheral,
                    record.characteristics.len()
                );
                self.finish_service(&peripheral, &service);
                self.delegate
                    .on_characteristics_discovered(&peripheral, &record);
            }
            Err(e) => warn!("Dropping characteristics: {}", e),
        }
    }

    fn finish_service(&mut self, peripheral: &PeripheralId, service: &str) {
        if let Some(link) = self.links.get_mut(peripheral) {
            if let LinkState::DiscoveringCharacteristics { pending } = link {
                pending.remove(service);
                if pending.is_empty() {
                    info!("GATT discovery complete for {}", peripheral);
                    *link = LinkState::Connected;
                }
            }
        }
    }

    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        service: String,
        characteristic: String,
        value: Option<Vec<u8>>,
        error: Option<AdapterError>,
    ) {
        let value = match error {
            Some(e) => {
                debug!("Value update for {} carried an error: {}", characteristic, e);
                None
            }
            None => value,
        };

        match self
            .topology
            .update_value(&peripheral, &service, &characteristic, value.clone())
        {
            Ok(record) => {
                self.delegate
                    .on_characteristic_value_updated(&peripheral, &record, value.as_deref());
            }
            Err(e) => warn!("Dropping value update: {}", e),
        }
    }

    /// Ask the adapter to connect to a discovered peripheral.
    ///
    /// Rejections are synchronous. Once the command is issued, the outcome
    /// arrives later through `on_connected` or `on_failure`.
    pub fn connect(
        &mut self,
        peripheral: &PeripheralId,
        options: ConnectOptions,
    ) -> Result<(), ControllerError> {
        self.ensure_active()?;
        if !self.discovery.contains(peripheral) {
            return Err(ControllerError::UnknownPeripheral(peripheral.clone()));
        }
        let state = self.adapter_state();
        if !state.is_powered_on() {
            return Err(ControllerError::AdapterUnavailable(state));
        }
        if self.links.contains_key(peripheral) {
            return Err(ControllerError::AlreadyConnected(peripheral.clone()));
        }

        info!("Connecting to {}", peripheral);
        let adapter = self.adapter.as_mut().ok_or(ControllerError::Released)?;
        match adapter.connect(peripheral, &options) {
            Ok(()) => {
                self.links.insert(peripheral.clone(), LinkState::Connecting);
                self.discovery
                    .set_status(peripheral, ConnectionStatus::Connecting);
            }
            Err(e) => self.on_connect_failed(peripheral.clone(), Some(e)),
        }
        Ok(())
    }

    /// Run a fresh service discovery pass on a connected peripheral.
    pub fn discover_services(&mut self, peripheral: &PeripheralId) -> Result<(), ControllerError> {
        self.ensure_active()?;
        match self.links.get(peripheral) {
            None | Some(LinkState::Connecting) => {
                Err(ControllerError::NotConnected(peripheral.clone()))
            }
            Some(_) => {
                self.request_services(peripheral);
                Ok(())
            }
        }
    }

    fn request_services(&mut self, peripheral: &PeripheralId) {
        let Some(adapter) = self.adapter.as_mut() else {
            return;
        };
        match adapter.discover_services(peripheral) {
            Ok(()) => {
                self.links
                    .insert(peripheral.clone(), LinkState::DiscoveringServices);
            }
            Err(e) => {
                warn!("Could not discover services on {}: {}", peripheral, e);
                self.delegate.on_failure(peripheral, Some(&e));
            }
        }
    }

    /// Ask the adapter to read a characteristic. The value arrives through
    /// `on_characteristic_value_updated`.
    pub fn read_value(
        &mut self,
        peripheral: &PeripheralId,
        service: &str,
        characteristic: &str,
    ) -> Result<(), ControllerError> {
        self.ensure_active()?;
        if !self.links.contains_key(peripheral) {
            return Err(ControllerError::NotConnected(peripheral.clone()));
        }
        if self
            .topology
            .characteristic(peripheral, service, characteristic)
            .is_none()
        {
            return Err(ControllerError::UnknownCharacteristic {
                peripheral: peripheral.clone(),
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            });
        }

        let adapter = self.adapter.as_mut().ok_or(ControllerError::Released)?;
        if let Err(e) = adapter.read_value(peripheral, service, characteristic) {
            warn!("Read of {} on {} rejected: {}", characteristic, peripheral, e);
            self.delegate.on_failure(peripheral, Some(&e));
        }
        Ok(())
    }

    /// Tear everything down: cancel the timer, cancel every known
    /// connection, clear the registries and release the adapter.
    ///
    /// Does not wait for the adapter to confirm; confirmations arrive as
    /// disconnect callbacks, and [`Controller::pending_disconnects`] counts
    /// the established links still owed one. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        self.rescan.stop();

        let Some(mut adapter) = self.adapter.take() else {
            debug!("Controller already shut down");
            return;
        };

        let peripherals = self.discovery.ids();
        info!(
            "Shutting down controller, cancelling {} connections",
            peripherals.len()
        );
        for peripheral in &peripherals {
            match adapter.cancel_connection(peripheral) {
                Ok(()) => {
                    // A link still connecting may never produce a disconnect
                    let established = self
                        .links
                        .get(peripheral)
                        .is_some_and(|link| *link != LinkState::Connecting);
                    if established {
                        self.awaiting_disconnect.insert(peripheral.clone());
                    }
                }
                Err(e) => debug!("Cancel for {} failed: {}", peripheral, e),
            }
        }
        adapter.release();

        self.discovery.clear();
        self.topology.clear();
        self.links.clear();
        self.active = false;
    }

    fn ensure_active(&self) -> Result<(), ControllerError> {
        if self.adapter.is_none() {
            return Err(ControllerError::Released);
        }
        if !self.active {
            return Err(ControllerError::NotActive);
        }
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        if !self.active {
            return ControllerState::Inactive;
        }
        match self.adapter_state {
            None => ControllerState::Inactive,
            Some(AdapterState::PoweredOn) => ControllerState::Scanning,
            Some(AdapterState::PoweredOff) => ControllerState::PoweredOff,
            Some(other) => ControllerState::Unready(other),
        }
    }

    /// Last state reported by the adapter.
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state.unwrap_or_default()
    }

    /// Watch channel that follows the adapter state.
    pub fn subscribe_adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.state_tx.subscribe()
    }

    pub fn link_state(&self, peripheral: &PeripheralId) -> Option<LinkState> {
        self.links.get(peripheral).cloned()
    }

    pub fn peripherals(&self) -> PeripheralSnapshot {
        self.discovery.snapshot()
    }

    pub fn services(&self, peripheral: &PeripheralId) -> Option<ServiceMap> {
        self.topology.services(peripheral)
    }

    pub fn is_rescan_running(&self) -> bool {
        self.rescan.is_running()
    }

    /// Links cancelled by shutdown that have not reported their disconnect.
    pub fn pending_disconnects(&self) -> usize {
        self.awaiting_disconnect.len()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn describe(error: Option<&AdapterError>) -> String {
    error.map_or_else(|| "no error reported".to_string(), ToString::to_string)
}
