//! Host BLE adapter over btleplug
//!
//! Each command spawns a short task on the runtime the adapter was created
//! on and reports its outcome through the [`EventSink`]. A single listener
//! task turns btleplug's central events into discovery and disconnect
//! events.

use crate::domain::adapter::{Adapter, AdapterEvent, EventSink};
use crate::domain::error::AdapterError;
use crate::domain::gatt;
use crate::domain::models::{
    AdapterState, AdvertisementData, ConnectOptions, DiscoveredCharacteristic,
    DiscoveredPeripheral, PeripheralId,
};
use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter as Central, Manager, Peripheral};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PeripheralTable = Arc<Mutex<HashMap<PeripheralId, Peripheral>>>;

pub struct BtleplugAdapter {
    central: Central,
    runtime: Handle,
    sink: Option<EventSink>,
    /// Platform peripherals seen so far, keyed by their identity string
    peripherals: PeripheralTable,
    listener: Option<JoinHandle<()>>,
    released: bool,
}

impl BtleplugAdapter {
    /// Open the host adapter at `index` (0 is the first one found).
    pub async fn new(index: usize) -> Result<Self, AdapterError> {
        let manager = Manager::new().await.map_err(unavailable)?;
        let adapters = manager.adapters().await.map_err(unavailable)?;
        let count = adapters.len();
        let central = adapters.into_iter().nth(index).ok_or_else(|| {
            AdapterError::Unavailable(format!(
                "adapter {} requested, {} available",
                index, count
            ))
        })?;

        if let Ok(info) = central.adapter_info().await {
            info!("Using Bluetooth adapter: {}", info);
        }

        Ok(Self {
            central,
            runtime: Handle::current(),
            sink: None,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            listener: None,
            released: false,
        })
    }

    fn sink(&self) -> Result<EventSink, AdapterError> {
        if self.released {
            return Err(AdapterError::Released);
        }
        self.sink
            .clone()
            .ok_or_else(|| AdapterError::Unavailable("adapter not started".to_string()))
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral, AdapterError> {
        lock(&self.peripherals)
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownPeripheral(id.to_string()))
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }
}

impl Adapter for BtleplugAdapter {
    fn start(&mut self, events: EventSink) -> Result<(), AdapterError> {
        if self.released {
            return Err(AdapterError::Released);
        }
        self.sink = Some(events.clone());

        let central = self.central.clone();
        let peripherals = self.peripherals.clone();
        self.listener = Some(self.runtime.spawn(async move {
            let mut stream = match central.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Could not subscribe to adapter events: {}", e);
                    events.emit(AdapterEvent::StateChanged(AdapterState::Unsupported));
                    return;
                }
            };
            // btleplug has no portable power state; a working event
            // subscription is the best available signal
            events.emit(AdapterEvent::StateChanged(AdapterState::PoweredOn));

            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let Ok(peripheral) = central.peripheral(&id).await else {
                            continue;
                        };
                        let discovered = describe(&peripheral).await;
                        lock(&peripherals).insert(discovered.id.clone(), peripheral);
                        if !events.emit(AdapterEvent::PeripheralDiscovered(discovered)) {
                            break;
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        events.emit(AdapterEvent::Disconnected {
                            peripheral: PeripheralId::new(id.to_string()),
                            error: None,
                        });
                    }
                    other => debug!("Unhandled central event: {:?}", other),
                }
            }
            debug!("Adapter event stream ended");
        }));
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), AdapterError> {
        self.sink()?;
        let central = self.central.clone();
        self.spawn(async move {
            match central.start_scan(ScanFilter::default()).await {
                Ok(()) => info!("Scanning for peripherals"),
                Err(e) => warn!("Failed to start scan: {}", e),
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), AdapterError> {
        self.sink()?;
        let central = self.central.clone();
        self.spawn(async move {
            if let Err(e) = central.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
        Ok(())
    }

    fn connect(
        &mut self,
        peripheral_id: &PeripheralId,
        options: &ConnectOptions,
    ) -> Result<(), AdapterError> {
        let sink = self.sink()?;
        let peripheral = self.peripheral(peripheral_id)?;
        let id = peripheral_id.clone();
        let timeout = options.timeout;

        self.spawn(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, peripheral.connect()).await {
                    Ok(result) => result.map_err(connection_failed),
                    Err(_) => Err(AdapterError::Timeout),
                },
                None => peripheral.connect().await.map_err(connection_failed),
            };
            match result {
                Ok(()) => sink.emit(AdapterEvent::Connected { peripheral: id }),
                Err(error) => sink.emit(AdapterEvent::ConnectFailed {
                    peripheral: id,
                    error: Some(error),
                }),
            };
        });
        Ok(())
    }

    fn cancel_connection(&mut self, peripheral_id: &PeripheralId) -> Result<(), AdapterError> {
        let sink = self.sink()?;
        let peripheral = self.peripheral(peripheral_id)?;
        let id = peripheral_id.clone();

        // The listener is aborted on release, so the disconnect is confirmed here
        self.spawn(async move {
            if !peripheral.is_connected().await.unwrap_or(false) {
                return;
            }
            let error = match peripheral.disconnect().await {
                Ok(()) => None,
                Err(e) => {
                    debug!("Disconnect of {} failed: {}", id, e);
                    Some(connection_failed(e))
                }
            };
            sink.emit(AdapterEvent::Disconnected {
                peripheral: id,
                error,
            });
        });
        Ok(())
    }

    fn discover_services(&mut self, peripheral_id: &PeripheralId) -> Result<(), AdapterError> {
        let sink = self.sink()?;
        let peripheral = self.peripheral(peripheral_id)?;
        let id = peripheral_id.clone();

        self.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => AdapterEvent::ServicesDiscovered {
                    peripheral: id,
                    services: peripheral
                        .services()
                        .iter()
                        .map(|s| s.uuid.to_string())
                        .collect(),
                    error: None,
                },
                Err(e) => AdapterEvent::ServicesDiscovered {
                    peripheral: id,
                    services: Vec::new(),
                    error: Some(gatt_error(e)),
                },
            };
            sink.emit(event);
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        peripheral_id: &PeripheralId,
        service: &str,
    ) -> Result<(), AdapterError> {
        let sink = self.sink()?;
        let peripheral = self.peripheral(peripheral_id)?;
        let id = peripheral_id.clone();
        let service = service.to_string();

        // btleplug resolves characteristics during service discovery
        self.spawn(async move {
            let found = peripheral
                .services()
                .into_iter()
                .find(|s| gatt::uuids_match(&s.uuid.to_string(), &service));
            let event = match found {
                Some(s) => AdapterEvent::CharacteristicsDiscovered {
                    peripheral: id,
                    service,
                    characteristics: s
                        .characteristics
                        .iter()
                        .map(|c| {
                            DiscoveredCharacteristic::new(
                                c.uuid.to_string(),
                                u16::from(c.properties.bits()),
                            )
                        })
                        .collect(),
                    error: None,
                },
                None => AdapterEvent::CharacteristicsDiscovered {
                    error: Some(AdapterError::Gatt(format!("service {} not found", service))),
                    peripheral: id,
                    service,
                    characteristics: Vec::new(),
                },
            };
            sink.emit(event);
        });
        Ok(())
    }

    fn read_value(
        &mut self,
        peripheral_id: &PeripheralId,
        service: &str,
        characteristic: &str,
    ) -> Result<(), AdapterError> {
        let sink = self.sink()?;
        let peripheral = self.peripheral(peripheral_id)?;
        let found = peripheral.characteristics().into_iter().find(|c| {
            gatt::uuids_match(&c.service_uuid.to_string(), service)
                && gatt::uuids_match(&c.uuid.to_string(), characteristic)
        });
        let Some(target) = found else {
            return Err(AdapterError::Gatt(format!(
                "characteristic {} not found in {}",
                characteristic, service
            )));
        };

        let id = peripheral_id.clone();
        let service = service.to_string();
        let characteristic = characteristic.to_string();
        self.spawn(async move {
            let (value, error) = match peripheral.read(&target).await {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(gatt_error(e))),
            };
            sink.emit(AdapterEvent::ValueUpdated {
                peripheral: id,
                service,
                characteristic,
                value,
                error,
            });
        });
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.sink = None;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        let central = self.central.clone();
        self.spawn(async move {
            let _ = central.stop_scan().await;
        });
        lock(&self.peripherals).clear();
        info!("Bluetooth adapter released");
    }
}

/// Build a discovery event from whatever the platform cached for the
/// peripheral's last advertisement.
async fn describe(peripheral: &Peripheral) -> DiscoveredPeripheral {
    let id = PeripheralId::new(peripheral.id().to_string());
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        _ => {
            return DiscoveredPeripheral::new(id, None, None);
        }
    };

    let advertisement = AdvertisementData {
        local_name: properties.local_name.clone(),
        tx_power_level: properties.tx_power_level,
        manufacturer_data: properties.manufacturer_data.into_iter().collect(),
        service_data: properties
            .service_data
            .into_iter()
            .map(|(uuid, data)| (uuid.to_string(), data))
            .collect(),
        services: properties.services.iter().map(|u| u.to_string()).collect(),
        connectable: None,
    };

    DiscoveredPeripheral {
        id,
        name: properties.local_name,
        advertisement,
        rssi: properties.rssi,
    }
}

fn lock(table: &PeripheralTable) -> std::sync::MutexGuard<'_, HashMap<PeripheralId, Peripheral>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(e: btleplug::Error) -> AdapterError {
    AdapterError::Unavailable(e.to_string())
}

fn connection_failed(e: btleplug::Error) -> AdapterError {
    AdapterError::ConnectionFailed(e.to_string())
}

fn gatt_error(e: btleplug::Error) -> AdapterError {
    AdapterError::Gatt(e.to_string())
}
