//! Console consumer
//!
//! Headless front end for the controller: prints what the controller
//! reports and applies a small policy on top of it. It can connect to the
//! first peripheral advertising a configured name and read every readable
//! characteristic once discovery finishes.

use crate::domain::gatt;
use crate::domain::models::{
    ConnectOptions, ConnectionStatus, ControllerNotification, PeripheralId,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::service::ControllerHandle;
use std::collections::HashSet;
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolePolicy {
    /// Connect to the first peripheral advertising this name (case-insensitive)
    pub auto_connect_name: Option<String>,
    /// Read every readable characteristic once its service is discovered
    pub auto_read_readable: bool,
    pub connect_timeout: Option<Duration>,
}

impl From<&Settings> for ConsolePolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            auto_connect_name: settings.auto_connect_name.clone(),
            auto_read_readable: settings.auto_read_readable,
            connect_timeout: settings.connect_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Requests the console wants sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Connect(PeripheralId),
    Read {
        peripheral: PeripheralId,
        service: String,
        characteristic: String,
    },
}

/// Output lines and follow-up requests produced by one notification.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reaction {
    pub lines: Vec<String>,
    pub actions: Vec<ConsoleAction>,
}

/// Pure part of the console: turns notifications into output and actions.
#[derive(Debug, Default)]
pub struct ConsoleState {
    policy: ConsolePolicy,
    seen: HashSet<PeripheralId>,
    attempted: HashSet<PeripheralId>,
}

impl ConsoleState {
    pub fn new(policy: ConsolePolicy) -> Self {
        Self {
            policy,
            seen: HashSet::new(),
            attempted: HashSet::new(),
        }
    }

    pub fn on_notification(&mut self, notification: &ControllerNotification) -> Reaction {
        let mut reaction = Reaction::default();
        match notification {
            ControllerNotification::PeripheralsUpdated(snapshot) => {
                for record in snapshot.values() {
                    if self.seen.insert(record.id.clone()) {
                        let rssi = record
                            .rssi
                            .map_or_else(|| "?".to_string(), |r| r.to_string());
                        reaction.lines.push(format!(
                            "Found {} ({}) rssi {} dBm",
                            record.name, record.id, rssi
                        ));
                    }
                }

                // One attempt per peripheral; failures are not retried
                if let Some(wanted) = &self.policy.auto_connect_name {
                    let target = snapshot.values().find(|r| {
                        r.name.eq_ignore_ascii_case(wanted)
                            && r.status == ConnectionStatus::Discovered
                            && !self.attempted.contains(&r.id)
                    });
                    if let Some(record) = target {
                        self.attempted.insert(record.id.clone());
                        reaction
                            .lines
                            .push(format!("Connecting to {} ({})", record.name, record.id));
                        reaction.actions.push(ConsoleAction::Connect(record.id.clone()));
                    }
                }
            }
            ControllerNotification::Connected(peripheral) => {
                reaction.lines.push(format!("Connected to {}", peripheral));
            }
            ControllerNotification::Disconnected { peripheral, error } => {
                reaction.lines.push(match error {
                    Some(e) => format!("Disconnected from {}: {}", peripheral, e),
                    None => format!("Disconnected from {}", peripheral),
                });
            }
            ControllerNotification::CharacteristicsDiscovered {
                peripheral,
                service,
            } => {
                let name = gatt::service_name(&service.uuid).unwrap_or("Unknown service");
                reaction.lines.push(format!(
                    "Service {} ({}) on {}: {} characteristics",
                    service.uuid,
                    name,
                    peripheral,
                    service.characteristics.len()
                ));
                for characteristic in service.characteristics.values() {
                    reaction.lines.push(format!(
                        "  {}: {}",
                        characteristic.uuid,
                        characteristic.properties.names().join(", ")
                    ));
                    if self.policy.auto_read_readable && characteristic.properties.read {
                        reaction.actions.push(ConsoleAction::Read {
                            peripheral: peripheral.clone(),
                            service: service.uuid.clone(),
                            characteristic: characteristic.uuid.clone(),
                        });
                    }
                }
            }
            ControllerNotification::CharacteristicValueUpdated {
                characteristic,
                value,
                ..
            } => {
                reaction.lines.push(format!(
                    "char: {} - value: {}",
                    characteristic.uuid,
                    render_value(value.as_deref())
                ));
            }
            ControllerNotification::Failure { peripheral, error } => {
                reaction.lines.push(match error {
                    Some(e) => format!("Failure on {}: {}", peripheral, e),
                    None => format!("Failure on {}", peripheral),
                });
            }
        }
        reaction
    }
}

/// Bracketed UTF-8 text, or "no value" when there is nothing printable.
pub fn render_value(value: Option<&[u8]>) -> String {
    match value.map(std::str::from_utf8) {
        Some(Ok(text)) => format!("[{}]", text),
        _ => "no value".to_string(),
    }
}

pub struct ConsoleApp<W: Write> {
    handle: ControllerHandle,
    state: ConsoleState,
    connect_timeout: Option<Duration>,
    out: W,
}

impl<W: Write> ConsoleApp<W> {
    pub fn new(handle: ControllerHandle, policy: ConsolePolicy, out: W) -> Self {
        let connect_timeout = policy.connect_timeout;
        Self {
            handle,
            state: ConsoleState::new(policy),
            connect_timeout,
            out,
        }
    }

    /// Print notifications and act on them until `stop` resolves or the
    /// controller goes away. Returns the writer.
    pub async fn run_until<F>(
        mut self,
        notifications: &mut mpsc::UnboundedReceiver<ControllerNotification>,
        stop: F,
    ) -> anyhow::Result<W>
    where
        F: Future<Output = ()>,
    {
        writeln!(self.out, "Adapter: {}", self.handle.adapter_state())?;
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                notification = notifications.recv() => match notification {
                    Some(notification) => self.apply(&notification).await?,
                    None => {
                        debug!("Controller notifications closed");
                        break;
                    }
                },
            }
        }
        self.out.flush()?;
        Ok(self.out)
    }

    async fn apply(&mut self, notification: &ControllerNotification) -> anyhow::Result<()> {
        let reaction = self.state.on_notification(notification);
        for line in &reaction.lines {
            writeln!(self.out, "{}", line)?;
        }

        for action in reaction.actions {
            let result = match &action {
                ConsoleAction::Connect(peripheral) => {
                    let options = ConnectOptions {
                        timeout: self.connect_timeout,
                        ..ConnectOptions::default()
                    };
                    self.handle.connect(peripheral, options).await
                }
                ConsoleAction::Read {
                    peripheral,
                    service,
                    characteristic,
                } => {
                    self.handle
                        .read_value(peripheral, service, characteristic)
                        .await
                }
            };
            if let Err(e) = result {
                warn!("Request {:?} rejected: {}", action, e);
                writeln!(self.out, "Request rejected: {}", e)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delegate::ChannelDelegate;
    use crate::domain::gatt::property_bits;
    use crate::domain::error::ControllerError;
    use crate::domain::models::{
        AdvertisementData, CharacteristicRecord, PeripheralRecord, ServiceRecord,
    };
    use crate::infrastructure::bluetooth::service::{ActivationOptions, ControllerService};
    use crate::infrastructure::bluetooth::simulated::{
        SimulatedAdapter, SimulatedPeripheral, SimulatedService,
    };

    fn record(id: &str, name: &str, status: ConnectionStatus) -> PeripheralRecord {
        PeripheralRecord {
            id: id.into(),
            name: name.to_string(),
            advertisement: AdvertisementData::default(),
            rssi: Some(-55),
            status,
        }
    }

    fn snapshot(records: Vec<PeripheralRecord>) -> ControllerNotification {
        ControllerNotification::PeripheralsUpdated(
            records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        )
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(Some(&b"Sensor1"[..])), "[Sensor1]");
        assert_eq!(render_value(Some(&[0xff, 0xfe][..])), "no value");
        assert_eq!(render_value(None), "no value");
    }

    #[test]
    fn test_new_peripherals_printed_once() {
        let mut state = ConsoleState::new(ConsolePolicy::default());
        let n = snapshot(vec![record("p1", "Tag", ConnectionStatus::Discovered)]);

        assert_eq!(state.on_notification(&n).lines, vec!["Found Tag (p1) rssi -55 dBm"]);
        assert!(state.on_notification(&n).lines.is_empty());
    }

    #[test]
    fn test_auto_connect_attempted_once() {
        let mut state = ConsoleState::new(ConsolePolicy {
            auto_connect_name: Some("thermo".to_string()),
            ..ConsolePolicy::default()
        });

        let first = state.on_notification(&snapshot(vec![
            record("p1", "Tag", ConnectionStatus::Discovered),
            record("p2", "Thermo", ConnectionStatus::Discovered),
        ]));
        assert_eq!(first.actions, vec![ConsoleAction::Connect("p2".into())]);

        let after_failure = state.on_notification(&snapshot(vec![record(
            "p2",
            "Thermo",
            ConnectionStatus::Disconnected(None),
        )]));
        assert!(after_failure.actions.is_empty());
    }

    #[test]
    fn test_auto_read_only_readable() {
        let mut state = ConsoleState::new(ConsolePolicy {
            auto_read_readable: true,
            ..ConsolePolicy::default()
        });
        let peripheral = PeripheralId::from("p1");
        let mut service = ServiceRecord::new("180F", peripheral.clone());
        for (uuid, bits) in [("2A19", property_bits::READ), ("2A1A", property_bits::NOTIFY)] {
            service.characteristics.insert(
                uuid.to_string(),
                CharacteristicRecord {
                    uuid: uuid.to_string(),
                    service: "180F".to_string(),
                    properties: gatt::CharacteristicProperties::from_bits(bits),
                    value: None,
                },
            );
        }

        let reaction = state.on_notification(&ControllerNotification::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service,
        });
        assert_eq!(
            reaction.actions,
            vec![ConsoleAction::Read {
                peripheral,
                service: "180F".to_string(),
                characteristic: "2A19".to_string(),
            }]
        );
        assert_eq!(
            reaction.lines[0],
            "Service 180F (Battery Service) on p1: 2 characteristics"
        );
        assert_eq!(reaction.lines[1], "  2A19: read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_end_to_end() {
        let sensor = SimulatedPeripheral::new("AA:identity1", Some("Sensor1"))
            .service(SimulatedService::new("1800").characteristic(
                "2A00",
                property_bits::READ,
                Some(b"Sensor1".to_vec()),
            ))
            .service(SimulatedService::new("180F").characteristic(
                "2A19",
                property_bits::NOTIFY,
                None,
            ));
        let (adapter, _radio) = SimulatedAdapter::with_peripherals(vec![sensor]);
        let (delegate, mut notifications) = ChannelDelegate::new();
        let handle = ControllerService::activate(
            Box::new(adapter),
            Box::new(delegate),
            ActivationOptions::default(),
        )
        .unwrap();

        let policy = ConsolePolicy {
            auto_connect_name: Some("Sensor1".to_string()),
            auto_read_readable: true,
            connect_timeout: None,
        };
        let app = ConsoleApp::new(handle.clone(), policy, Vec::new());
        let out = app
            .run_until(
                &mut notifications,
                tokio::time::sleep(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        handle.shutdown().await;

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Found Sensor1 (AA:identity1)"));
        assert!(text.contains("Connected to AA:identity1"));
        assert!(text.contains("Service 1800 (Generic Access) on AA:identity1"));
        assert!(text.contains("char: 2A00 - value: [Sensor1]"));
        assert!(!text.contains("char: 2A19"));
        assert_eq!(handle.peripherals().await, Err(ControllerError::Released));
    }
}
