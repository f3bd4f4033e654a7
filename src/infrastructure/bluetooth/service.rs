//! Controller Service
//!
//! Runs a [`Controller`] on a single tokio task. Adapter events, rescan ticks
//! and consumer commands all funnel into that task, so the state machine is
//! never touched from two places at once. Consumers talk to it through a
//! cloneable [`ControllerHandle`].

use crate::domain::adapter::{Adapter, ControllerEvent};
use crate::domain::controller::{Controller, ControllerConfig};
use crate::domain::delegate::ControllerDelegate;
use crate::domain::discovery::PeripheralSnapshot;
use crate::domain::error::ControllerError;
use crate::domain::models::{AdapterState, ConnectOptions, ControllerState, LinkState, PeripheralId};
use crate::domain::topology::ServiceMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, info, warn};

/// How long a shutdown waits for cancelled links to report their disconnect
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        peripheral: PeripheralId,
        options: ConnectOptions,
        reply: Reply<Result<(), ControllerError>>,
    },
    DiscoverServices {
        peripheral: PeripheralId,
        reply: Reply<Result<(), ControllerError>>,
    },
    ReadValue {
        peripheral: PeripheralId,
        service: String,
        characteristic: String,
        reply: Reply<Result<(), ControllerError>>,
    },
    Peripherals {
        reply: Reply<PeripheralSnapshot>,
    },
    Services {
        peripheral: PeripheralId,
        reply: Reply<Option<ServiceMap>>,
    },
    State {
        reply: Reply<ControllerState>,
    },
    LinkState {
        peripheral: PeripheralId,
        reply: Reply<Option<LinkState>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// How and where to run the controller.
#[derive(Debug, Clone, Default)]
pub struct ActivationOptions {
    /// Runtime to schedule the controller task and rescan timer on. Falls
    /// back to the ambient runtime.
    pub runtime: Option<Handle>,
    pub config: ControllerConfig,
}

pub struct ControllerService;

impl ControllerService {
    /// Start a controller over `adapter`, reporting to `delegate`.
    ///
    /// Fails with [`ControllerError::NoRuntime`] when called outside a tokio
    /// runtime without an explicit one in `options`.
    pub fn activate(
        adapter: Box<dyn Adapter>,
        delegate: Box<dyn ControllerDelegate>,
        options: ActivationOptions,
    ) -> Result<ControllerHandle, ControllerError> {
        let runtime = match options.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ControllerError::NoRuntime)?,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut controller =
            Controller::new(adapter, delegate, options.config, events_tx, runtime.clone());
        controller.activate()?;
        let adapter_state = controller.subscribe_adapter_state();

        runtime.spawn(run(controller, events_rx, commands_rx));
        info!("Controller service started");

        Ok(ControllerHandle {
            commands: commands_tx,
            adapter_state,
        })
    }
}

async fn run(
    mut controller: Controller,
    mut events: mpsc::UnboundedReceiver<ControllerEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut shutdown_replies = Vec::new();
    loop {
        tokio::select! {
            Some(event) = events.recv() => controller.handle_event(event),
            command = commands.recv() => match command {
                Some(command) => {
                    if let Some(reply) = handle_command(&mut controller, command) {
                        shutdown_replies.push(reply);
                        break;
                    }
                }
                None => {
                    debug!("All controller handles dropped");
                    break;
                }
            },
        }
    }

    controller.shutdown();
    await_disconnects(&mut controller, &mut events, &mut commands, &mut shutdown_replies).await;
    for reply in shutdown_replies {
        let _ = reply.send(());
    }
    info!("Controller service stopped");
}

/// Keep delivering adapter events until every cancelled link has reported
/// its disconnect or the grace period runs out. Commands arriving meanwhile
/// are answered by the released controller.
async fn await_disconnects(
    controller: &mut Controller,
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_replies: &mut Vec<Reply<()>>,
) {
    let deadline = time::sleep(DISCONNECT_GRACE);
    tokio::pin!(deadline);
    let mut commands_open = true;

    while controller.pending_disconnects() > 0 {
        tokio::select! {
            Some(event) = events.recv() => controller.handle_event(event),
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    if let Some(reply) = handle_command(controller, command) {
                        shutdown_replies.push(reply);
                    }
                }
                None => commands_open = false,
            },
            _ = &mut deadline => {
                warn!(
                    "{} links did not confirm their disconnect",
                    controller.pending_disconnects()
                );
                break;
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        controller.handle_event(event);
    }
}

/// Answer a command. A shutdown request is handed back to the caller,
/// which replies once the controller has stopped.
fn handle_command(controller: &mut Controller, command: Command) -> Option<Reply<()>> {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        Command::Connect {
            peripheral,
            options,
            reply,
        } => {
            let _ = reply.send(controller.connect(&peripheral, options));
        }
        Command::DiscoverServices { peripheral, reply } => {
            let _ = reply.send(controller.discover_services(&peripheral));
        }
        Command::ReadValue {
            peripheral,
            service,
            characteristic,
            reply,
        } => {
            let _ = reply.send(controller.read_value(&peripheral, &service, &characteristic));
        }
        Command::Peripherals { reply } => {
            let _ = reply.send(controller.peripherals());
        }
        Command::Services { peripheral, reply } => {
            let _ = reply.send(controller.services(&peripheral));
        }
        Command::State { reply } => {
            let _ = reply.send(controller.state());
        }
        Command::LinkState { peripheral, reply } => {
            let _ = reply.send(controller.link_state(&peripheral));
        }
        Command::Shutdown { reply } => return Some(reply),
    }
    None
}

/// Consumer side of a running controller. Dropping every clone shuts the
/// controller down.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    adapter_state: watch::Receiver<AdapterState>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ControllerError::Released)?;
        response.await.map_err(|_| ControllerError::Closed)
    }

    /// Ask for a connection to a discovered peripheral. `Ok` means the
    /// request went out; the outcome arrives as `on_connected` or
    /// `on_failure`.
    pub async fn connect(
        &self,
        peripheral: &PeripheralId,
        options: ConnectOptions,
    ) -> Result<(), ControllerError> {
        let peripheral = peripheral.clone();
        self.request(|reply| Command::Connect {
            peripheral,
            options,
            reply,
        })
        .await?
    }

    /// Re-run service discovery on a connected peripheral. The previous
    /// topology is replaced once the adapter answers.
    pub async fn discover_services(&self, peripheral: &PeripheralId) -> Result<(), ControllerError> {
        let peripheral = peripheral.clone();
        self.request(|reply| Command::DiscoverServices { peripheral, reply })
            .await?
    }

    pub async fn read_value(
        &self,
        peripheral: &PeripheralId,
        service: &str,
        characteristic: &str,
    ) -> Result<(), ControllerError> {
        let peripheral = peripheral.clone();
        let service = service.to_string();
        let characteristic = characteristic.to_string();
        self.request(|reply| Command::ReadValue {
            peripheral,
            service,
            characteristic,
            reply,
        })
        .await?
    }

    pub async fn peripherals(&self) -> Result<PeripheralSnapshot, ControllerError> {
        self.request(|reply| Command::Peripherals { reply }).await
    }

    pub async fn services(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Option<ServiceMap>, ControllerError> {
        let peripheral = peripheral.clone();
        self.request(|reply| Command::Services { peripheral, reply })
            .await
    }

    pub async fn state(&self) -> Result<ControllerState, ControllerError> {
        self.request(|reply| Command::State { reply }).await
    }

    pub async fn link_state(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Option<LinkState>, ControllerError> {
        let peripheral = peripheral.clone();
        self.request(|reply| Command::LinkState { peripheral, reply })
            .await
    }

    /// Stop the controller. Returns once the adapter is released and every
    /// cancelled link has reported its disconnect, or after
    /// [`DISCONNECT_GRACE`]. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .request(|reply| Command::Shutdown { reply })
            .await
            .is_err()
        {
            debug!("Controller already stopped");
        }
    }

    /// Last adapter state, readable without a round trip.
    pub fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.borrow()
    }

    pub fn adapter_state_changes(&self) -> watch::Receiver<AdapterState> {
        self.adapter_state.clone()
    }
}
