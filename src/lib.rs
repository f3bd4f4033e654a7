//! BLE Controller
//!
//! Discovery and connection lifecycle for nearby BLE peripherals, plus the
//! registry of services and characteristics each connected peripheral exposes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  AdapterEvent   ┌────────────────────────────┐  callbacks  ┌──────────┐
//! │   Adapter    │ ──────────────► │         Controller         │ ──────────► │ Delegate │
//! │ (btleplug /  │                 │  DiscoveryRegistry         │             │(consumer)│
//! │  simulated)  │ ◄────────────── │  TopologyRegistry          │ ◄────────── │          │
//! └──────────────┘    commands     │  RescanTimer               │   commands  └──────────┘
//!                                  └────────────────────────────┘
//! ```
//!
//! All adapter events, timer ticks and consumer commands are serialized onto a
//! single task owned by [`ControllerService`]; consumers only ever see copies.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::controller::{Controller, ControllerConfig};
pub use domain::delegate::{ChannelDelegate, ControllerDelegate};
pub use domain::error::{AdapterError, ControllerError};
pub use domain::models::{
    AdapterState, CharacteristicRecord, ConnectOptions, ConnectionStatus, ControllerNotification,
    ControllerState, PeripheralId, PeripheralRecord, ServiceRecord,
};
pub use infrastructure::bluetooth::service::{ActivationOptions, ControllerHandle, ControllerService};
