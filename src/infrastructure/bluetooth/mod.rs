//! Bluetooth Module
//!
//! Adapter implementations and the task that drives the controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ControllerService                      │
//! │   (serialized task owning the Controller state machine)  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ dyn Adapter
//!              ┌────────┴────────┐
//!              │                 │
//!              ▼                 ▼
//!      ┌──────────────┐  ┌──────────────┐
//!      │   Btleplug   │  │  Simulated   │
//!      │              │  │              │
//!      │ - host radio │  │ - scripted   │
//!      │   via        │  │   radio for  │
//!      │   btleplug   │  │   tests/demo │
//!      └──────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`service`] - Controller task, command handle and activation
//! - [`simulated`] - In-memory adapter with a recorded command log
//! - `btleplug_adapter` - Host adapter (feature `btleplug`)

#[cfg(feature = "btleplug")]
pub mod btleplug_adapter;
pub mod service;
pub mod simulated;

pub use service::{ActivationOptions, ControllerHandle, ControllerService};
