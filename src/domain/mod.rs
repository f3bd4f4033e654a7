//! Domain layer: models, registries and the controller state machine.

pub mod adapter;
pub mod controller;
pub mod delegate;
pub mod discovery;
pub mod error;
pub mod gatt;
pub mod models;
pub mod rescan;
pub mod settings;
pub mod topology;
