//! Streetlight device model
//!
//! - [`state`] - the per-device state record and the [`DimLevel`] range type
//! - [`store`] - the concurrency-safe map from device id to state

pub mod state;
pub mod store;

pub use state::{DeviceState, DimLevel};
pub use store::DeviceStateStore;
