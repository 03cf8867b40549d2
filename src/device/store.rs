//! In-memory device state store
//!
//! Holds one [`DeviceState`] per device id for the lifetime of the process.
//! Every read hands out a clone; the backing map never leaves this module.
//! Entries are never evicted.

use super::state::DeviceState;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct DeviceStateStore {
    devices: RwLock<HashMap<String, DeviceState>>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `device_id`, creating a default one if the device is unknown.
    ///
    /// Lookup and insert happen under one write lock, so concurrent first calls for the
    /// same id all observe the same created state.
    pub fn get_or_create(&self, device_id: &str) -> DeviceState {
        if let Some(state) = self.devices.read().get(device_id) {
            return state.clone();
        }

        let mut devices = self.devices.write();
        devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                info!("Creating new streetlight state for id: {}", device_id);
                DeviceState::new(device_id)
            })
            .clone()
    }

    /// Replaces the stored state for `device_id`
    pub fn put(&self, device_id: &str, state: DeviceState) {
        debug!("Storing state {}", state);
        self.devices.write().insert(device_id.to_string(), state);
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.devices.read().get(device_id).cloned()
    }

    /// Point-in-time copy of every known device
    pub fn snapshot_all(&self) -> HashMap<String, DeviceState> {
        self.devices.read().clone()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
