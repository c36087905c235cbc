// SPDX-License-Identifier: GPL-3.0-only

//! Device snapshots shared by the activation managers

use std::collections::BTreeMap;

use storage_contracts::{ActivationEvent, EventBus};
use tracing::debug;

/// Last known snapshot of a manager plus the bus its events go to
pub struct DeviceSnapshot<T> {
    devices: Vec<T>,
    probed: bool,
    events: EventBus<ActivationEvent<T>>,
}

impl<T: Clone + PartialEq> Default for DeviceSnapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> DeviceSnapshot<T> {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            probed: false,
            events: EventBus::new(),
        }
    }

    pub fn devices(&self) -> &[T] {
        &self.devices
    }

    pub fn is_probed(&self) -> bool {
        self.probed
    }

    pub fn events(&self) -> &EventBus<ActivationEvent<T>> {
        &self.events
    }

    /// Stores the result of an explicit probe
    pub fn probed(&mut self, devices: Vec<T>) {
        self.devices = devices;
        self.probed = true;
        self.events.publish(ActivationEvent::Probed(self.devices.clone()));
    }

    /// Stores the snapshot read after an action. Returns whether it changed.
    pub fn refreshed(&mut self, devices: Vec<T>) -> bool {
        let changed = devices != self.devices;
        self.devices = devices;
        self.probed = true;
        self.events
            .publish(ActivationEvent::Refreshed(self.devices.clone()));
        if changed {
            debug!("device snapshot changed ({} devices)", self.devices.len());
            self.events.publish(ActivationEvent::Changed(self.devices.clone()));
        }
        changed
    }
}

/// Per-device outcome of a batch action
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchResult {
    pub results: BTreeMap<String, bool>,
}

impl BatchResult {
    pub fn record(&mut self, device: impl Into<String>, success: bool) {
        self.results.insert(device.into(), success);
    }

    /// Logical AND of every outcome
    pub fn success(&self) -> bool {
        self.results.values().all(|ok| *ok)
    }

    pub fn any_success(&self) -> bool {
        self.results.values().any(|ok| *ok)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(device, _)| device.as_str())
            .collect()
    }
}
