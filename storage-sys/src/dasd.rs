// SPDX-License-Identifier: GPL-3.0-only

//! s390 DASD activation through `lsdasd` and `dasd_configure`

use std::path::PathBuf;
use std::sync::Arc;

use storage_contracts::{ActivationEvent, ActivationManager, EventBus};
use storage_types::{ActivationSettings, DasdDevice};
use tracing::{info, warn};

use crate::activation::{BatchResult, DeviceSnapshot};
use crate::dasd_format::FormatJob;
use crate::system::System;

pub const LSDASD: &str = "lsdasd";
pub const DASD_CONFIGURE: &str = "dasd_configure";

/// `dasd_configure` exit code for a device that is online but has no
/// low-level format
const EXIT_UNFORMATTED: i32 = 8;

pub struct DasdManager {
    system: Arc<dyn System>,
    settings: ActivationSettings,
    snapshot: DeviceSnapshot<DasdDevice>,
}

impl DasdManager {
    pub fn new(system: Arc<dyn System>, settings: ActivationSettings) -> Self {
        Self {
            system,
            settings,
            snapshot: DeviceSnapshot::new(),
        }
    }

    pub fn settings(&self) -> &ActivationSettings {
        &self.settings
    }

    pub fn find(&self, id: &str) -> Option<&DasdDevice> {
        self.snapshot.devices().iter().find(|device| device.id == id)
    }

    pub fn enable(&mut self, ids: &[&str]) -> bool {
        self.configure(ids, |_| (true, None))
    }

    pub fn disable(&mut self, ids: &[&str]) -> bool {
        self.configure(ids, |_| (false, None))
    }

    /// Switches DIAG access on or off, keeping each device online or offline
    pub fn set_diag(&mut self, ids: &[&str], diag: bool) -> bool {
        let enabled: Vec<(String, bool)> = self
            .snapshot
            .devices()
            .iter()
            .map(|device| (device.id.clone(), device.enabled))
            .collect();
        self.configure(ids, |id| {
            let online = enabled
                .iter()
                .find(|(known, _)| known == id)
                .is_some_and(|(_, enabled)| *enabled);
            (online, Some(diag))
        })
    }

    /// Prepares a format job for the enabled, formattable devices among `ids`.
    /// Returns `None` when none of them qualifies.
    pub fn format(&self, ids: &[&str]) -> Option<FormatJob> {
        let devices: Vec<DasdDevice> = ids
            .iter()
            .filter_map(|id| {
                let device = self.find(id);
                if !device.is_some_and(DasdDevice::is_formattable) {
                    warn!("DASD {id} cannot be formatted");
                }
                device
            })
            .filter(|device| device.is_formattable())
            .cloned()
            .collect();
        if devices.is_empty() {
            return None;
        }
        Some(FormatJob::new(
            Arc::clone(&self.system),
            devices,
            &self.settings,
        ))
    }

    /// Formats `ids` and waits for the result, refreshing the devices after
    pub fn format_and_wait(&mut self, ids: &[&str]) -> bool {
        let Some(mut job) = self.format(ids) else {
            return false;
        };
        let success = job.run_to_completion();
        self.refresh();
        success
    }

    fn configure(&mut self, ids: &[&str], mode: impl Fn(&str) -> (bool, Option<bool>)) -> bool {
        let mut batch = BatchResult::default();
        for id in ids {
            let (online, diag) = mode(id);
            let mut args = vec![*id, if online { "1" } else { "0" }];
            if let Some(diag) = diag {
                args.push(if diag { "1" } else { "0" });
            }
            let success = match self.system.run(DASD_CONFIGURE, &args) {
                Ok(output) => output.success() || (online && output.code == EXIT_UNFORMATTED),
                Err(e) => {
                    warn!("{DASD_CONFIGURE} {id}: {e}");
                    false
                }
            };
            if !success {
                warn!("could not configure DASD {id}");
            }
            batch.record(*id, success);
        }
        if batch.any_success() {
            self.refresh();
        }
        batch.success()
    }

    fn refresh(&mut self) {
        if let Some(devices) = self.read_devices() {
            self.snapshot.refreshed(devices);
        }
    }

    fn read_devices(&self) -> Option<Vec<DasdDevice>> {
        let output = match self.system.run(LSDASD, &["-a"]) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!("{LSDASD} failed: {}", output.stderr.trim());
                return None;
            }
            Err(e) => {
                warn!("{LSDASD}: {e}");
                return None;
            }
        };
        let mut devices = parse_lsdasd(&output.stdout);
        for device in devices.iter_mut() {
            let path = PathBuf::from(format!("/sys/bus/ccw/devices/{}/use_diag", device.id));
            device.diag = self
                .system
                .read_file(&path)
                .is_ok_and(|value| value.trim() == "1");
        }
        Some(devices)
    }
}

impl ActivationManager for DasdManager {
    type Device = DasdDevice;

    fn probe(&mut self) -> bool {
        let Some(devices) = self.read_devices() else {
            return false;
        };
        info!("found {} DASDs", devices.len());
        self.snapshot.probed(devices);
        true
    }

    fn is_probed(&self) -> bool {
        self.snapshot.is_probed()
    }

    fn devices(&self) -> &[DasdDevice] {
        self.snapshot.devices()
    }

    fn events(&self) -> &EventBus<ActivationEvent<DasdDevice>> {
        self.snapshot.events()
    }
}

/// Parses the table printed by `lsdasd -a`
pub fn parse_lsdasd(output: &str) -> Vec<DasdDevice> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let id = *fields.first()?;
            if !is_bus_id(id) {
                return None;
            }
            let status = fields.get(1).copied().unwrap_or("offline");
            let mut device = DasdDevice::new(id);
            device.enabled = status != "offline";
            device.formatted = status.starts_with("active");
            if device.enabled {
                device.device_name = fields.get(2).map(|name| name.to_string());
                device.device_type = fields.get(4).map(|kind| kind.to_string());
                device.access_type =
                    Some(if status.contains("(ro)") { "ro" } else { "rw" }.to_string());
            }
            Some(device)
        })
        .collect()
}

fn is_bus_id(text: &str) -> bool {
    let parts: Vec<&str> = text.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_hexdigit()))
}
