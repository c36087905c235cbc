// SPDX-License-Identifier: GPL-3.0-only

//! zFCP controllers and LUNs through the s390-tools helpers

use std::path::{Path, PathBuf};
use std::sync::Arc;

use storage_contracts::{ActivationEvent, ActivationManager, EventBus};
use storage_types::{ZfcpController, ZfcpDisk};
use tracing::{info, warn};

use crate::activation::DeviceSnapshot;
use crate::error::Result;
use crate::system::System;

pub const LSCSS: &str = "lscss";
pub const LSZFCP: &str = "lszfcp";
pub const ZFCP_HOST_CONFIGURE: &str = "zfcp_host_configure";
pub const ZFCP_DISK_CONFIGURE: &str = "zfcp_disk_configure";
pub const ZFCP_SAN_DISC: &str = "zfcp_san_disc";

const LUN_SCAN_PARAMETER: &str = "/sys/module/zfcp/parameters/allow_lun_scan";

/// Device types of FCP channels
const FCP_DEVICE_TYPES: &str = "1732/03,1732/04";

pub struct ZfcpManager {
    system: Arc<dyn System>,
    controllers: DeviceSnapshot<ZfcpController>,
    disks: DeviceSnapshot<ZfcpDisk>,
}

impl ZfcpManager {
    pub fn new(system: Arc<dyn System>) -> Self {
        Self {
            system,
            controllers: DeviceSnapshot::new(),
            disks: DeviceSnapshot::new(),
        }
    }

    pub fn controllers(&self) -> &[ZfcpController] {
        self.controllers.devices()
    }

    pub fn controller_events(&self) -> &EventBus<ActivationEvent<ZfcpController>> {
        self.controllers.events()
    }

    /// Whether the kernel scans LUNs of activated controllers on its own
    pub fn allow_lun_scan(&self) -> bool {
        self.system
            .read_file(Path::new(LUN_SCAN_PARAMETER))
            .is_ok_and(|value| value.trim() == "Y")
    }

    pub fn activate_controller(&mut self, channel: &str) -> bool {
        let success = self.configure(ZFCP_HOST_CONFIGURE, &[channel, "1"]);
        if success {
            info!("activated zFCP controller {channel}");
            self.refresh_controllers();
            self.refresh_disks();
        }
        success
    }

    /// WWPNs reachable through an active controller
    pub fn find_wwpns(&self, channel: &str) -> Vec<String> {
        self.san_discovery(&["-b", channel, "-W"])
    }

    pub fn find_luns(&self, channel: &str, wwpn: &str) -> Vec<String> {
        self.san_discovery(&["-b", channel, "-p", wwpn, "-L"])
    }

    pub fn activate_disk(&mut self, channel: &str, wwpn: &str, lun: &str) -> bool {
        self.configure_disk(channel, wwpn, lun, true)
    }

    pub fn deactivate_disk(&mut self, channel: &str, wwpn: &str, lun: &str) -> bool {
        self.configure_disk(channel, wwpn, lun, false)
    }

    fn configure_disk(&mut self, channel: &str, wwpn: &str, lun: &str, online: bool) -> bool {
        let state = if online { "1" } else { "0" };
        let success = self.configure(ZFCP_DISK_CONFIGURE, &[channel, wwpn, lun, state]);
        if success {
            let state = if online { "active" } else { "inactive" };
            info!("zFCP disk {channel}:{wwpn}:{lun} is now {state}");
            self.refresh_disks();
        }
        success
    }

    fn configure(&self, program: &str, args: &[&str]) -> bool {
        match self.system.run(program, args) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!("{program} exited with {}: {}", output.code, output.stderr.trim());
                false
            }
            Err(e) => {
                warn!("{program}: {e}");
                false
            }
        }
    }

    fn san_discovery(&self, args: &[&str]) -> Vec<String> {
        match self.system.run(ZFCP_SAN_DISC, args) {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| line.starts_with("0x"))
                .map(str::to_string)
                .collect(),
            Ok(output) => {
                warn!("{ZFCP_SAN_DISC} exited with {}", output.code);
                Vec::new()
            }
            Err(e) => {
                warn!("{ZFCP_SAN_DISC}: {e}");
                Vec::new()
            }
        }
    }

    fn refresh_controllers(&mut self) {
        match self.read_controllers() {
            Ok(controllers) => {
                self.controllers.refreshed(controllers);
            }
            Err(e) => warn!("could not read zFCP controllers: {e}"),
        }
    }

    fn refresh_disks(&mut self) {
        match self.read_disks() {
            Ok(disks) => {
                self.disks.refreshed(disks);
            }
            Err(e) => warn!("could not read zFCP disks: {e}"),
        }
    }

    fn read_controllers(&self) -> Result<Vec<ZfcpController>> {
        let channels = self
            .system
            .run(LSCSS, &["-t", FCP_DEVICE_TYPES])?
            .check(LSCSS)?;
        // lszfcp fails when no controller is online
        let active = self
            .system
            .run(LSZFCP, &["-H"])
            .map(|output| output.stdout)
            .unwrap_or_default();
        let lun_scan = self.allow_lun_scan();

        let active = parse_active_channels(&active);
        Ok(parse_lscss(&channels.stdout)
            .into_iter()
            .map(|channel| ZfcpController {
                active: active.contains(&channel),
                lun_scan,
                channel,
            })
            .collect())
    }

    fn read_disks(&self) -> Result<Vec<ZfcpDisk>> {
        let output = self.system.run(LSZFCP, &["-D"])?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(parse_lszfcp_disks(&output.stdout)
            .into_iter()
            .filter_map(|(channel, wwpn, lun, scsi_id)| {
                let block = PathBuf::from(format!("/sys/bus/scsi/devices/{scsi_id}/block"));
                let name = self.system.list_dir(&block).ok()?.into_iter().next()?;
                Some(ZfcpDisk {
                    name: format!("/dev/{name}"),
                    channel,
                    wwpn,
                    lun,
                })
            })
            .collect())
    }
}

impl ActivationManager for ZfcpManager {
    type Device = ZfcpDisk;

    fn probe(&mut self) -> bool {
        let controllers = match self.read_controllers() {
            Ok(controllers) => controllers,
            Err(e) => {
                warn!("could not probe zFCP controllers: {e}");
                return false;
            }
        };
        let disks = match self.read_disks() {
            Ok(disks) => disks,
            Err(e) => {
                warn!("could not probe zFCP disks: {e}");
                return false;
            }
        };
        info!(
            "found {} zFCP controllers and {} disks",
            controllers.len(),
            disks.len()
        );
        self.controllers.probed(controllers);
        self.disks.probed(disks);
        true
    }

    fn is_probed(&self) -> bool {
        self.disks.is_probed()
    }

    fn devices(&self) -> &[ZfcpDisk] {
        self.disks.devices()
    }

    fn events(&self) -> &EventBus<ActivationEvent<ZfcpDisk>> {
        self.disks.events()
    }
}

/// Channel bus ids listed by `lscss`
pub fn parse_lscss(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|id| id.starts_with("0.") && id.matches('.').count() == 2)
        .map(str::to_string)
        .collect()
}

/// Channels listed by `lszfcp -H` (`<channel> <host>`)
pub fn parse_active_channels(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `(channel, wwpn, lun, scsi id)` of each line of `lszfcp -D`
pub fn parse_lszfcp_disks(output: &str) -> Vec<(String, String, String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let path = fields.next()?;
            let scsi_id = fields.next()?;
            let mut parts = path.split('/');
            let channel = parts.next()?;
            let wwpn = parts.next()?;
            let lun = parts.next()?;
            Some((
                channel.to_string(),
                wwpn.to_string(),
                lun.to_string(),
                scsi_id.to_string(),
            ))
        })
        .collect()
}
