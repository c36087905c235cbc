//! LVM (Logical Volume Manager) types
//!
//! Volume groups and their logical volumes inside the device inventory.

use serde::{Deserialize, Serialize};

use super::Sid;
use super::filesystem::{Encryption, Filesystem};

/// Default physical extent size (4 MiB)
pub const DEFAULT_EXTENT_SIZE: u64 = 4 * 1024 * 1024;

/// Volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub sid: Sid,

    /// Volume group name (without "/dev/")
    pub name: String,

    #[serde(default = "default_extent_size")]
    pub extent_size: u64,

    /// Device names of the physical volumes
    pub physical_volumes: Vec<String>,

    /// Total size in bytes
    pub size: u64,

    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolume>,
}

fn default_extent_size() -> u64 {
    DEFAULT_EXTENT_SIZE
}

impl VolumeGroup {
    /// Device path of the volume group (e.g., "/dev/system")
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    /// Get used space in bytes
    pub fn used(&self) -> u64 {
        self.logical_volumes.iter().map(|lv| lv.size).sum()
    }

    /// Free space in bytes
    pub fn free(&self) -> u64 {
        self.size.saturating_sub(self.used())
    }

    /// Get usage percentage (0-100)
    pub fn usage_percent(&self) -> u32 {
        if self.size == 0 {
            0
        } else {
            ((self.used() as f64 / self.size as f64) * 100.0) as u32
        }
    }

    /// Usable size of a volume group built on physical volumes of the given
    /// sizes: one extent per PV is kept for metadata, the rest is rounded
    /// down to whole extents.
    pub fn usable_size(extent_size: u64, pv_sizes: &[u64]) -> u64 {
        pv_sizes
            .iter()
            .map(|size| (size / extent_size).saturating_sub(1) * extent_size)
            .sum()
    }

    pub fn uses_device(&self, device: &str) -> bool {
        self.physical_volumes.iter().any(|pv| pv == device)
    }
}

/// Logical volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub sid: Sid,

    /// Logical volume name (without the volume group)
    pub name: String,

    /// Parent volume group name
    pub vg_name: String,

    /// Size in bytes
    pub size: u64,

    #[serde(default)]
    pub stripes: Option<u32>,

    #[serde(default)]
    pub filesystem: Option<Filesystem>,

    #[serde(default)]
    pub encryption: Option<Encryption>,
}

impl LogicalVolume {
    /// Device path (e.g., "/dev/system/root")
    pub fn device_path(&self) -> String {
        format!("/dev/{}/{}", self.vg_name, self.name)
    }

    /// Get a display name for this logical volume
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GIB;

    #[test]
    fn usable_size_keeps_one_extent_per_pv() {
        let size = VolumeGroup::usable_size(DEFAULT_EXTENT_SIZE, &[GIB, GIB]);
        assert_eq!(size, 2 * (GIB - DEFAULT_EXTENT_SIZE));
    }

    #[test]
    fn free_space_accounts_for_logical_volumes() {
        let vg = VolumeGroup {
            sid: 10,
            name: "system".to_string(),
            extent_size: DEFAULT_EXTENT_SIZE,
            physical_volumes: vec!["/dev/sda2".to_string()],
            size: 10 * GIB,
            logical_volumes: vec![LogicalVolume {
                sid: 11,
                name: "root".to_string(),
                vg_name: "system".to_string(),
                size: 4 * GIB,
                stripes: None,
                filesystem: None,
                encryption: None,
            }],
        };

        assert_eq!(vg.free(), 6 * GIB);
        assert_eq!(vg.usage_percent(), 40);
        assert_eq!(vg.logical_volumes[0].device_path(), "/dev/system/root");
        assert!(vg.uses_device("/dev/sda2"));
    }
}
