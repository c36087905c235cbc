//! Device inventory ("devicegraph")
//!
//! A snapshot of every storage device known at a point in time and how the
//! devices relate to each other. Disks and MD RAIDs own their partition
//! tables; volume groups reference their physical volumes by device name.
//!
//! The proposal engine never mutates the probed inventory. Every run works on
//! its own clone.

mod block;
mod filesystem;
mod lvm;

pub use block::{
    Disk, DiskKind, MdLevel, MdRaid, Partition, PartitionId, PartitionTable, Partitionable,
    PtableType,
};
pub use filesystem::{
    Encryption, EncryptionMethod, Filesystem, FilesystemType, MountBy, PbkdFunction,
};
pub use lvm::{DEFAULT_EXTENT_SIZE, LogicalVolume, VolumeGroup};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Storage id: unique and stable identifier of a device inside a devicegraph
pub type Sid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Disk,
    MdRaid,
    Partition,
    VolumeGroup,
    LogicalVolume,
}

/// Mutable view on the content layers of a block device
pub struct ContentMut<'a> {
    pub filesystem: &'a mut Option<Filesystem>,
    pub encryption: &'a mut Option<Encryption>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Devicegraph {
    #[serde(default)]
    pub disks: Vec<Disk>,

    #[serde(default)]
    pub md_raids: Vec<MdRaid>,

    #[serde(default)]
    pub volume_groups: Vec<VolumeGroup>,

    #[serde(skip)]
    next_sid: Sid,
}

impl Devicegraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Reserve a fresh sid, never handed out before in this graph
    pub fn allocate_sid(&mut self) -> Sid {
        let max = self.all_sids().into_iter().max().unwrap_or(0);
        let sid = self.next_sid.max(max + 1);
        self.next_sid = sid + 1;
        sid
    }

    pub fn all_sids(&self) -> Vec<Sid> {
        let mut sids = Vec::new();
        for device in self.partitionables() {
            sids.push(device.sid());
            sids.extend(device.partitions().iter().map(|p| p.sid));
        }
        for vg in &self.volume_groups {
            sids.push(vg.sid);
            sids.extend(vg.logical_volumes.iter().map(|lv| lv.sid));
        }
        sids
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.kind_of(sid).is_some()
    }

    pub fn kind_of(&self, sid: Sid) -> Option<DeviceKind> {
        if self.disks.iter().any(|d| d.sid == sid) {
            return Some(DeviceKind::Disk);
        }
        if self.md_raids.iter().any(|md| md.sid == sid) {
            return Some(DeviceKind::MdRaid);
        }
        if self.partition(sid).is_some() {
            return Some(DeviceKind::Partition);
        }
        if self.volume_groups.iter().any(|vg| vg.sid == sid) {
            return Some(DeviceKind::VolumeGroup);
        }
        if self.logical_volume(sid).is_some() {
            return Some(DeviceKind::LogicalVolume);
        }
        None
    }

    /// Disks first, then MD RAIDs, in inventory order
    pub fn partitionables(&self) -> impl Iterator<Item = &dyn Partitionable> {
        self.disks
            .iter()
            .map(|disk| disk as &dyn Partitionable)
            .chain(self.md_raids.iter().map(|md| md as &dyn Partitionable))
    }

    pub fn partitionable(&self, sid: Sid) -> Option<&dyn Partitionable> {
        self.partitionables().find(|device| device.sid() == sid)
    }

    pub fn partitionable_mut(&mut self, sid: Sid) -> Option<&mut dyn Partitionable> {
        if let Some(disk) = self.disks.iter_mut().find(|d| d.sid == sid) {
            return Some(disk);
        }
        self.md_raids
            .iter_mut()
            .find(|md| md.sid == sid)
            .map(|md| md as &mut dyn Partitionable)
    }

    pub fn partition(&self, sid: Sid) -> Option<&Partition> {
        self.partitionables()
            .flat_map(|device| device.partitions().iter())
            .find(|partition| partition.sid == sid)
    }

    pub fn partition_mut(&mut self, sid: Sid) -> Option<&mut Partition> {
        let parent = self.partition_parent(sid)?;
        self.partitionable_mut(parent)?
            .partition_table_mut()?
            .partitions
            .iter_mut()
            .find(|partition| partition.sid == sid)
    }

    pub fn partition_parent(&self, sid: Sid) -> Option<Sid> {
        self.partitionables()
            .find(|device| device.partitions().iter().any(|p| p.sid == sid))
            .map(|device| device.sid())
    }

    pub fn remove_partition(&mut self, sid: Sid) -> Option<Partition> {
        let parent = self.partition_parent(sid)?;
        let table = self.partitionable_mut(parent)?.partition_table_mut()?;
        let index = table.partitions.iter().position(|p| p.sid == sid)?;
        Some(table.partitions.remove(index))
    }

    pub fn volume_group(&self, sid: Sid) -> Option<&VolumeGroup> {
        self.volume_groups.iter().find(|vg| vg.sid == sid)
    }

    pub fn volume_group_by_name(&self, name: &str) -> Option<&VolumeGroup> {
        let name = name.strip_prefix("/dev/").unwrap_or(name);
        self.volume_groups.iter().find(|vg| vg.name == name)
    }

    /// Volume group having `device` as physical volume
    pub fn volume_group_on(&self, device: &str) -> Option<&VolumeGroup> {
        self.volume_groups.iter().find(|vg| vg.uses_device(device))
    }

    pub fn remove_volume_group(&mut self, sid: Sid) -> Option<VolumeGroup> {
        let index = self.volume_groups.iter().position(|vg| vg.sid == sid)?;
        Some(self.volume_groups.remove(index))
    }

    pub fn logical_volume(&self, sid: Sid) -> Option<&LogicalVolume> {
        self.volume_groups
            .iter()
            .flat_map(|vg| vg.logical_volumes.iter())
            .find(|lv| lv.sid == sid)
    }

    /// MD RAID having `device` as member
    pub fn md_raid_on(&self, device: &str) -> Option<&MdRaid> {
        self.md_raids
            .iter()
            .find(|md| md.devices.iter().any(|member| member == device))
    }

    pub fn device_name(&self, sid: Sid) -> Option<String> {
        if let Some(device) = self.partitionable(sid) {
            return Some(device.name().to_string());
        }
        if let Some(partition) = self.partition(sid) {
            return Some(partition.name.clone());
        }
        if let Some(vg) = self.volume_group(sid) {
            return Some(vg.device_path());
        }
        self.logical_volume(sid).map(LogicalVolume::device_path)
    }

    /// Sid of the device with the given kernel name (e.g., "/dev/sda1")
    pub fn find_by_name(&self, name: &str) -> Option<Sid> {
        self.all_sids()
            .into_iter()
            .find(|sid| self.device_name(*sid).as_deref() == Some(name))
    }

    /// Size of a block device given its name, including opened LUKS devices
    pub fn block_device_size(&self, name: &str) -> Option<u64> {
        for device in self.partitionables() {
            if device.name() == name || encrypted_as(device.encryption(), name) {
                return Some(device.size());
            }
            for partition in device.partitions() {
                if partition.name == name || encrypted_as(partition.encryption.as_ref(), name) {
                    return Some(partition.size());
                }
            }
        }
        self.volume_groups
            .iter()
            .flat_map(|vg| vg.logical_volumes.iter())
            .find(|lv| lv.device_path() == name)
            .map(|lv| lv.size)
    }

    /// Content layers of a disk, MD RAID, partition or logical volume
    pub fn content_mut(&mut self, sid: Sid) -> Option<ContentMut<'_>> {
        match self.kind_of(sid)? {
            DeviceKind::Disk => {
                let disk = self.disks.iter_mut().find(|d| d.sid == sid)?;
                Some(ContentMut {
                    filesystem: &mut disk.filesystem,
                    encryption: &mut disk.encryption,
                })
            }
            DeviceKind::MdRaid => {
                let md = self.md_raids.iter_mut().find(|md| md.sid == sid)?;
                Some(ContentMut {
                    filesystem: &mut md.filesystem,
                    encryption: &mut md.encryption,
                })
            }
            DeviceKind::Partition => {
                let partition = self.partition_mut(sid)?;
                Some(ContentMut {
                    filesystem: &mut partition.filesystem,
                    encryption: &mut partition.encryption,
                })
            }
            DeviceKind::LogicalVolume => self
                .volume_groups
                .iter_mut()
                .flat_map(|vg| vg.logical_volumes.iter_mut())
                .find(|lv| lv.sid == sid)
                .map(|lv| ContentMut {
                    filesystem: &mut lv.filesystem,
                    encryption: &mut lv.encryption,
                }),
            DeviceKind::VolumeGroup => None,
        }
    }

    /// Devices that disappear together with `sid`: partitions of a
    /// partitionable device, plus volume groups and MD RAIDs built on any of
    /// them (transitively), including their own partitions and volumes.
    pub fn dependents(&self, sid: Sid) -> Vec<Sid> {
        let mut result = Vec::new();
        let mut pending = vec![sid];

        while let Some(current) = pending.pop() {
            let mut names = Vec::new();
            if let Some(device) = self.partitionable(current) {
                names.push(device.name().to_string());
                if let Some(encryption) = device.encryption() {
                    names.push(encryption.device_path());
                }
                for partition in device.partitions() {
                    if !result.contains(&partition.sid) {
                        result.push(partition.sid);
                        pending.push(partition.sid);
                    }
                }
            }
            if let Some(partition) = self.partition(current) {
                names.push(partition.name.clone());
                names.push(partition.content_name());
            }

            for name in names {
                if let Some(vg) = self.volume_group_on(&name)
                    && !result.contains(&vg.sid)
                {
                    result.push(vg.sid);
                    result.extend(vg.logical_volumes.iter().map(|lv| lv.sid));
                }
                if let Some(md) = self.md_raid_on(&name)
                    && !result.contains(&md.sid)
                {
                    result.push(md.sid);
                    pending.push(md.sid);
                }
            }
        }

        result
    }

    /// (mount path, device name) of every mounted filesystem
    pub fn mount_points(&self) -> Vec<(String, String)> {
        let mut mounts = Vec::new();
        let mut push = |fs: Option<&Filesystem>, name: String| {
            if let Some(path) = fs.and_then(|fs| fs.mount_path.clone()) {
                mounts.push((path, name));
            }
        };

        for device in self.partitionables() {
            push(device.filesystem(), device.name().to_string());
            for partition in device.partitions() {
                push(partition.filesystem.as_ref(), partition.name.clone());
            }
        }
        for lv in self.volume_groups.iter().flat_map(|vg| &vg.logical_volumes) {
            push(lv.filesystem.as_ref(), lv.device_path());
        }
        mounts
    }
}

fn encrypted_as(encryption: Option<&Encryption>, name: &str) -> bool {
    encryption.is_some_and(|encryption| encryption.device_path() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ByteRange, GIB, MIB};

    fn graph() -> Devicegraph {
        let mut disk = Disk::new(1, "/dev/sda", 100 * GIB);
        let mut table = PartitionTable::new(PtableType::Gpt);
        table.partitions.push(Partition {
            sid: 2,
            name: "/dev/sda1".to_string(),
            number: 1,
            region: ByteRange::new(MIB, 50 * GIB),
            id: PartitionId::Lvm,
            filesystem: None,
            encryption: None,
            resize_min: None,
        });
        disk.partition_table = Some(table);

        Devicegraph {
            disks: vec![disk, Disk::new(3, "/dev/sdb", 10 * GIB)],
            md_raids: Vec::new(),
            volume_groups: vec![VolumeGroup {
                sid: 4,
                name: "data".to_string(),
                extent_size: DEFAULT_EXTENT_SIZE,
                physical_volumes: vec!["/dev/sda1".to_string()],
                size: 49 * GIB,
                logical_volumes: vec![LogicalVolume {
                    sid: 5,
                    name: "home".to_string(),
                    vg_name: "data".to_string(),
                    size: 20 * GIB,
                    stripes: None,
                    filesystem: None,
                    encryption: None,
                }],
            }],
            next_sid: 0,
        }
    }

    #[test]
    fn finds_devices_by_name_and_kind() {
        let graph = graph();
        assert_eq!(graph.find_by_name("/dev/sda1"), Some(2));
        assert_eq!(graph.find_by_name("/dev/data/home"), Some(5));
        assert_eq!(graph.kind_of(4), Some(DeviceKind::VolumeGroup));
        assert_eq!(graph.partition_parent(2), Some(1));
        assert_eq!(graph.block_device_size("/dev/sdb"), Some(10 * GIB));
    }

    #[test]
    fn allocated_sids_are_fresh() {
        let mut graph = graph();
        let first = graph.allocate_sid();
        let second = graph.allocate_sid();
        assert!(first > 5);
        assert_ne!(first, second);
        assert!(!graph.contains(first));
    }

    #[test]
    fn removing_a_pv_partition_takes_its_volume_group_along() {
        let graph = graph();
        let dependents = graph.dependents(1);
        assert!(dependents.contains(&2));
        assert!(dependents.contains(&4));
        assert!(dependents.contains(&5));
        assert!(graph.dependents(3).is_empty());
    }

    #[test]
    fn inventory_loads_from_json() {
        let raw = r#"{
            "disks": [
                { "sid": 1, "name": "/dev/vda", "size": 21474836480 }
            ]
        }"#;
        let graph = Devicegraph::from_json_str(raw).unwrap();
        assert_eq!(graph.disks.len(), 1);
        assert_eq!(graph.disks[0].block_size, 512);
        assert_eq!(graph.disks[0].kind, DiskKind::Disk);
    }
}
