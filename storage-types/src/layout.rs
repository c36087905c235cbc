//! Layout export
//!
//! Flat, serialisable description of every device of a devicegraph, used to
//! hand the target layout of a proposal to front ends.

use serde::{Deserialize, Serialize};

use crate::devicegraph::{
    Devicegraph, DiskKind, Encryption, Filesystem, Partitionable, PtableType, Sid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceClass {
    Drive,
    Partition,
    VolumeGroup,
    LogicalVolume,
    MdRaid,
    Multipath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub sid: Sid,
    pub name: String,
    pub class: DeviceClass,
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<PartitionTableInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md: Option<MdInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipath: Option<MultipathInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionTableInfo {
    #[serde(rename = "type")]
    pub ptable_type: PtableType,

    /// Partition names
    pub partitions: Vec<String>,

    pub unused_slots: Vec<UnusedSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusedSlot {
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemInfo {
    #[serde(rename = "type")]
    pub fs_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    pub method: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdInfo {
    pub level: String,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipathInfo {
    pub wire_names: Vec<String>,
}

impl From<&Filesystem> for FilesystemInfo {
    fn from(fs: &Filesystem) -> Self {
        Self {
            fs_type: fs.fs_type.as_str().to_string(),
            mount_path: fs.mount_path.clone(),
            label: fs.label.clone(),
        }
    }
}

impl From<&Encryption> for EncryptionInfo {
    fn from(encryption: &Encryption) -> Self {
        Self {
            method: encryption.method.as_str().to_string(),
            device: encryption.device_path(),
        }
    }
}

/// Describes every device of `graph`: each partitionable device followed by
/// its partitions, then volume groups followed by their logical volumes
pub fn export_layout(graph: &Devicegraph) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for disk in &graph.disks {
        let (class, multipath) = match &disk.kind {
            DiskKind::Multipath { wires } => (
                DeviceClass::Multipath,
                Some(MultipathInfo {
                    wire_names: wires.clone(),
                }),
            ),
            DiskKind::Disk | DiskKind::Dasd => (DeviceClass::Drive, None),
        };
        devices.push(DeviceInfo {
            multipath,
            ..describe_partitionable(disk, class, disk.block_size)
        });
        push_partitions(&mut devices, disk, disk.block_size);
    }

    for md in &graph.md_raids {
        devices.push(DeviceInfo {
            md: Some(MdInfo {
                level: md.level.as_str().to_string(),
                devices: md.devices.clone(),
            }),
            ..describe_partitionable(md, DeviceClass::MdRaid, md.block_size)
        });
        push_partitions(&mut devices, md, md.block_size);
    }

    for vg in &graph.volume_groups {
        devices.push(DeviceInfo {
            sid: vg.sid,
            name: vg.device_path(),
            class: DeviceClass::VolumeGroup,
            size: vg.size,
            block_size: None,
            partition_table: None,
            filesystem: None,
            encryption: None,
            md: None,
            multipath: None,
        });
        for lv in &vg.logical_volumes {
            devices.push(DeviceInfo {
                sid: lv.sid,
                name: lv.device_path(),
                class: DeviceClass::LogicalVolume,
                size: lv.size,
                block_size: Some(512),
                partition_table: None,
                filesystem: lv.filesystem.as_ref().map(FilesystemInfo::from),
                encryption: lv.encryption.as_ref().map(EncryptionInfo::from),
                md: None,
                multipath: None,
            });
        }
    }

    devices
}

fn describe_partitionable(
    device: &dyn Partitionable,
    class: DeviceClass,
    block_size: u32,
) -> DeviceInfo {
    let partition_table = device.partition_table().map(|table| PartitionTableInfo {
        ptable_type: table.ptable_type,
        partitions: table.partitions.iter().map(|p| p.name.clone()).collect(),
        unused_slots: table
            .unused_slots(device.usable_region(table.ptable_type))
            .into_iter()
            .map(|slot| UnusedSlot {
                start: slot.start,
                size: slot.size(),
            })
            .collect(),
    });

    DeviceInfo {
        sid: device.sid(),
        name: device.name().to_string(),
        class,
        size: device.size(),
        block_size: Some(block_size),
        partition_table,
        filesystem: device.filesystem().map(FilesystemInfo::from),
        encryption: device.encryption().map(EncryptionInfo::from),
        md: None,
        multipath: None,
    }
}

fn push_partitions(devices: &mut Vec<DeviceInfo>, parent: &dyn Partitionable, block_size: u32) {
    for partition in parent.partitions() {
        devices.push(DeviceInfo {
            sid: partition.sid,
            name: partition.name.clone(),
            class: DeviceClass::Partition,
            size: partition.size(),
            block_size: Some(block_size),
            partition_table: None,
            filesystem: partition.filesystem.as_ref().map(FilesystemInfo::from),
            encryption: partition.encryption.as_ref().map(EncryptionInfo::from),
            md: None,
            multipath: None,
        });
    }
}
