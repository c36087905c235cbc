// SPDX-License-Identifier: GPL-3.0-only

//! Devicegraph and config builders for tests

use serde_json::Value;
use storage_types::{
    ByteRange, Config, Devicegraph, Disk, DiskKind, Filesystem, FilesystemType, LogicalVolume,
    Partition, PartitionId, PartitionTable, PtableType, ProductSettings, Sid, VolumeGroup,
};

/// Builds a devicegraph device by device
#[derive(Default)]
pub struct GraphBuilder {
    graph: Devicegraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Devicegraph::new(),
        }
    }

    pub fn disk(mut self, sid: Sid, name: &str, size: u64) -> Self {
        self.graph.disks.push(Disk::new(sid, name, size));
        self
    }

    pub fn dasd(mut self, sid: Sid, name: &str, size: u64) -> Self {
        let mut disk = Disk::new(sid, name, size);
        disk.kind = DiskKind::Dasd;
        self.graph.disks.push(disk);
        self
    }

    /// Puts an empty partition table on a disk
    pub fn table(mut self, disk: Sid, ptable_type: PtableType) -> Self {
        if let Some(disk) = self.graph.disks.iter_mut().find(|d| d.sid == disk) {
            disk.partition_table = Some(PartitionTable::new(ptable_type));
        }
        self
    }

    /// Puts a filesystem directly on a disk, without partition table
    pub fn formatted(mut self, disk: Sid, fs_type: FilesystemType) -> Self {
        if let Some(disk) = self.graph.disks.iter_mut().find(|d| d.sid == disk) {
            disk.partition_table = None;
            disk.filesystem = Some(Filesystem::new(fs_type));
        }
        self
    }

    /// Adds a partition at `start`; the disk gets a GPT when it has no table
    pub fn partition(
        mut self,
        disk: Sid,
        sid: Sid,
        start: u64,
        size: u64,
        fs_type: Option<FilesystemType>,
    ) -> Self {
        if let Some(disk) = self.graph.disks.iter_mut().find(|d| d.sid == disk) {
            let table = disk
                .partition_table
                .get_or_insert_with(|| PartitionTable::new(PtableType::Gpt));
            let number = table.next_number();
            table.partitions.push(Partition {
                sid,
                name: partition_name(&disk.name, number),
                number,
                region: ByteRange::new(start, start + size),
                id: match fs_type {
                    Some(FilesystemType::Swap) => PartitionId::Swap,
                    Some(FilesystemType::Ntfs) => PartitionId::WindowsBasicData,
                    _ => PartitionId::Linux,
                },
                filesystem: fs_type.map(Filesystem::new),
                encryption: None,
                resize_min: None,
            });
        }
        self
    }

    /// Lets an existing partition shrink down to `min`
    pub fn resizable(mut self, partition: Sid, min: u64) -> Self {
        if let Some(partition) = self.graph.partition_mut(partition) {
            partition.resize_min = Some(min);
        }
        self
    }

    pub fn partition_id(mut self, partition: Sid, id: PartitionId) -> Self {
        if let Some(partition) = self.graph.partition_mut(partition) {
            partition.id = id;
        }
        self
    }

    /// Volume group on the given physical volumes, with `(sid, name, size)`
    /// logical volumes
    pub fn volume_group(
        mut self,
        sid: Sid,
        name: &str,
        physical_volumes: &[&str],
        logical_volumes: &[(Sid, &str, u64)],
    ) -> Self {
        let size = physical_volumes
            .iter()
            .filter_map(|pv| self.graph.block_device_size(pv))
            .sum::<u64>();
        self.graph.volume_groups.push(VolumeGroup {
            sid,
            name: name.to_string(),
            extent_size: storage_types::DEFAULT_EXTENT_SIZE,
            physical_volumes: physical_volumes.iter().map(|pv| pv.to_string()).collect(),
            size,
            logical_volumes: logical_volumes
                .iter()
                .map(|(sid, lv_name, size)| LogicalVolume {
                    sid: *sid,
                    name: lv_name.to_string(),
                    vg_name: name.to_string(),
                    size: *size,
                    stripes: None,
                    filesystem: None,
                    encryption: None,
                })
                .collect(),
        });
        self
    }

    pub fn build(self) -> Devicegraph {
        self.graph
    }
}

/// "/dev/vda" + 1 → "/dev/vda1", "/dev/nvme0n1" + 1 → "/dev/nvme0n1p1"
pub fn partition_name(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Config read with the default product settings
pub fn config(json: Value) -> Config {
    match Config::from_json(&json, &ProductSettings::default()) {
        Ok(config) => config,
        Err(e) => panic!("invalid test config {json}: {e}"),
    }
}
