//! Partitionable block devices: disks, MD RAIDs and their partition tables

use serde::{Deserialize, Serialize};

use super::Sid;
use super::filesystem::{Encryption, Filesystem};
use crate::common::{ByteRange, GPT_ALIGNMENT_BYTES};

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PtableType {
    /// GPT (GUID Partition Table)
    Gpt,

    /// MBR/DOS (Master Boot Record)
    Msdos,

    /// s390 DASD volume table of contents
    Dasd,
}

impl PtableType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
            Self::Dasd => "dasd",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gpt" => Some(Self::Gpt),
            "msdos" | "dos" | "mbr" => Some(Self::Msdos),
            "dasd" => Some(Self::Dasd),
            _ => None,
        }
    }

    /// Maximum number of partitions (primary only for msdos)
    pub fn max_partitions(self) -> usize {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
            Self::Dasd => 3,
        }
    }

    /// Bytes reserved at the end of the device (GPT backup header)
    pub fn reserved_tail(self) -> u64 {
        match self {
            Self::Gpt => GPT_ALIGNMENT_BYTES,
            Self::Msdos | Self::Dasd => 0,
        }
    }
}

/// Partition id (type code) of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionId {
    Linux,
    Swap,
    Lvm,
    Raid,
    Esp,
    BiosBoot,
    Prep,
    WindowsBasicData,
}

impl PartitionId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Swap => "swap",
            Self::Lvm => "lvm",
            Self::Raid => "raid",
            Self::Esp => "esp",
            Self::BiosBoot => "bios_boot",
            Self::Prep => "prep",
            Self::WindowsBasicData => "windows_basic_data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linux" => Some(Self::Linux),
            "swap" => Some(Self::Swap),
            "lvm" => Some(Self::Lvm),
            "raid" => Some(Self::Raid),
            "esp" => Some(Self::Esp),
            "bios_boot" => Some(Self::BiosBoot),
            "prep" => Some(Self::Prep),
            "windows_basic_data" => Some(Self::WindowsBasicData),
            _ => None,
        }
    }
}

/// Existing or newly created partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub sid: Sid,

    /// Device path (e.g., "/dev/sda1")
    pub name: String,

    /// Partition number (1-based)
    pub number: u32,

    pub region: ByteRange,

    pub id: PartitionId,

    #[serde(default)]
    pub filesystem: Option<Filesystem>,

    #[serde(default)]
    pub encryption: Option<Encryption>,

    /// Smallest size the partition can be shrunk to, if it can be shrunk at all
    #[serde(default)]
    pub resize_min: Option<u64>,
}

impl Partition {
    pub fn size(&self) -> u64 {
        self.region.size()
    }

    /// Name of the device holding the content (the LUKS device when encrypted)
    pub fn content_name(&self) -> String {
        match &self.encryption {
            Some(encryption) => encryption.device_path(),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    pub ptable_type: PtableType,

    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn new(ptable_type: PtableType) -> Self {
        Self {
            ptable_type,
            partitions: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.partitions.len() >= self.ptable_type.max_partitions()
    }

    /// Aligned gaps between partitions inside `usable`, at least 1 MiB each
    pub fn unused_slots(&self, usable: ByteRange) -> Vec<ByteRange> {
        if self.is_full() {
            return Vec::new();
        }

        let mut regions: Vec<ByteRange> = self.partitions.iter().map(|p| p.region).collect();
        regions.sort_by_key(|region| region.start);

        let mut slots = Vec::new();
        let mut cursor = usable.start;
        for region in regions {
            if region.start > cursor {
                slots.push(ByteRange::new(cursor, region.start.min(usable.end)).aligned());
            }
            cursor = cursor.max(region.end);
        }
        if cursor < usable.end {
            slots.push(ByteRange::new(cursor, usable.end).aligned());
        }

        slots
            .into_iter()
            .filter(|slot| slot.size() >= GPT_ALIGNMENT_BYTES)
            .collect()
    }

    /// Lowest partition number not in use
    pub fn next_number(&self) -> u32 {
        (1..)
            .find(|n| self.partitions.iter().all(|p| p.number != *n))
            .unwrap_or(1)
    }
}

/// Common behavior of devices that can hold a partition table
pub trait Partitionable {
    fn sid(&self) -> Sid;
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    fn partition_table(&self) -> Option<&PartitionTable>;
    fn partition_table_mut(&mut self) -> Option<&mut PartitionTable>;
    fn set_partition_table(&mut self, table: Option<PartitionTable>);
    fn filesystem(&self) -> Option<&Filesystem>;
    fn encryption(&self) -> Option<&Encryption>;

    /// Partition table type used when a new table has to be created
    fn preferred_ptable_type(&self) -> PtableType {
        PtableType::Gpt
    }

    fn partitions(&self) -> &[Partition] {
        self.partition_table()
            .map(|table| table.partitions.as_slice())
            .unwrap_or(&[])
    }

    fn usable_region(&self, ptable_type: PtableType) -> ByteRange {
        let end = self.size().saturating_sub(ptable_type.reserved_tail());
        ByteRange::new(GPT_ALIGNMENT_BYTES, end).aligned()
    }

    /// Whether the device has content directly on it (no partition table)
    fn has_direct_content(&self) -> bool {
        self.filesystem().is_some() || self.encryption().is_some()
    }

    /// Space partitions could be created in, assuming a table of `fallback`
    /// type gets created when there is none yet
    fn available_slots(&self, fallback: PtableType) -> Vec<ByteRange> {
        match self.partition_table() {
            Some(table) => table.unused_slots(self.usable_region(table.ptable_type)),
            None if self.has_direct_content() => Vec::new(),
            None => {
                let region = self.usable_region(fallback);
                if region.size() >= GPT_ALIGNMENT_BYTES {
                    vec![region]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Device name of the partition with the given number
    fn partition_name(&self, number: u32) -> String {
        let name = self.name();
        if name.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{name}p{number}")
        } else {
            format!("{name}{number}")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiskKind {
    #[default]
    Disk,
    Dasd,
    Multipath {
        wires: Vec<String>,
    },
}

/// A physical (or multipath/DASD) disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub sid: Sid,

    /// Device path (e.g., "/dev/sda")
    pub name: String,

    /// Total size in bytes
    pub size: u64,

    #[serde(default = "default_block_size")]
    pub block_size: u32,

    #[serde(default)]
    pub kind: DiskKind,

    #[serde(default)]
    pub partition_table: Option<PartitionTable>,

    #[serde(default)]
    pub filesystem: Option<Filesystem>,

    #[serde(default)]
    pub encryption: Option<Encryption>,
}

pub(crate) fn default_block_size() -> u32 {
    512
}

impl Disk {
    pub fn new(sid: Sid, name: impl Into<String>, size: u64) -> Self {
        Self {
            sid,
            name: name.into(),
            size,
            block_size: default_block_size(),
            kind: DiskKind::Disk,
            partition_table: None,
            filesystem: None,
            encryption: None,
        }
    }
}

impl Partitionable for Disk {
    fn sid(&self) -> Sid {
        self.sid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn partition_table(&self) -> Option<&PartitionTable> {
        self.partition_table.as_ref()
    }

    fn partition_table_mut(&mut self) -> Option<&mut PartitionTable> {
        self.partition_table.as_mut()
    }

    fn set_partition_table(&mut self, table: Option<PartitionTable>) {
        self.partition_table = table;
    }

    fn filesystem(&self) -> Option<&Filesystem> {
        self.filesystem.as_ref()
    }

    fn encryption(&self) -> Option<&Encryption> {
        self.encryption.as_ref()
    }

    fn preferred_ptable_type(&self) -> PtableType {
        match self.kind {
            DiskKind::Dasd => PtableType::Dasd,
            _ => PtableType::Gpt,
        }
    }
}

/// Software RAID level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl MdLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raid0" => Some(Self::Raid0),
            "raid1" => Some(Self::Raid1),
            "raid5" => Some(Self::Raid5),
            "raid6" => Some(Self::Raid6),
            "raid10" => Some(Self::Raid10),
            _ => None,
        }
    }

    pub fn min_devices(self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 | Self::Raid10 => 2,
            Self::Raid5 => 3,
            Self::Raid6 => 4,
        }
    }

    /// Usable size of an array built from members of the given sizes
    pub fn array_size(self, member_sizes: &[u64]) -> u64 {
        let count = member_sizes.len() as u64;
        let smallest = member_sizes.iter().copied().min().unwrap_or(0);
        match self {
            Self::Raid0 => member_sizes.iter().sum(),
            Self::Raid1 => smallest,
            Self::Raid5 => smallest * count.saturating_sub(1),
            Self::Raid6 => smallest * count.saturating_sub(2),
            Self::Raid10 => smallest * count / 2,
        }
    }

    /// Member size needed so that `count` members provide `array_size` bytes
    pub fn member_size_for(self, array_size: u64, count: usize) -> u64 {
        let count = count.max(self.min_devices()) as u64;
        match self {
            Self::Raid0 => array_size.div_ceil(count),
            Self::Raid1 => array_size,
            Self::Raid5 => array_size.div_ceil(count - 1),
            Self::Raid6 => array_size.div_ceil(count - 2),
            Self::Raid10 => (array_size * 2).div_ceil(count),
        }
    }
}

/// Software RAID (MD) device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdRaid {
    pub sid: Sid,

    /// Device path (e.g., "/dev/md0")
    pub name: String,

    pub level: MdLevel,

    #[serde(default)]
    pub chunk_size: Option<u64>,

    /// Member device names
    pub devices: Vec<String>,

    pub size: u64,

    #[serde(default = "default_block_size")]
    pub block_size: u32,

    #[serde(default)]
    pub partition_table: Option<PartitionTable>,

    #[serde(default)]
    pub filesystem: Option<Filesystem>,

    #[serde(default)]
    pub encryption: Option<Encryption>,
}

impl Partitionable for MdRaid {
    fn sid(&self) -> Sid {
        self.sid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn partition_table(&self) -> Option<&PartitionTable> {
        self.partition_table.as_ref()
    }

    fn partition_table_mut(&mut self) -> Option<&mut PartitionTable> {
        self.partition_table.as_mut()
    }

    fn set_partition_table(&mut self, table: Option<PartitionTable>) {
        self.partition_table = table;
    }

    fn filesystem(&self) -> Option<&Filesystem> {
        self.filesystem.as_ref()
    }

    fn encryption(&self) -> Option<&Encryption> {
        self.encryption.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{GIB, MIB};
    use crate::devicegraph::FilesystemType;

    fn partition(sid: Sid, number: u32, start: u64, end: u64) -> Partition {
        Partition {
            sid,
            name: format!("/dev/vda{number}"),
            number,
            region: ByteRange::new(start, end),
            id: PartitionId::Linux,
            filesystem: None,
            encryption: None,
            resize_min: None,
        }
    }

    #[test]
    fn empty_disk_offers_whole_usable_region() {
        let disk = Disk::new(1, "/dev/vda", 20 * GIB);
        let slots = disk.available_slots(PtableType::Gpt);
        assert_eq!(slots, vec![ByteRange::new(MIB, 20 * GIB - MIB)]);
    }

    #[test]
    fn gaps_between_partitions_are_unused_slots() {
        let mut disk = Disk::new(1, "/dev/vda", 10 * GIB);
        let mut table = PartitionTable::new(PtableType::Msdos);
        table.partitions.push(partition(2, 1, MIB, GIB));
        table.partitions.push(partition(3, 2, 2 * GIB, 3 * GIB));
        disk.partition_table = Some(table);

        let slots = disk.available_slots(PtableType::Gpt);
        assert_eq!(
            slots,
            vec![
                ByteRange::new(GIB, 2 * GIB),
                ByteRange::new(3 * GIB, 10 * GIB)
            ]
        );
        assert_eq!(disk.partition_table.as_ref().unwrap().next_number(), 3);
    }

    #[test]
    fn directly_formatted_disk_has_no_slots() {
        let mut disk = Disk::new(1, "/dev/vda", 10 * GIB);
        disk.filesystem = Some(Filesystem::new(FilesystemType::Ext4));
        assert!(disk.available_slots(PtableType::Gpt).is_empty());
    }

    #[test]
    fn partition_names_follow_kernel_conventions() {
        let disk = Disk::new(1, "/dev/nvme0n1", GIB);
        assert_eq!(disk.partition_name(2), "/dev/nvme0n1p2");
        let disk = Disk::new(1, "/dev/sda", GIB);
        assert_eq!(disk.partition_name(1), "/dev/sda1");
    }

    #[test]
    fn raid_sizes_depend_on_level() {
        let members = [10 * GIB, 12 * GIB, 10 * GIB];
        assert_eq!(MdLevel::Raid0.array_size(&members), 32 * GIB);
        assert_eq!(MdLevel::Raid1.array_size(&members), 10 * GIB);
        assert_eq!(MdLevel::Raid5.array_size(&members), 20 * GIB);
        assert_eq!(MdLevel::Raid5.member_size_for(20 * GIB, 3), 10 * GIB);
    }
}
