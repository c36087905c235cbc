// SPDX-License-Identifier: GPL-3.0-only

//! Devices the planner decided on, before any of them exists

use std::collections::BTreeSet;

use storage_types::{ContentConfig, Issue, MdLevel, PartitionId, PtableType, Sid};

/// Why an existing device may go away
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeletionTier {
    /// Marked `delete`, removed unconditionally
    Delete,

    /// Marked `deleteIfNeeded`
    DeleteIfNeeded,

    /// Not mentioned by the config, on a drive with the `delete` space policy.
    /// For the drive itself this means the content sitting directly on it.
    Reclaimable,
}

/// Device a new partition goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionTarget {
    Existing(Sid),

    /// MD RAID still to create, by position in the config
    NewMdRaid(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPartition {
    pub target: PartitionTarget,
    pub alias: Option<String>,
    pub id: PartitionId,
    pub min: u64,
    pub max: Option<u64>,
    pub content: ContentConfig,

    /// Name of the volume group this partition is generated for
    pub volume_group: Option<String>,

    /// Boot partitions are placed before any other partition
    pub boot: bool,
}

/// Existing device kept by the config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReuse {
    pub sid: Sid,
    pub alias: Option<String>,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMdRaid {
    /// Position in the config, referenced by [`PartitionTarget::NewMdRaid`]
    pub index: usize,
    pub alias: Option<String>,
    pub name: Option<String>,
    pub level: MdLevel,
    pub chunk_size: Option<u64>,

    /// Aliases of the member devices
    pub devices: Vec<String>,

    pub ptable_type: Option<PtableType>,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLogicalVolume {
    pub name: String,
    pub alias: Option<String>,
    pub min: u64,
    pub max: Option<u64>,
    pub stripes: Option<u32>,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedVolumeGroup {
    pub name: String,
    pub extent_size: u64,

    /// Aliases of existing or planned devices used as physical volumes;
    /// generated PV partitions point back through
    /// [`PlannedPartition::volume_group`]
    pub physical_volumes: Vec<String>,

    pub logical_volumes: Vec<PlannedLogicalVolume>,
}

impl PlannedVolumeGroup {
    pub fn min_size(&self) -> u64 {
        self.logical_volumes.iter().map(|lv| lv.min).sum()
    }

    /// Sum of the LV maximums, `None` when any LV is unlimited
    pub fn max_size(&self) -> Option<u64> {
        self.logical_volumes.iter().map(|lv| lv.max).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedDevice {
    /// A new table of the given type replaces the current content
    PartitionTable { device: Sid, ptable_type: PtableType },
    Partition(PlannedPartition),
    Reuse(PlannedReuse),
    Deletion { sid: Sid, tier: DeletionTier },

    /// Untouched partition that may shrink down to `min_size`
    Shrink { sid: Sid, min_size: u64 },
    MdRaid(PlannedMdRaid),
    VolumeGroup(PlannedVolumeGroup),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub devices: Vec<PlannedDevice>,

    /// Existing devices that must survive the proposal
    pub protected: BTreeSet<Sid>,

    pub issues: Vec<Issue>,
}

impl Plan {
    pub fn partitions(&self) -> impl Iterator<Item = &PlannedPartition> {
        self.devices.iter().filter_map(|device| match device {
            PlannedDevice::Partition(partition) => Some(partition),
            _ => None,
        })
    }

    pub fn partitions_on(&self, target: PartitionTarget) -> impl Iterator<Item = &PlannedPartition> {
        self.partitions()
            .filter(move |partition| partition.target == target)
    }

    pub fn reused(&self) -> impl Iterator<Item = &PlannedReuse> {
        self.devices.iter().filter_map(|device| match device {
            PlannedDevice::Reuse(reuse) => Some(reuse),
            _ => None,
        })
    }

    pub fn deletions(&self) -> impl Iterator<Item = (Sid, DeletionTier)> + '_ {
        self.devices.iter().filter_map(|device| match device {
            PlannedDevice::Deletion { sid, tier } => Some((*sid, *tier)),
            _ => None,
        })
    }

    pub fn is_deleted(&self, sid: Sid, tier: DeletionTier) -> bool {
        self.deletions().any(|deletion| deletion == (sid, tier))
    }

    /// Table type planned for `device`, if it gets a new table
    pub fn new_ptable_type(&self, device: Sid) -> Option<PtableType> {
        self.devices.iter().find_map(|planned| match planned {
            PlannedDevice::PartitionTable {
                device: sid,
                ptable_type,
            } if *sid == device => Some(*ptable_type),
            _ => None,
        })
    }

    /// Existing devices getting new partitions, in planning order
    pub fn partitioned_devices(&self) -> Vec<Sid> {
        let mut devices = Vec::new();
        for partition in self.partitions() {
            if let PartitionTarget::Existing(sid) = partition.target
                && !devices.contains(&sid)
            {
                devices.push(sid);
            }
        }
        devices
    }

    /// Whether some planned device gets mounted at `path`
    pub fn mounts(&self, path: &str) -> bool {
        self.devices.iter().any(|device| match device {
            PlannedDevice::Partition(partition) => partition.content.mount_path() == Some(path),
            PlannedDevice::Reuse(reuse) => reuse.content.mount_path() == Some(path),
            PlannedDevice::MdRaid(md) => md.content.mount_path() == Some(path),
            PlannedDevice::VolumeGroup(vg) => vg
                .logical_volumes
                .iter()
                .any(|lv| lv.content.mount_path() == Some(path)),
            _ => false,
        })
    }
}
