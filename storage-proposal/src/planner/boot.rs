// SPDX-License-Identifier: GPL-3.0-only

//! Partitions the boot loader needs on the boot disk

use storage_types::{
    Architecture, BootSettings, Config, ContentConfig, Devicegraph, FilesystemConfig,
    FilesystemType, GIB, MIB, MountConfig, Partition, PartitionId, Partitionable, PtableType,
};
use tracing::{debug, info};

use super::planned::{DeletionTier, PartitionTarget, Plan, PlannedDevice, PlannedPartition, PlannedReuse};
use crate::error::{ProposalError, Result};

/// Partition required to boot from a disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPartition {
    pub id: PartitionId,
    pub min: u64,
    pub max: u64,
    pub filesystem: Option<FilesystemType>,
    pub mount_path: Option<&'static str>,
}

pub trait BootRequirementsDomain: Send + Sync {
    /// Partition the boot disk needs when it carries a table of `ptable_type`
    fn boot_partition(&self, ptable_type: PtableType) -> Option<BootPartition>;

    /// Whether an existing partition already fulfils the requirement
    fn is_reusable(&self, partition: &Partition, required: &BootPartition) -> bool;
}

pub struct ArchBootPolicy {
    arch: Architecture,
    efi: bool,
}

impl ArchBootPolicy {
    pub fn new(settings: &BootSettings) -> Self {
        Self {
            arch: settings.arch,
            efi: settings.efi,
        }
    }
}

impl BootRequirementsDomain for ArchBootPolicy {
    fn boot_partition(&self, ptable_type: PtableType) -> Option<BootPartition> {
        match self.arch {
            Architecture::X86_64 | Architecture::Aarch64 if self.efi => Some(BootPartition {
                id: PartitionId::Esp,
                min: 256 * MIB,
                max: GIB,
                filesystem: Some(FilesystemType::Vfat),
                mount_path: Some("/boot/efi"),
            }),
            Architecture::X86_64 if ptable_type == PtableType::Gpt => Some(BootPartition {
                id: PartitionId::BiosBoot,
                min: MIB,
                max: 8 * MIB,
                filesystem: None,
                mount_path: None,
            }),
            Architecture::Ppc64le => Some(BootPartition {
                id: PartitionId::Prep,
                min: 4 * MIB,
                max: 8 * MIB,
                filesystem: None,
                mount_path: None,
            }),
            Architecture::S390x => Some(BootPartition {
                id: PartitionId::Linux,
                min: 100 * MIB,
                max: 300 * MIB,
                filesystem: Some(FilesystemType::Ext2),
                mount_path: Some("/boot/zipl"),
            }),
            Architecture::X86_64 | Architecture::Aarch64 => None,
        }
    }

    fn is_reusable(&self, partition: &Partition, required: &BootPartition) -> bool {
        match required.id {
            PartitionId::Esp => {
                partition.id == PartitionId::Esp
                    && partition
                        .filesystem
                        .as_ref()
                        .is_some_and(|fs| fs.fs_type == FilesystemType::Vfat)
            }
            PartitionId::BiosBoot | PartitionId::Prep => partition.id == required.id,
            _ => false,
        }
    }
}

/// Index of the drive the system boots from
pub(crate) fn boot_drive(config: &Config) -> Option<usize> {
    if let Some(alias) = &config.boot.device {
        return config
            .drives
            .iter()
            .position(|drive| drive.alias.as_deref() == Some(alias));
    }
    if let Some(index) = config.root_drive() {
        return Some(index);
    }

    // Root on LVM: the first drive backing the volume group
    let root_vg = config.volume_groups.iter().find(|vg| {
        vg.logical_volumes
            .iter()
            .any(|lv| lv.content.mount_path() == Some("/"))
    });
    if let Some(vg) = root_vg {
        for alias in vg.referenced_aliases() {
            let owner = config.drives.iter().position(|drive| {
                drive.alias.as_deref() == Some(alias)
                    || drive
                        .partitions
                        .iter()
                        .any(|p| p.alias.as_deref() == Some(alias))
            });
            if owner.is_some() {
                return owner;
            }
        }
    }

    (!config.drives.is_empty()).then_some(0)
}

/// Adds the boot requirements to `plan`
pub(crate) fn plan_boot(
    domain: &dyn BootRequirementsDomain,
    config: &Config,
    graph: &Devicegraph,
    plan: &mut Plan,
    default_ptable: PtableType,
) -> Result<()> {
    if !config.boot.is_configured() {
        debug!("boot configuration disabled");
        return Ok(());
    }

    let drive = boot_drive(config)
        .and_then(|index| config.drives.get(index))
        .ok_or_else(|| ProposalError::NotBootable("no boot disk could be determined".into()))?;
    let sid = drive.search.device.ok_or_else(|| {
        ProposalError::NotBootable(format!("the boot disk {} was not found", drive.search.describe()))
    })?;
    let disk = graph
        .partitionable(sid)
        .ok_or_else(|| ProposalError::Inconsistent(format!("device {sid} is not partitionable")))?;
    if drive.is_used_directly() {
        return Err(ProposalError::NotBootable(format!(
            "the boot disk {} is used without partition table",
            disk.name()
        )));
    }

    let ptable_type = plan
        .new_ptable_type(sid)
        .or_else(|| disk.partition_table().map(|table| table.ptable_type))
        .unwrap_or_else(|| match disk.preferred_ptable_type() {
            PtableType::Dasd => PtableType::Dasd,
            _ => default_ptable,
        });

    let mut needed: u64 = plan
        .partitions_on(PartitionTarget::Existing(sid))
        .map(|partition| partition.min)
        .sum();

    if let Some(required) = domain.boot_partition(ptable_type) {
        let already_planned = required.mount_path.is_some_and(|path| plan.mounts(path))
            || plan
                .partitions_on(PartitionTarget::Existing(sid))
                .any(|partition| partition.id == required.id);

        if already_planned {
            debug!("boot partition {:?} already in the config", required.id);
        } else if let Some(existing) = reusable_partition(domain, disk, &required, plan) {
            info!("reusing {} as boot partition", existing.name);
            plan.protected.insert(existing.sid);
            plan.devices.push(PlannedDevice::Reuse(PlannedReuse {
                sid: existing.sid,
                alias: None,
                content: boot_content(&required),
            }));
        } else {
            info!("adding a {:?} partition to {}", required.id, disk.name());
            needed += required.min;
            plan.devices.push(PlannedDevice::Partition(PlannedPartition {
                target: PartitionTarget::Existing(sid),
                alias: None,
                id: required.id,
                min: required.min,
                max: Some(required.max),
                content: boot_content(&required),
                volume_group: None,
                boot: true,
            }));
        }
    }

    if needed > disk.size() {
        return Err(ProposalError::NotBootable(format!(
            "the boot disk {} cannot hold the planned partitions",
            disk.name()
        )));
    }
    Ok(())
}

fn reusable_partition<'a>(
    domain: &dyn BootRequirementsDomain,
    disk: &'a dyn Partitionable,
    required: &BootPartition,
    plan: &Plan,
) -> Option<&'a Partition> {
    if plan.new_ptable_type(disk.sid()).is_some() {
        return None;
    }
    disk.partitions().iter().find(|partition| {
        domain.is_reusable(partition, required)
            && !plan.is_deleted(partition.sid, DeletionTier::Delete)
            && !plan.is_deleted(partition.sid, DeletionTier::DeleteIfNeeded)
            && !plan.reused().any(|reuse| reuse.sid == partition.sid)
    })
}

fn boot_content(required: &BootPartition) -> ContentConfig {
    ContentConfig {
        filesystem: required.filesystem.map(FilesystemConfig::with_type),
        mount: required.mount_path.map(MountConfig::at),
        encryption: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(arch: Architecture, efi: bool) -> ArchBootPolicy {
        ArchBootPolicy::new(&BootSettings { arch, efi })
    }

    #[test]
    fn requirements_per_architecture() {
        let esp = policy(Architecture::Aarch64, true)
            .boot_partition(PtableType::Gpt)
            .unwrap();
        assert_eq!(esp.id, PartitionId::Esp);
        assert_eq!(esp.mount_path, Some("/boot/efi"));
        assert_eq!((esp.min, esp.max), (256 * MIB, GIB));

        let legacy = policy(Architecture::X86_64, false);
        assert_eq!(
            legacy.boot_partition(PtableType::Gpt).map(|p| p.id),
            Some(PartitionId::BiosBoot)
        );
        assert_eq!(legacy.boot_partition(PtableType::Msdos), None);

        let prep = policy(Architecture::Ppc64le, false)
            .boot_partition(PtableType::Msdos)
            .unwrap();
        assert_eq!((prep.id, prep.min, prep.max), (PartitionId::Prep, 4 * MIB, 8 * MIB));

        let zipl = policy(Architecture::S390x, false)
            .boot_partition(PtableType::Dasd)
            .unwrap();
        assert_eq!(zipl.filesystem, Some(FilesystemType::Ext2));
        assert_eq!(zipl.mount_path, Some("/boot/zipl"));
    }

    #[test]
    fn boot_drive_follows_root_through_lvm() {
        let json = serde_json::json!({
            "drives": [{ "alias": "first" }, { "alias": "second" }],
            "volumeGroups": [{
                "physicalVolumes": [{ "generate": ["second"] }],
                "logicalVolumes": [{ "mount": { "path": "/" } }]
            }]
        });
        let config = Config::from_json(&json, &storage_types::ProductSettings::default()).unwrap();
        assert_eq!(boot_drive(&config), Some(1));
    }
}
