// SPDX-License-Identifier: GPL-3.0-only

//! Turns a resolved config into planned devices
//!
//! The planner does not touch any devicegraph. It decides which partitions,
//! MD RAIDs and volume groups to create, which existing devices are kept,
//! deleted or shrunk, and which devices must survive the proposal.

mod boot;
mod planned;

pub use boot::{ArchBootPolicy, BootPartition, BootRequirementsDomain};
pub use planned::{
    DeletionTier, PartitionTarget, Plan, PlannedDevice, PlannedLogicalVolume, PlannedMdRaid,
    PlannedPartition, PlannedReuse, PlannedVolumeGroup,
};

use std::collections::BTreeSet;

use storage_types::{
    Config, ContentConfig, Devicegraph, FilesystemType, Issue, IssueSource, MdLevel,
    MdRaidConfig, PartitionConfig, PartitionId, Partitionable, PhysicalVolumeConfig,
    ProductSettings, PtableType, Sid, SizeConfig, SpacePolicy, VolumeGroupConfig, align_up,
};
use tracing::debug;

/// Name of volume groups the config leaves unnamed
pub const DEFAULT_VG_NAME: &str = "system";

pub struct DevicesPlanner<'a> {
    settings: &'a ProductSettings,
    graph: &'a Devicegraph,
    boot: &'a dyn BootRequirementsDomain,
}

/// Partitionable element of the config: a drive or an MD RAID
struct Holder<'c> {
    sid: Sid,
    alias: Option<&'c str>,
    ptable_type: Option<PtableType>,
    partitions: &'c [PartitionConfig],
    content: &'c ContentConfig,
}

impl<'a> DevicesPlanner<'a> {
    pub fn new(
        settings: &'a ProductSettings,
        graph: &'a Devicegraph,
        boot: &'a dyn BootRequirementsDomain,
    ) -> Self {
        Self {
            settings,
            graph,
            boot,
        }
    }

    pub fn plan(&self, config: &Config) -> Plan {
        let mut plan = Plan::default();
        let roles = Roles::of(config);

        for drive in &config.drives {
            let Some(sid) = drive.search.device else {
                continue;
            };
            self.plan_holder(
                &Holder {
                    sid,
                    alias: drive.alias.as_deref(),
                    ptable_type: drive.ptable_type,
                    partitions: &drive.partitions,
                    content: &drive.content,
                },
                &roles,
                &mut plan,
            );
        }

        for (index, md) in config.md_raids.iter().enumerate() {
            match &md.search {
                None => self.plan_new_md_raid(index, md, &roles, &mut plan),
                Some(search) => {
                    let Some(sid) = search.device else {
                        continue;
                    };
                    self.plan_holder(
                        &Holder {
                            sid,
                            alias: md.alias.as_deref(),
                            ptable_type: md.ptable_type,
                            partitions: &md.partitions,
                            content: &md.content,
                        },
                        &roles,
                        &mut plan,
                    );
                }
            }
        }

        for vg in &config.volume_groups {
            self.plan_volume_group(config, vg, &mut plan);
        }

        let default_ptable = self.settings.storage.ptable_type;
        if let Err(error) = boot::plan_boot(self.boot, config, self.graph, &mut plan, default_ptable)
        {
            plan.issues.push(error.to_issue());
        }

        self.plan_space_policies(config, &mut plan);
        plan
    }

    fn plan_holder(&self, holder: &Holder<'_>, roles: &Roles, plan: &mut Plan) {
        let Some(device) = self.graph.partitionable(holder.sid) else {
            return;
        };

        if !holder.content.is_empty() {
            debug!("{} used without partition table", device.name());
            plan.protected.insert(holder.sid);
            plan.devices.push(PlannedDevice::Reuse(PlannedReuse {
                sid: holder.sid,
                alias: holder.alias.map(str::to_string),
                content: holder.content.clone(),
            }));
            self.replace_content(device, holder.partitions, plan);
            return;
        }
        if let Some(alias) = holder.alias
            && roles.is_member(alias)
        {
            // Whole device used as PV or RAID member
            plan.protected.insert(holder.sid);
            plan.devices.push(PlannedDevice::Reuse(PlannedReuse {
                sid: holder.sid,
                alias: Some(alias.to_string()),
                content: ContentConfig::default(),
            }));
            self.replace_content(device, holder.partitions, plan);
            return;
        }

        if let Some(wanted) = holder.ptable_type {
            let current = device.partition_table().map(|table| table.ptable_type);
            if current != Some(wanted) {
                debug!("new {} partition table on {}", wanted.as_str(), device.name());
                self.replace_content(device, holder.partitions, plan);
                plan.devices.push(PlannedDevice::PartitionTable {
                    device: holder.sid,
                    ptable_type: wanted,
                });
            }
        }

        for partition in holder.partitions {
            self.plan_partition(PartitionTarget::Existing(holder.sid), partition, roles, plan);
        }
    }

    /// Everything on `device` goes away; kept partitions make that impossible
    fn replace_content(
        &self,
        device: &dyn Partitionable,
        partitions: &[PartitionConfig],
        plan: &mut Plan,
    ) {
        let kept: Vec<_> = partitions
            .iter()
            .filter(|partition| partition.is_reused())
            .filter_map(PartitionConfig::found_device)
            .collect();
        if !kept.is_empty() {
            plan.issues.push(Issue::error(
                IssueSource::Devices,
                format!(
                    "The partitions of {} cannot be kept: its content gets replaced",
                    device.name()
                ),
            ));
        }
        for partition in device.partitions() {
            if !kept.contains(&partition.sid) {
                plan.devices.push(PlannedDevice::Deletion {
                    sid: partition.sid,
                    tier: DeletionTier::Delete,
                });
            }
        }
    }

    fn plan_partition(
        &self,
        target: PartitionTarget,
        partition: &PartitionConfig,
        roles: &Roles,
        plan: &mut Plan,
    ) {
        if partition.is_new() {
            plan.devices.push(PlannedDevice::Partition(PlannedPartition {
                target,
                alias: partition.alias.clone(),
                id: partition.id.unwrap_or_else(|| {
                    roles.partition_id(partition.alias.as_deref(), &partition.content)
                }),
                min: partition.size.min,
                max: partition.size.max,
                content: partition.content.clone(),
                volume_group: None,
                boot: false,
            }));
            return;
        }

        let Some(sid) = partition.found_device() else {
            return;
        };
        if partition.delete {
            plan.devices.push(PlannedDevice::Deletion {
                sid,
                tier: DeletionTier::Delete,
            });
        } else if partition.delete_if_needed {
            plan.devices.push(PlannedDevice::Deletion {
                sid,
                tier: DeletionTier::DeleteIfNeeded,
            });
        } else {
            plan.protected.insert(sid);
            plan.devices.push(PlannedDevice::Reuse(PlannedReuse {
                sid,
                alias: partition.alias.clone(),
                content: partition.content.clone(),
            }));
        }
    }

    fn plan_new_md_raid(&self, index: usize, md: &MdRaidConfig, roles: &Roles, plan: &mut Plan) {
        plan.devices.push(PlannedDevice::MdRaid(PlannedMdRaid {
            index,
            alias: md.alias.clone(),
            name: md.name.clone(),
            level: md.level.unwrap_or(MdLevel::Raid1),
            chunk_size: md.chunk_size,
            devices: md.devices.clone(),
            ptable_type: md.ptable_type,
            content: md.content.clone(),
        }));
        for partition in md.partitions.iter().filter(|p| p.is_new()) {
            self.plan_partition(PartitionTarget::NewMdRaid(index), partition, roles, plan);
        }
    }

    fn plan_volume_group(&self, config: &Config, vg: &VolumeGroupConfig, plan: &mut Plan) {
        let name = vg.name.clone().unwrap_or_else(|| DEFAULT_VG_NAME.to_string());
        let extent_size = vg.extent_size.unwrap_or(self.settings.storage.extent_size);

        let mut used_names = BTreeSet::new();
        let logical_volumes: Vec<PlannedLogicalVolume> = vg
            .logical_volumes
            .iter()
            .enumerate()
            .map(|(index, lv)| {
                let mut lv_name = lv
                    .name
                    .clone()
                    .unwrap_or_else(|| lv_name_for(lv.content.mount_path(), index));
                while !used_names.insert(lv_name.clone()) {
                    lv_name.push('_');
                }
                PlannedLogicalVolume {
                    name: lv_name,
                    alias: lv.alias.clone(),
                    min: round_up(lv.size.min, extent_size),
                    max: lv.size.max,
                    stripes: lv.stripes,
                    content: lv.content.clone(),
                }
            })
            .collect();

        let mut physical_volumes = Vec::new();
        let mut generate_on = Vec::new();
        for pv in &vg.physical_volumes {
            match pv {
                PhysicalVolumeConfig::Alias(alias) => physical_volumes.push(alias.clone()),
                PhysicalVolumeConfig::Generate(targets) => {
                    for alias in targets {
                        match config.drive_by_alias(alias).and_then(|d| d.search.device) {
                            Some(sid) => generate_on.push(sid),
                            None => debug!("no resolved drive {alias} to generate a PV on"),
                        }
                    }
                }
            }
        }

        let planned = PlannedVolumeGroup {
            name: name.clone(),
            extent_size,
            physical_volumes,
            logical_volumes,
        };

        if !generate_on.is_empty() {
            let count = generate_on.len() as u64;
            let size = SizeConfig::range(
                pv_size(planned.min_size(), count, extent_size),
                planned
                    .max_size()
                    .map(|max| pv_size(max, count, extent_size)),
            );
            for sid in generate_on {
                plan.devices.push(PlannedDevice::Partition(PlannedPartition {
                    target: PartitionTarget::Existing(sid),
                    alias: None,
                    id: PartitionId::Lvm,
                    min: size.min,
                    max: size.max,
                    content: ContentConfig::default(),
                    volume_group: Some(name.clone()),
                    boot: false,
                }));
            }
        }

        plan.devices.push(PlannedDevice::VolumeGroup(planned));
    }

    /// Untouched partitions of drives allowing deletion or resizing
    fn plan_space_policies(&self, config: &Config, plan: &mut Plan) {
        let holders = config
            .drives
            .iter()
            .filter_map(|drive| {
                Some((
                    drive.search.device?,
                    drive.effective_space_policy(),
                    &drive.partitions,
                ))
            })
            .chain(config.md_raids.iter().filter_map(|md| {
                Some((
                    md.search.as_ref()?.device?,
                    md.space_policy.unwrap_or_default(),
                    &md.partitions,
                ))
            }));

        for (sid, policy, partitions) in holders {
            if policy == SpacePolicy::Keep {
                continue;
            }
            let Some(device) = self.graph.partitionable(sid) else {
                continue;
            };
            let mentioned: BTreeSet<_> = partitions
                .iter()
                .filter_map(PartitionConfig::found_device)
                .collect();
            let already: BTreeSet<_> = plan.deletions().map(|(sid, _)| sid).collect();

            if policy == SpacePolicy::Delete
                && device.partition_table().is_none()
                && device.has_direct_content()
                && !plan.protected.contains(&sid)
            {
                debug!("content of {} may be wiped", device.name());
                plan.devices.push(PlannedDevice::Deletion {
                    sid,
                    tier: DeletionTier::Reclaimable,
                });
            }

            for partition in device.partitions() {
                if mentioned.contains(&partition.sid)
                    || already.contains(&partition.sid)
                    || plan.protected.contains(&partition.sid)
                {
                    continue;
                }
                match policy {
                    SpacePolicy::Delete => plan.devices.push(PlannedDevice::Deletion {
                        sid: partition.sid,
                        tier: DeletionTier::Reclaimable,
                    }),
                    SpacePolicy::Resize => {
                        if let Some(min_size) = partition.resize_min
                            && min_size < partition.size()
                        {
                            plan.devices.push(PlannedDevice::Shrink {
                                sid: partition.sid,
                                min_size,
                            });
                        }
                    }
                    SpacePolicy::Keep => {}
                }
            }
        }
    }
}

/// How aliased devices are used by MD RAIDs and volume groups
struct Roles {
    physical_volumes: BTreeSet<String>,
    md_members: BTreeSet<String>,
}

impl Roles {
    fn of(config: &Config) -> Self {
        let physical_volumes = config
            .volume_groups
            .iter()
            .flat_map(|vg| &vg.physical_volumes)
            .filter_map(|pv| match pv {
                PhysicalVolumeConfig::Alias(alias) => Some(alias.clone()),
                PhysicalVolumeConfig::Generate(_) => None,
            })
            .collect();
        let md_members = config
            .md_raids
            .iter()
            .flat_map(|md| md.devices.iter().cloned())
            .collect();
        Self {
            physical_volumes,
            md_members,
        }
    }

    fn is_member(&self, alias: &str) -> bool {
        self.physical_volumes.contains(alias) || self.md_members.contains(alias)
    }

    fn partition_id(&self, alias: Option<&str>, content: &ContentConfig) -> PartitionId {
        if let Some(alias) = alias {
            if self.md_members.contains(alias) {
                return PartitionId::Raid;
            }
            if self.physical_volumes.contains(alias) {
                return PartitionId::Lvm;
            }
        }
        match content.fs_type() {
            Some(FilesystemType::Swap) => PartitionId::Swap,
            Some(FilesystemType::Vfat) if content.mount_path() == Some("/boot/efi") => {
                PartitionId::Esp
            }
            _ => PartitionId::Linux,
        }
    }
}

/// LV name derived from the mount path: `/` is "root", `/var/lib` "var_lib"
fn lv_name_for(mount_path: Option<&str>, index: usize) -> String {
    match mount_path {
        Some("/") => "root".to_string(),
        Some(path) if !path.trim_matches('/').is_empty() => {
            path.trim_matches('/').replace('/', "_")
        }
        _ => format!("lv{}", index + 1),
    }
}

fn round_up(bytes: u64, unit: u64) -> u64 {
    if unit == 0 {
        return bytes;
    }
    bytes.div_ceil(unit) * unit
}

/// Size of each of `count` generated PVs holding `total` bytes of LVs
fn pv_size(total: u64, count: u64, extent_size: u64) -> u64 {
    let share = round_up(total.div_ceil(count.max(1)), extent_size);
    align_up(share + extent_size)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storage_types::{
        BootSettings, ByteRange, Disk, GIB, MIB, Partition, PartitionTable, Architecture,
    };

    use super::*;

    fn settings() -> ProductSettings {
        ProductSettings {
            boot: BootSettings {
                arch: Architecture::X86_64,
                efi: true,
            },
            ..ProductSettings::default()
        }
    }

    fn graph() -> Devicegraph {
        let mut graph = Devicegraph::new();
        let mut disk = Disk::new(1, "/dev/sda", 100 * GIB);
        let mut table = PartitionTable::new(PtableType::Gpt);
        for (number, start, end, resize_min) in [
            (1, MIB, 501 * MIB, None),
            (2, 501 * MIB, 40 * GIB, Some(10 * GIB)),
        ] {
            table.partitions.push(Partition {
                sid: 10 + number,
                name: format!("/dev/sda{number}"),
                number,
                region: ByteRange::new(start, end),
                id: PartitionId::Linux,
                filesystem: None,
                encryption: None,
                resize_min,
            });
        }
        disk.partition_table = Some(table);
        graph.disks.push(disk);
        graph
    }

    fn plan(json: serde_json::Value, graph: &Devicegraph) -> Plan {
        let settings = settings();
        let config = Config::from_json(&json, &settings).unwrap();
        let resolution = crate::search::resolve(&config, graph);
        assert!(resolution.issues.is_empty(), "{:?}", resolution.issues);
        let policy = ArchBootPolicy::new(&settings.boot);
        DevicesPlanner::new(&settings, graph, &policy).plan(&resolution.config)
    }

    #[test]
    fn plans_partitions_boot_and_space_policy() {
        let graph = graph();
        let plan = plan(
            json!({
                "drives": [{
                    "spacePolicy": "resize",
                    "partitions": [
                        { "search": "/dev/sda1", "mount": { "path": "/data" } },
                        { "mount": { "path": "/" } }
                    ]
                }]
            }),
            &graph,
        );

        assert!(plan.issues.is_empty(), "{:?}", plan.issues);
        assert!(plan.protected.contains(&11));
        assert!(plan.devices.contains(&PlannedDevice::Shrink {
            sid: 12,
            min_size: 10 * GIB
        }));

        let partitions: Vec<&PlannedPartition> = plan.partitions().collect();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].content.mount_path(), Some("/"));
        assert_eq!(partitions[0].min, 5 * GIB);
        assert!(partitions[1].boot);
        assert_eq!(partitions[1].id, PartitionId::Esp);
    }

    #[test]
    fn changing_the_table_type_deletes_everything() {
        let graph = graph();
        let plan = plan(
            json!({ "drives": [{ "ptableType": "msdos", "partitions": [{ "mount": { "path": "/" } }] }] }),
            &graph,
        );
        assert!(plan.is_deleted(11, DeletionTier::Delete));
        assert!(plan.is_deleted(12, DeletionTier::Delete));
        assert_eq!(plan.new_ptable_type(1), Some(PtableType::Msdos));
    }

    #[test]
    fn kept_partitions_block_table_changes() {
        let graph = graph();
        let plan = plan(
            json!({ "drives": [{ "ptableType": "msdos", "partitions": [{ "search": "/dev/sda1" }] }] }),
            &graph,
        );
        assert!(plan.issues.iter().any(|issue| issue.source == IssueSource::Devices));
    }

    #[test]
    fn generated_physical_volumes_hold_the_logical_volumes() {
        let graph = graph();
        let plan = plan(
            json!({
                "drives": [{ "alias": "disk", "spacePolicy": "delete" }],
                "volumeGroups": [{
                    "physicalVolumes": [{ "generate": ["disk"] }],
                    "logicalVolumes": [
                        { "mount": { "path": "/" }, "size": "10 GiB" },
                        { "mount": { "path": "swap" } }
                    ]
                }]
            }),
            &graph,
        );

        let pv = plan
            .partitions()
            .find(|partition| partition.volume_group.is_some())
            .unwrap();
        assert_eq!(pv.id, PartitionId::Lvm);
        assert_eq!(pv.volume_group.as_deref(), Some(DEFAULT_VG_NAME));
        assert_eq!(pv.min, 11 * GIB + 4 * MIB);
        assert_eq!(pv.max, Some(12 * GIB + 4 * MIB));
        assert!(plan.is_deleted(11, DeletionTier::Reclaimable));
        assert!(plan.is_deleted(12, DeletionTier::Reclaimable));

        let vg = plan
            .devices
            .iter()
            .find_map(|device| match device {
                PlannedDevice::VolumeGroup(vg) => Some(vg),
                _ => None,
            })
            .unwrap();
        let names: Vec<&str> = vg.logical_volumes.iter().map(|lv| lv.name.as_str()).collect();
        assert_eq!(names, vec!["root", "swap"]);
    }

    #[test]
    fn lv_names_follow_mount_paths() {
        assert_eq!(lv_name_for(Some("/"), 0), "root");
        assert_eq!(lv_name_for(Some("/var/lib"), 0), "var_lib");
        assert_eq!(lv_name_for(Some("swap"), 0), "swap");
        assert_eq!(lv_name_for(None, 2), "lv3");
    }
}
