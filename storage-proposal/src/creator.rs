// SPDX-License-Identifier: GPL-3.0-only

//! Creates the planned devices in the target devicegraph

use std::collections::BTreeMap;

use storage_types::{
    ContentConfig, ContentMut, DeviceKind, Devicegraph, Encryption, EncryptionConfig, Filesystem,
    LogicalVolume, MdRaid, Partition, PartitionTable, ProductSettings, PtableType, Sid,
    VolumeGroup, bytes_to_pretty,
};
use tracing::{debug, info};

use crate::error::{ProposalError, Result};
use crate::placement::{self, Request};
use crate::planner::{PartitionTarget, Plan, PlannedDevice, PlannedMdRaid, PlannedVolumeGroup};

/// Block device made available to MD RAIDs and volume groups
#[derive(Debug, Clone, PartialEq, Eq)]
struct Created {
    /// Name of the device holding the content (the LUKS device if encrypted)
    name: String,
    size: u64,
}

#[derive(Default)]
struct Registry {
    aliases: BTreeMap<String, Created>,

    /// Generated physical volumes by volume group name
    generated: BTreeMap<String, Vec<Created>>,
}

pub struct DevicesCreator<'a> {
    settings: &'a ProductSettings,
    plan: &'a Plan,
}

impl<'a> DevicesCreator<'a> {
    pub fn new(settings: &'a ProductSettings, plan: &'a Plan) -> Self {
        Self { settings, plan }
    }

    pub fn create(&self, graph: &mut Devicegraph) -> Result<()> {
        let mut registry = Registry::default();

        self.reuse_devices(graph, &mut registry)?;

        let default_ptable = self.settings.storage.ptable_type;
        for device in self.plan.partitioned_devices() {
            let ptable_type = graph
                .partitionable(device)
                .map(|d| placement::table_type_for(self.plan, d, default_ptable))
                .ok_or_else(|| ProposalError::Inconsistent(format!("no device {device}")))?;
            self.create_partitions(
                graph,
                device,
                PartitionTarget::Existing(device),
                ptable_type,
                &mut registry,
            )?;
        }

        for md in self.md_raids() {
            let sid = self.create_md_raid(graph, md, &mut registry)?;
            self.create_partitions(
                graph,
                sid,
                PartitionTarget::NewMdRaid(md.index),
                md.ptable_type.unwrap_or(default_ptable),
                &mut registry,
            )?;
        }

        for vg in self.volume_groups() {
            self.create_volume_group(graph, vg, &registry)?;
        }
        Ok(())
    }

    fn md_raids(&self) -> impl Iterator<Item = &PlannedMdRaid> {
        self.plan.devices.iter().filter_map(|device| match device {
            PlannedDevice::MdRaid(md) => Some(md),
            _ => None,
        })
    }

    fn volume_groups(&self) -> impl Iterator<Item = &PlannedVolumeGroup> {
        self.plan.devices.iter().filter_map(|device| match device {
            PlannedDevice::VolumeGroup(vg) => Some(vg),
            _ => None,
        })
    }

    fn reuse_devices(&self, graph: &mut Devicegraph, registry: &mut Registry) -> Result<()> {
        for reuse in self.plan.reused() {
            let kind = graph.kind_of(reuse.sid).ok_or_else(|| {
                ProposalError::Inconsistent(format!("device {} is gone", reuse.sid))
            })?;
            let name = graph.device_name(reuse.sid).unwrap_or_default();

            if matches!(kind, DeviceKind::Disk | DeviceKind::MdRaid)
                && let Some(device) = graph.partitionable_mut(reuse.sid)
            {
                if !device.partitions().is_empty() {
                    return Err(ProposalError::Inconsistent(format!(
                        "{name} still has partitions"
                    )));
                }
                device.set_partition_table(None);
            }

            let size = device_size(graph, reuse.sid);
            let content = graph
                .content_mut(reuse.sid)
                .ok_or_else(|| ProposalError::Creation(format!("{name} cannot hold content")))?;
            let content_name =
                self.apply_content(content, &reuse.content, &name, luks_name(&name));
            debug!("reusing {name}");

            if let Some(alias) = &reuse.alias {
                registry.aliases.insert(
                    alias.clone(),
                    Created {
                        name: content_name,
                        size,
                    },
                );
            }
        }
        Ok(())
    }

    fn create_partitions(
        &self,
        graph: &mut Devicegraph,
        device_sid: Sid,
        target: PartitionTarget,
        ptable_type: PtableType,
        registry: &mut Registry,
    ) -> Result<()> {
        let partitions = placement::requests_for(self.plan, target);
        if partitions.is_empty() {
            return Ok(());
        }

        let (device_name, regions) = {
            let device = graph.partitionable(device_sid).ok_or_else(|| {
                ProposalError::Inconsistent(format!("no device {device_sid}"))
            })?;
            let ptable_type = device
                .partition_table()
                .map(|table| table.ptable_type)
                .unwrap_or(ptable_type);
            if device.partitions().len() + partitions.len() > ptable_type.max_partitions() {
                return Err(ProposalError::Creation(format!(
                    "{} cannot hold {} more partitions",
                    device.name(),
                    partitions.len()
                )));
            }

            let slots = device.available_slots(ptable_type);
            let requests: Vec<Request> = partitions.iter().map(|p| Request::of(p)).collect();
            let regions = placement::place(&slots, &requests).ok_or_else(|| {
                ProposalError::NoSpace {
                    device: device.name().to_string(),
                    needed: requests.iter().map(|r| r.min).sum(),
                    available: slots.iter().map(|slot| slot.size()).sum(),
                }
            })?;
            (device.name().to_string(), regions)
        };

        for (planned, region) in partitions.into_iter().zip(regions) {
            let sid = graph.allocate_sid();
            let device = graph
                .partitionable_mut(device_sid)
                .ok_or_else(|| ProposalError::Inconsistent(format!("no device {device_sid}")))?;
            if device.partition_table().is_none() {
                device.set_partition_table(Some(PartitionTable::new(ptable_type)));
            }
            let number = device
                .partition_table()
                .map(PartitionTable::next_number)
                .unwrap_or(1);
            let name = device.partition_name(number);

            let mut filesystem = None;
            let mut encryption = None;
            let content_name = self.apply_content(
                ContentMut {
                    filesystem: &mut filesystem,
                    encryption: &mut encryption,
                },
                &planned.content,
                &name,
                luks_name(&name),
            );

            info!(
                "new partition {name} ({}) on {device_name}",
                bytes_to_pretty(&region.size(), false)
            );
            let created = Created {
                name: content_name,
                size: region.size(),
            };
            if let Some(alias) = &planned.alias {
                registry.aliases.insert(alias.clone(), created.clone());
            }
            if let Some(vg) = &planned.volume_group {
                registry.generated.entry(vg.clone()).or_default().push(created);
            }

            if let Some(table) = device.partition_table_mut() {
                table.partitions.push(Partition {
                    sid,
                    name,
                    number,
                    region,
                    id: planned.id,
                    filesystem,
                    encryption,
                    resize_min: None,
                });
            }
        }
        Ok(())
    }

    fn create_md_raid(
        &self,
        graph: &mut Devicegraph,
        md: &PlannedMdRaid,
        registry: &mut Registry,
    ) -> Result<Sid> {
        let members = md
            .devices
            .iter()
            .map(|alias| {
                registry.aliases.get(alias).cloned().ok_or_else(|| {
                    ProposalError::Creation(format!("unknown MD RAID member {alias}"))
                })
            })
            .collect::<Result<Vec<Created>>>()?;
        let sizes: Vec<u64> = members.iter().map(|member| member.size).collect();

        let name = match &md.name {
            Some(name) => format!("/dev/md/{name}"),
            None => (0..)
                .map(|number| format!("/dev/md{number}"))
                .find(|name| graph.md_raids.iter().all(|existing| &existing.name != name))
                .unwrap_or_else(|| "/dev/md0".to_string()),
        };

        let sid = graph.allocate_sid();
        let mut filesystem = None;
        let mut encryption = None;
        let content_name = self.apply_content(
            ContentMut {
                filesystem: &mut filesystem,
                encryption: &mut encryption,
            },
            &md.content,
            &name,
            luks_name(&name),
        );

        let size = md.level.array_size(&sizes);
        info!(
            "new {} {name} on {} devices",
            md.level.as_str(),
            members.len()
        );
        graph.md_raids.push(MdRaid {
            sid,
            name,
            level: md.level,
            chunk_size: md.chunk_size,
            devices: members.into_iter().map(|member| member.name).collect(),
            size,
            block_size: 512,
            partition_table: None,
            filesystem,
            encryption,
        });

        if let Some(alias) = &md.alias {
            registry.aliases.insert(
                alias.clone(),
                Created {
                    name: content_name,
                    size,
                },
            );
        }
        Ok(sid)
    }

    fn create_volume_group(
        &self,
        graph: &mut Devicegraph,
        vg: &PlannedVolumeGroup,
        registry: &Registry,
    ) -> Result<()> {
        if graph.volume_group_by_name(&vg.name).is_some() {
            return Err(ProposalError::Creation(format!(
                "the volume group {} already exists",
                vg.name
            )));
        }

        let mut physical_volumes = Vec::new();
        for alias in &vg.physical_volumes {
            let pv = registry.aliases.get(alias).ok_or_else(|| {
                ProposalError::Creation(format!("unknown physical volume {alias}"))
            })?;
            physical_volumes.push(pv.clone());
        }
        physical_volumes.extend(registry.generated.get(&vg.name).cloned().unwrap_or_default());
        if physical_volumes.is_empty() {
            return Err(ProposalError::Creation(format!(
                "the volume group {} has no physical volumes",
                vg.name
            )));
        }

        let pv_sizes: Vec<u64> = physical_volumes.iter().map(|pv| pv.size).collect();
        let usable = VolumeGroup::usable_size(vg.extent_size, &pv_sizes);
        let needed = vg.min_size();
        if needed > usable {
            return Err(ProposalError::NoSpace {
                device: format!("/dev/{}", vg.name),
                needed,
                available: usable,
            });
        }

        let mut sizes: Vec<u64> = vg.logical_volumes.iter().map(|lv| lv.min).collect();
        let caps: Vec<u64> = vg
            .logical_volumes
            .iter()
            .map(|lv| match lv.max {
                Some(max) => (max / vg.extent_size * vg.extent_size).max(lv.min),
                None => u64::MAX,
            })
            .collect();
        share_evenly(&mut sizes, &caps, usable - needed, vg.extent_size);

        let mut logical_volumes = Vec::new();
        for (lv, size) in vg.logical_volumes.iter().zip(sizes) {
            let sid = graph.allocate_sid();
            let mut filesystem = None;
            let mut encryption = None;
            self.apply_content(
                ContentMut {
                    filesystem: &mut filesystem,
                    encryption: &mut encryption,
                },
                &lv.content,
                &format!("/dev/{}/{}", vg.name, lv.name),
                format!("cr_{}-{}", vg.name, lv.name),
            );
            logical_volumes.push(LogicalVolume {
                sid,
                name: lv.name.clone(),
                vg_name: vg.name.clone(),
                size,
                stripes: lv.stripes,
                filesystem,
                encryption,
            });
        }

        info!(
            "new volume group {} ({}) with {} logical volumes",
            vg.name,
            bytes_to_pretty(&usable, false),
            logical_volumes.len()
        );
        let sid = graph.allocate_sid();
        graph.volume_groups.push(VolumeGroup {
            sid,
            name: vg.name.clone(),
            extent_size: vg.extent_size,
            physical_volumes: physical_volumes.into_iter().map(|pv| pv.name).collect(),
            size: usable,
            logical_volumes,
        });
        Ok(())
    }

    /// Writes the filesystem and encryption layers of `content` on the device
    /// called `name`; returns the name of the device holding the filesystem
    fn apply_content(
        &self,
        target: ContentMut<'_>,
        content: &ContentConfig,
        name: &str,
        luks_name: String,
    ) -> String {
        if let Some(config) = &content.encryption
            && let Some(encryption) = new_encryption(config, luks_name)
        {
            *target.encryption = Some(encryption);
        }

        if content.filesystem.is_some() || content.mount.is_some() {
            let existing = target.filesystem.take();
            let mut filesystem = match (&content.filesystem, existing) {
                (None, Some(existing)) => existing,
                (Some(wanted), Some(existing))
                    if wanted.reuse_if_possible == Some(true)
                        && wanted.fs_type.is_none_or(|t| t == existing.fs_type) =>
                {
                    existing
                }
                (wanted, _) => {
                    let fs_type = wanted
                        .as_ref()
                        .and_then(|fs| fs.fs_type)
                        .unwrap_or(self.settings.storage.filesystem);
                    let mut filesystem = Filesystem::new(fs_type);
                    if let Some(wanted) = wanted {
                        filesystem.label = wanted.label.clone();
                        filesystem.snapshots = wanted.snapshots.unwrap_or(false);
                    }
                    filesystem
                }
            };
            if let Some(mount) = &content.mount {
                filesystem.mount_path = mount.path.clone();
                filesystem.mount_options = mount.options.clone();
                filesystem.mount_by = mount.mount_by;
            }
            *target.filesystem = Some(filesystem);
        }

        target
            .encryption
            .as_ref()
            .map(Encryption::device_path)
            .unwrap_or_else(|| name.to_string())
    }
}

fn new_encryption(config: &EncryptionConfig, name: String) -> Option<Encryption> {
    Some(Encryption {
        name,
        method: config.method?,
        password: config.password.clone(),
        pbkd_function: config.pbkd_function,
        key_size: config.key_size,
        cipher: config.cipher.clone(),
        label: config.label.clone(),
    })
}

/// "/dev/vda2" is encrypted as "cr_vda2"
fn luks_name(device: &str) -> String {
    let base = device.rsplit('/').next().unwrap_or(device);
    format!("cr_{base}")
}

fn device_size(graph: &Devicegraph, sid: Sid) -> u64 {
    if let Some(device) = graph.partitionable(sid) {
        return device.size();
    }
    if let Some(partition) = graph.partition(sid) {
        return partition.size();
    }
    graph.logical_volume(sid).map(|lv| lv.size).unwrap_or(0)
}

/// Grows `sizes` towards `caps` in steps of `unit`, evenly
fn share_evenly(sizes: &mut [u64], caps: &[u64], mut free: u64, unit: u64) {
    let unit = unit.max(1);
    loop {
        let growable: Vec<usize> = (0..sizes.len()).filter(|i| sizes[*i] < caps[*i]).collect();
        if growable.is_empty() || free < unit {
            return;
        }
        let share = (free / growable.len() as u64 / unit * unit).max(unit);
        let mut progress = false;
        for index in growable {
            let extra = share.min(caps[index] - sizes[index]).min(free) / unit * unit;
            if extra > 0 {
                sizes[index] += extra;
                free -= extra;
                progress = true;
            }
        }
        if !progress {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use storage_types::{
        Disk, EncryptionMethod, FilesystemConfig, FilesystemType, GIB, MIB, MdLevel, MountConfig,
        PartitionId, Partitionable,
    };

    use super::*;
    use crate::planner::{PlannedLogicalVolume, PlannedPartition};

    fn mounted(fs_type: FilesystemType, path: &str) -> ContentConfig {
        ContentConfig {
            filesystem: Some(FilesystemConfig::with_type(fs_type)),
            mount: Some(MountConfig::at(path)),
            encryption: None,
        }
    }

    fn partition(target: Sid, min: u64, max: Option<u64>, content: ContentConfig) -> PlannedPartition {
        PlannedPartition {
            target: PartitionTarget::Existing(target),
            alias: None,
            id: PartitionId::Linux,
            min,
            max,
            content,
            volume_group: None,
            boot: false,
        }
    }

    fn single_disk(name: &str, size: u64) -> Devicegraph {
        let mut graph = Devicegraph::new();
        graph.disks.push(Disk::new(1, name, size));
        graph
    }

    #[test]
    fn boot_partition_goes_first_and_root_takes_the_rest() {
        let mut graph = single_disk("/dev/vda", 20 * GIB);
        let root = partition(1, 5 * GIB, None, mounted(FilesystemType::Btrfs, "/"));
        let esp = PlannedPartition {
            id: PartitionId::Esp,
            boot: true,
            ..partition(1, 256 * MIB, Some(GIB), mounted(FilesystemType::Vfat, "/boot/efi"))
        };
        let plan = Plan {
            devices: vec![PlannedDevice::Partition(root), PlannedDevice::Partition(esp)],
            ..Plan::default()
        };

        let settings = ProductSettings::default();
        DevicesCreator::new(&settings, &plan)
            .create(&mut graph)
            .unwrap();

        let disk = &graph.disks[0];
        assert_eq!(disk.partition_table.as_ref().unwrap().ptable_type, PtableType::Gpt);
        let partitions = disk.partitions();
        assert_eq!(partitions[0].name, "/dev/vda1");
        assert_eq!(partitions[0].id, PartitionId::Esp);
        assert_eq!(partitions[0].region.start, MIB);
        assert_eq!(partitions[0].size(), GIB);
        assert_eq!(partitions[1].name, "/dev/vda2");
        assert_eq!(partitions[1].region.end, 20 * GIB - MIB);
        let root_fs = partitions[1].filesystem.as_ref().unwrap();
        assert_eq!(root_fs.fs_type, FilesystemType::Btrfs);
        assert_eq!(root_fs.mount_path.as_deref(), Some("/"));
    }

    #[test]
    fn encrypted_partitions_get_luks_names() {
        let mut graph = single_disk("/dev/nvme0n1", 10 * GIB);
        let mut content = mounted(FilesystemType::Xfs, "/home");
        content.encryption = Some(EncryptionConfig {
            method: Some(EncryptionMethod::Luks2),
            password: Some("secret".to_string()),
            ..EncryptionConfig::default()
        });
        let plan = Plan {
            devices: vec![PlannedDevice::Partition(partition(1, GIB, Some(2 * GIB), content))],
            ..Plan::default()
        };

        let settings = ProductSettings::default();
        DevicesCreator::new(&settings, &plan)
            .create(&mut graph)
            .unwrap();

        let created = &graph.disks[0].partitions()[0];
        assert_eq!(created.name, "/dev/nvme0n1p1");
        assert_eq!(created.size(), 2 * GIB);
        let encryption = created.encryption.as_ref().unwrap();
        assert_eq!(encryption.name, "cr_nvme0n1p1");
        assert_eq!(encryption.device_path(), "/dev/mapper/cr_nvme0n1p1");
    }

    #[test]
    fn builds_md_raids_and_volume_groups() {
        let mut graph = single_disk("/dev/sda", 20 * GIB);
        graph.disks.push(Disk::new(2, "/dev/sdb", 20 * GIB));

        let member = |target, alias: &str| {
            PlannedDevice::Partition(PlannedPartition {
                alias: Some(alias.to_string()),
                id: PartitionId::Raid,
                ..partition(target, 4 * GIB, Some(4 * GIB), ContentConfig::default())
            })
        };
        let plan = Plan {
            devices: vec![
                member(1, "a"),
                member(2, "b"),
                PlannedDevice::Partition(PlannedPartition {
                    volume_group: Some("system".to_string()),
                    id: PartitionId::Lvm,
                    ..partition(1, 8 * GIB, Some(8 * GIB), ContentConfig::default())
                }),
                PlannedDevice::MdRaid(PlannedMdRaid {
                    index: 0,
                    alias: None,
                    name: None,
                    level: MdLevel::Raid1,
                    chunk_size: None,
                    devices: vec!["a".to_string(), "b".to_string()],
                    ptable_type: None,
                    content: mounted(FilesystemType::Xfs, "/srv"),
                }),
                PlannedDevice::VolumeGroup(PlannedVolumeGroup {
                    name: "system".to_string(),
                    extent_size: 4 * MIB,
                    physical_volumes: Vec::new(),
                    logical_volumes: vec![
                        PlannedLogicalVolume {
                            name: "root".to_string(),
                            alias: None,
                            min: 2 * GIB,
                            max: None,
                            stripes: None,
                            content: mounted(FilesystemType::Btrfs, "/"),
                        },
                        PlannedLogicalVolume {
                            name: "swap".to_string(),
                            alias: None,
                            min: GIB,
                            max: Some(2 * GIB),
                            stripes: None,
                            content: mounted(FilesystemType::Swap, "swap"),
                        },
                    ],
                }),
            ],
            ..Plan::default()
        };

        let settings = ProductSettings::default();
        DevicesCreator::new(&settings, &plan)
            .create(&mut graph)
            .unwrap();

        let md = &graph.md_raids[0];
        assert_eq!(md.name, "/dev/md0");
        assert_eq!(md.size, 4 * GIB);
        assert_eq!(md.devices, vec!["/dev/sda1", "/dev/sdb1"]);

        let vg = &graph.volume_groups[0];
        assert_eq!(vg.physical_volumes, vec!["/dev/sda2"]);
        assert_eq!(vg.size, 8 * GIB - 4 * MIB);
        assert_eq!(vg.logical_volumes[1].size, 2 * GIB);
        assert_eq!(vg.logical_volumes[0].size, 6 * GIB - 4 * MIB);
        assert_eq!(vg.free(), 0);
    }

    #[test]
    fn too_large_partitions_fail() {
        let mut graph = single_disk("/dev/vda", 2 * GIB);
        let plan = Plan {
            devices: vec![PlannedDevice::Partition(partition(
                1,
                5 * GIB,
                None,
                ContentConfig::default(),
            ))],
            ..Plan::default()
        };
        let settings = ProductSettings::default();
        let result = DevicesCreator::new(&settings, &plan).create(&mut graph);
        assert!(matches!(result, Err(ProposalError::NoSpace { .. })));
    }

    #[test]
    fn even_growth_respects_caps() {
        let mut sizes = vec![4, 4];
        share_evenly(&mut sizes, &[8, u64::MAX], 12, 4);
        assert_eq!(sizes, vec![8, 12]);
    }
}
