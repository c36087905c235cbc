// SPDX-License-Identifier: GPL-3.0-only

//! Frees the space the planned partitions need
//!
//! Works on the target devicegraph. Explicit deletions always happen, then
//! empty partition tables on the devices getting partitions are dropped and
//! reclaimable whole-device content is wiped. The other candidates are only
//! used while the planned partitions of a device do not fit, in the order
//! delete-if-needed, shrink, reclaimable, each tier from the end of the disk
//! backwards.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use storage_types::{
    DeviceKind, Devicegraph, GPT_ALIGNMENT_BYTES, Issue, IssueSource, PartitionTable, PtableType,
    Sid, align_up,
};
use tracing::{debug, info};

use crate::error::{ProposalError, Result};
use crate::placement::{self, Request};
use crate::planner::{DeletionTier, PartitionTarget, Plan, PlannedDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Delete,
    Shrink { min_size: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    sid: Sid,
    rank: u8,
    start: u64,
    action: Action,
}

pub struct SpaceMaker<'a> {
    plan: &'a Plan,
    default_ptable: PtableType,
}

impl<'a> SpaceMaker<'a> {
    pub fn new(plan: &'a Plan, default_ptable: PtableType) -> Self {
        Self {
            plan,
            default_ptable,
        }
    }

    /// Returns the issues found on the way; fails when some device cannot
    /// hold its planned partitions
    pub fn make_space(&self, graph: &mut Devicegraph) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();

        let explicit: Vec<Sid> = self
            .plan
            .deletions()
            .filter(|(_, tier)| *tier == DeletionTier::Delete)
            .map(|(sid, _)| sid)
            .collect();
        for sid in explicit {
            if graph.contains(sid) && !self.delete(graph, sid) {
                let name = graph.device_name(sid).unwrap_or_else(|| sid.to_string());
                issues.push(Issue::error(
                    IssueSource::Devices,
                    format!("{name} cannot be deleted: a kept device depends on it"),
                ));
            }
        }

        self.replace_tables(graph);
        self.drop_empty_tables(graph);
        self.wipe_whole_devices(graph);

        let mut used = BTreeSet::new();
        for device in self.plan.partitioned_devices() {
            while let Err((needed, available)) = self.check(graph, device) {
                let Some(candidate) = self.next_candidate(graph, device, &used) else {
                    let name = graph.device_name(device).unwrap_or_default();
                    return Err(ProposalError::NoSpace {
                        device: name,
                        needed,
                        available,
                    });
                };
                used.insert(candidate.sid);
                match candidate.action {
                    Action::Delete => {
                        info!(
                            "deleting {} to make space",
                            graph.device_name(candidate.sid).unwrap_or_default()
                        );
                        self.delete(graph, candidate.sid);
                    }
                    Action::Shrink { min_size } => {
                        shrink(graph, candidate.sid, min_size, needed.saturating_sub(available));
                    }
                }
            }
        }

        Ok(issues)
    }

    fn replace_tables(&self, graph: &mut Devicegraph) {
        for planned in &self.plan.devices {
            let PlannedDevice::PartitionTable {
                device,
                ptable_type,
            } = planned
            else {
                continue;
            };
            let leftovers: Vec<Sid> = graph
                .dependents(*device)
                .into_iter()
                .filter(|sid| graph.kind_of(*sid) != Some(DeviceKind::Partition))
                .collect();
            for sid in leftovers {
                if !self.plan.protected.contains(&sid) {
                    remove(graph, sid);
                }
            }
            if let Some(content) = graph.content_mut(*device) {
                *content.filesystem = None;
                *content.encryption = None;
            }
            if let Some(target) = graph.partitionable_mut(*device)
                && target.partitions().is_empty()
            {
                debug!("new {} table on {}", ptable_type.as_str(), target.name());
                target.set_partition_table(Some(PartitionTable::new(*ptable_type)));
            }
        }
    }

    /// An empty table on a device getting partitions is recreated with the
    /// type the proposal prefers
    fn drop_empty_tables(&self, graph: &mut Devicegraph) {
        for sid in self.plan.partitioned_devices() {
            if self.plan.new_ptable_type(sid).is_some() {
                continue;
            }
            if let Some(device) = graph.partitionable_mut(sid)
                && device
                    .partition_table()
                    .is_some_and(|table| table.partitions.is_empty())
            {
                debug!("removing empty partition table of {}", device.name());
                device.set_partition_table(None);
            }
        }
    }

    /// Wipes content sitting directly on a device getting partitions, when
    /// its space policy allows it
    fn wipe_whole_devices(&self, graph: &mut Devicegraph) {
        for sid in self.plan.partitioned_devices() {
            if !self.plan.is_deleted(sid, DeletionTier::Reclaimable) {
                continue;
            }
            let direct = graph.partitionable(sid).is_some_and(|device| {
                device.partition_table().is_none() && device.has_direct_content()
            });
            if !direct || !self.deletable(graph, sid) {
                continue;
            }
            info!(
                "wiping {} to make space",
                graph.device_name(sid).unwrap_or_default()
            );
            for dependent in graph.dependents(sid) {
                remove(graph, dependent);
            }
            if let Some(content) = graph.content_mut(sid) {
                *content.filesystem = None;
                *content.encryption = None;
            }
        }
    }

    /// Deletes `sid` and everything built on it, unless that hits a
    /// protected device
    fn delete(&self, graph: &mut Devicegraph, sid: Sid) -> bool {
        if !self.deletable(graph, sid) {
            return false;
        }
        let mut doomed = vec![sid];
        doomed.extend(graph.dependents(sid));
        for sid in doomed {
            remove(graph, sid);
        }
        true
    }

    fn deletable(&self, graph: &Devicegraph, sid: Sid) -> bool {
        !self.plan.protected.contains(&sid)
            && graph
                .dependents(sid)
                .iter()
                .all(|dependent| !self.plan.protected.contains(dependent))
    }

    /// `Err((needed, available))` when the planned partitions do not fit
    fn check(&self, graph: &Devicegraph, sid: Sid) -> std::result::Result<(), (u64, u64)> {
        let Some(device) = graph.partitionable(sid) else {
            return Ok(());
        };
        let partitions = placement::requests_for(self.plan, PartitionTarget::Existing(sid));
        let ptable_type = placement::table_type_for(self.plan, device, self.default_ptable);
        if placement::fits(device, &partitions, ptable_type) {
            return Ok(());
        }

        let needed: u64 = partitions
            .iter()
            .map(|partition| align_up(Request::of(partition).min.max(GPT_ALIGNMENT_BYTES)))
            .sum();
        let available: u64 = device
            .available_slots(ptable_type)
            .iter()
            .map(|slot| slot.size())
            .sum();
        Err((needed, available))
    }

    fn next_candidate(
        &self,
        graph: &Devicegraph,
        device: Sid,
        used: &BTreeSet<Sid>,
    ) -> Option<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .plan
            .devices
            .iter()
            .filter_map(|planned| {
                let (sid, rank, action) = match planned {
                    PlannedDevice::Deletion {
                        sid,
                        tier: DeletionTier::DeleteIfNeeded,
                    } => (*sid, 0, Action::Delete),
                    PlannedDevice::Shrink { sid, min_size } => (
                        *sid,
                        1,
                        Action::Shrink {
                            min_size: *min_size,
                        },
                    ),
                    PlannedDevice::Deletion {
                        sid,
                        tier: DeletionTier::Reclaimable,
                    } => (*sid, 2, Action::Delete),
                    _ => return None,
                };
                let partition = graph.partition(sid)?;
                Some(Candidate {
                    sid,
                    rank,
                    start: partition.region.start,
                    action,
                })
            })
            .filter(|candidate| {
                !used.contains(&candidate.sid)
                    && graph.partition_parent(candidate.sid) == Some(device)
                    && self.deletable(graph, candidate.sid)
            })
            .collect();

        candidates.sort_by_key(|c| (c.rank, Reverse(c.start), c.sid));
        candidates.first().copied()
    }
}

fn shrink(graph: &mut Devicegraph, sid: Sid, min_size: u64, missing: u64) {
    let Some(partition) = graph.partition_mut(sid) else {
        return;
    };
    let missing = missing.max(GPT_ALIGNMENT_BYTES);
    let size = partition.size().saturating_sub(missing).max(min_size);
    let end = align_up(partition.region.start + size).min(partition.region.end);
    info!(
        "shrinking {} from {} to {} bytes",
        partition.name,
        partition.size(),
        end - partition.region.start
    );
    partition.region.end = end;
}

fn remove(graph: &mut Devicegraph, sid: Sid) {
    match graph.kind_of(sid) {
        Some(DeviceKind::Partition) => {
            graph.remove_partition(sid);
        }
        Some(DeviceKind::VolumeGroup) => {
            graph.remove_volume_group(sid);
        }
        Some(DeviceKind::MdRaid) => graph.md_raids.retain(|md| md.sid != sid),
        Some(DeviceKind::Disk | DeviceKind::LogicalVolume) | None => {}
    }
}
