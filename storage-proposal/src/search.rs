// SPDX-License-Identifier: GPL-3.0-only

//! Binds config elements to existing devices
//!
//! [`resolve`] works on a copy of the config and returns it together with the
//! issues found, so the same input can be resolved any number of times.
//! Devices are claimed once: searches bound to a device by an earlier run go
//! first, then name and condition searches, then match-all searches, each
//! group in declaration order.

use std::collections::BTreeSet;

use storage_types::{
    Config, Devicegraph, DriveConfig, IfNotFound, Issue, IssueSource, MdRaidConfig, Partition,
    PartitionConfig, Partitionable, Search, SearchCandidate, SearchScope, Sid,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub config: Config,
    pub issues: Vec<Issue>,
}

pub fn resolve(config: &Config, graph: &Devicegraph) -> Resolution {
    let mut resolver = Resolver {
        graph,
        claimed: BTreeSet::new(),
        issues: Vec::new(),
    };

    let mut config = config.clone();
    config.drives = resolver.drives(std::mem::take(&mut config.drives));
    config.md_raids = resolver.md_raids(std::mem::take(&mut config.md_raids));

    Resolution {
        config,
        issues: resolver.issues,
    }
}

#[derive(Clone, Copy)]
struct Candidate<'a> {
    sid: Sid,
    view: SearchCandidate<'a>,
}

impl<'a> Candidate<'a> {
    fn device(device: &'a dyn Partitionable) -> Self {
        Self {
            sid: device.sid(),
            view: SearchCandidate {
                name: device.name(),
                size: device.size(),
                partition_number: None,
            },
        }
    }

    fn partition(partition: &'a Partition) -> Self {
        Self {
            sid: partition.sid,
            view: SearchCandidate {
                name: &partition.name,
                size: partition.size(),
                partition_number: Some(partition.number),
            },
        }
    }
}

enum Outcome {
    Found(Vec<Sid>),
    Skip,
    Missing,
    Create,
}

struct Resolver<'g> {
    graph: &'g Devicegraph,
    claimed: BTreeSet<Sid>,
    issues: Vec<Issue>,
}

impl<'g> Resolver<'g> {
    fn drives(&mut self, drives: Vec<DriveConfig>) -> Vec<DriveConfig> {
        let graph = self.graph;
        let candidates: Vec<Candidate<'g>> = graph
            .disks
            .iter()
            .map(|disk| Candidate::device(disk))
            .collect();
        let searches: Vec<Option<&Search>> = drives.iter().map(|d| Some(&d.search)).collect();
        let outcomes = self.claim(&searches, &candidates, SearchScope::Drive, |_| Some(1));

        let mut resolved = Vec::with_capacity(drives.len());
        for (mut drive, outcome) in drives.into_iter().zip(outcomes) {
            match outcome {
                Some(Outcome::Found(sids)) => {
                    let sid = sids[0];
                    drive.search.device = Some(sid);
                    drive.partitions = self.partitions_of(drive.partitions, Some(sid));
                    resolved.push(drive);
                }
                Some(Outcome::Skip) => {}
                Some(Outcome::Missing | Outcome::Create) | None => resolved.push(drive),
            }
        }
        resolved
    }

    fn md_raids(&mut self, md_raids: Vec<MdRaidConfig>) -> Vec<MdRaidConfig> {
        let graph = self.graph;
        let candidates: Vec<Candidate<'g>> = graph
            .md_raids
            .iter()
            .map(|md| Candidate::device(md))
            .collect();
        let searches: Vec<Option<&Search>> = md_raids.iter().map(|md| md.search.as_ref()).collect();
        let outcomes = self.claim(&searches, &candidates, SearchScope::MdRaid, |_| Some(1));

        let mut resolved = Vec::with_capacity(md_raids.len());
        for (mut md, outcome) in md_raids.into_iter().zip(outcomes) {
            match outcome {
                Some(Outcome::Found(sids)) => {
                    let sid = sids[0];
                    if let Some(search) = md.search.as_mut() {
                        search.device = Some(sid);
                    }
                    md.partitions = self.partitions_of(md.partitions, Some(sid));
                    resolved.push(md);
                }
                Some(Outcome::Skip) => {}
                Some(Outcome::Create) => {
                    md.search = None;
                    md.partitions = self.partitions_of(md.partitions, None);
                    resolved.push(md);
                }
                Some(Outcome::Missing) => resolved.push(md),
                None => {
                    md.partitions = self.partitions_of(md.partitions, None);
                    resolved.push(md);
                }
            }
        }
        resolved
    }

    /// Resolves the partitions of `parent`; `None` for devices still to create
    fn partitions_of(
        &mut self,
        partitions: Vec<PartitionConfig>,
        parent: Option<Sid>,
    ) -> Vec<PartitionConfig> {
        let graph = self.graph;
        let candidates: Vec<Candidate<'g>> = parent
            .and_then(|sid| graph.partitionable(sid))
            .map(|device| device.partitions().iter().map(Candidate::partition).collect())
            .unwrap_or_default();
        let searches: Vec<Option<&Search>> =
            partitions.iter().map(|p| p.search.as_ref()).collect();
        let outcomes = self.claim(&searches, &candidates, SearchScope::Partition, |search| {
            search.max
        });

        let mut resolved = Vec::with_capacity(partitions.len());
        for (partition, outcome) in partitions.into_iter().zip(outcomes) {
            match outcome {
                Some(Outcome::Found(sids)) => {
                    for (index, sid) in sids.into_iter().enumerate() {
                        let mut expanded = partition.clone();
                        if index > 0 {
                            expanded.alias = None;
                        }
                        if let Some(search) = expanded.search.as_mut() {
                            search.device = Some(sid);
                        }
                        resolved.push(expanded);
                    }
                }
                Some(Outcome::Skip) => {}
                Some(Outcome::Create) => resolved.push(PartitionConfig {
                    search: None,
                    ..partition
                }),
                Some(Outcome::Missing) | None => resolved.push(partition),
            }
        }
        resolved
    }

    /// Claims devices for every search, returning one outcome per entry
    /// (`None` for entries without search)
    fn claim(
        &mut self,
        searches: &[Option<&Search>],
        candidates: &[Candidate<'_>],
        scope: SearchScope,
        limit: impl Fn(&Search) -> Option<usize>,
    ) -> Vec<Option<Outcome>> {
        let mut found: Vec<Option<Vec<Sid>>> = vec![None; searches.len()];
        for index in priority_order(searches) {
            if let Some(search) = searches[index] {
                found[index] = Some(self.take(search, candidates, limit(search)));
            }
        }

        found
            .into_iter()
            .zip(searches)
            .map(|(sids, search)| {
                let (sids, search) = (sids?, (*search)?);
                if sids.is_empty() {
                    Some(self.not_found(search, scope))
                } else {
                    Some(Outcome::Found(sids))
                }
            })
            .collect()
    }

    fn take(&mut self, search: &Search, candidates: &[Candidate<'_>], limit: Option<usize>) -> Vec<Sid> {
        if let Some(sid) = search.device {
            let known = candidates.iter().any(|candidate| candidate.sid == sid);
            return if known && self.claimed.insert(sid) {
                vec![sid]
            } else {
                Vec::new()
            };
        }

        let mut taken = Vec::new();
        for candidate in candidates {
            if limit.is_some_and(|limit| taken.len() >= limit) {
                break;
            }
            if !self.claimed.contains(&candidate.sid) && search.matches(&candidate.view) {
                debug!(
                    "search {} matched {}",
                    search.describe(),
                    candidate.view.name
                );
                self.claimed.insert(candidate.sid);
                taken.push(candidate.sid);
            }
        }
        taken
    }

    fn not_found(&mut self, search: &Search, scope: SearchScope) -> Outcome {
        let what = match scope {
            SearchScope::Drive => "drive",
            SearchScope::Partition => "partition",
            SearchScope::MdRaid => "MD RAID",
        };
        match search.effective_if_not_found(scope) {
            IfNotFound::Skip => {
                debug!("skipping {what} {}: not found", search.describe());
                Outcome::Skip
            }
            IfNotFound::Error => {
                self.issues.push(Issue::error(
                    IssueSource::Search,
                    format!("No {what} found for the search {}", search.describe()),
                ));
                Outcome::Missing
            }
            IfNotFound::Create => {
                debug!("{what} {} not found, creating a new one", search.describe());
                Outcome::Create
            }
        }
    }
}

/// Bound searches first, then specific ones, then match-all ones
fn priority_order(searches: &[Option<&Search>]) -> Vec<usize> {
    let rank = |search: &Search| {
        if search.is_resolved() {
            0
        } else if search.is_match_all() {
            2
        } else {
            1
        }
    };
    let mut order: Vec<(usize, u8)> = searches
        .iter()
        .enumerate()
        .filter_map(|(index, search)| search.map(|search| (index, rank(search))))
        .collect();
    order.sort_by_key(|(index, rank)| (*rank, *index));
    order.into_iter().map(|(index, _)| index).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storage_types::{
        ByteRange, Disk, GIB, MIB, PartitionId, PartitionTable, ProductSettings, PtableType,
    };

    use super::*;

    fn disk(graph: &mut Devicegraph, name: &str, size: u64, partitions: &[u64]) -> Sid {
        let sid = graph.allocate_sid();
        let mut disk = Disk::new(sid, name, size);
        if !partitions.is_empty() {
            let mut table = PartitionTable::new(PtableType::Gpt);
            let mut start = MIB;
            for (index, size) in partitions.iter().enumerate() {
                let number = index as u32 + 1;
                table.partitions.push(Partition {
                    sid: sid * 100 + number,
                    name: disk.partition_name(number),
                    number,
                    region: ByteRange::new(start, start + size),
                    id: PartitionId::Linux,
                    filesystem: None,
                    encryption: None,
                    resize_min: None,
                });
                start += size;
            }
            disk.partition_table = Some(table);
        }
        graph.disks.push(disk);
        sid
    }

    fn config(json: serde_json::Value) -> Config {
        Config::from_json(&json, &ProductSettings::default()).unwrap()
    }

    #[test]
    fn first_declared_drive_claims_the_device() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", 10 * GIB, &[]);

        let input = config(json!({ "drives": [{ "search": "*" }, { "search": "*" }] }));
        let resolution = resolve(&input, &graph);

        assert_eq!(resolution.config.drives.len(), 2);
        assert_eq!(resolution.config.drives[0].search.device, Some(sda));
        assert_eq!(resolution.config.drives[1].search.device, None);
        assert_eq!(resolution.issues.len(), 1);
        assert_eq!(resolution.issues[0].source, IssueSource::Search);
    }

    #[test]
    fn specific_searches_claim_before_match_all() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", 10 * GIB, &[]);
        let sdb = disk(&mut graph, "/dev/sdb", 10 * GIB, &[]);

        let input = config(json!({ "drives": [{ "search": "*" }, { "search": "/dev/sda" }] }));
        let resolution = resolve(&input, &graph);

        assert!(resolution.issues.is_empty());
        assert_eq!(resolution.config.drives[0].search.device, Some(sdb));
        assert_eq!(resolution.config.drives[1].search.device, Some(sda));
    }

    #[test]
    fn skipped_drives_disappear() {
        let graph = Devicegraph::new();
        let input = config(json!({
            "drives": [{ "search": { "condition": { "name": "/dev/vdz" }, "ifNotFound": "skip" } }]
        }));
        let resolution = resolve(&input, &graph);
        assert!(resolution.config.drives.is_empty());
        assert!(resolution.issues.is_empty());
    }

    #[test]
    fn condition_on_size_picks_the_matching_disk() {
        let mut graph = Devicegraph::new();
        disk(&mut graph, "/dev/vda", 5 * GIB, &[]);
        let vdb = disk(&mut graph, "/dev/vdb", 50 * GIB, &[]);

        let input = config(json!({
            "drives": [{ "search": { "condition": { "size": { "min": "20 GiB" } } } }]
        }));
        let resolution = resolve(&input, &graph);
        assert_eq!(resolution.config.drives[0].search.device, Some(vdb));
    }

    #[test]
    fn partition_searches_expand_up_to_max() {
        let mut graph = Devicegraph::new();
        disk(&mut graph, "/dev/vda", 20 * GIB, &[GIB, GIB, GIB]);

        let input = config(json!({
            "drives": [{
                "partitions": [
                    { "search": { "max": 2 }, "delete": true, "alias": "old" },
                    { "search": "*", "deleteIfNeeded": true }
                ]
            }]
        }));
        let resolution = resolve(&input, &graph);
        let partitions = &resolution.config.drives[0].partitions;

        let devices: Vec<Option<Sid>> = partitions.iter().map(|p| p.found_device()).collect();
        assert_eq!(devices, vec![Some(101), Some(102), Some(103)]);
        assert_eq!(partitions[0].alias.as_deref(), Some("old"));
        assert_eq!(partitions[1].alias, None);
        assert!(partitions[0].delete && partitions[1].delete);
        assert!(partitions[2].delete_if_needed);
    }

    #[test]
    fn missing_partitions_follow_their_policy() {
        let mut graph = Devicegraph::new();
        disk(&mut graph, "/dev/vda", 20 * GIB, &[GIB]);

        let input = config(json!({
            "drives": [{
                "partitions": [
                    { "search": "/dev/vda1" },
                    { "search": "*", "delete": true },
                    { "search": { "condition": { "name": "/dev/vda7" }, "ifNotFound": "create" },
                      "mount": { "path": "/srv" } },
                    { "search": "/dev/vda9" }
                ]
            }]
        }));
        let resolution = resolve(&input, &graph);
        let partitions = &resolution.config.drives[0].partitions;

        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].found_device(), Some(101));
        assert!(partitions[1].is_new());
        assert_eq!(partitions[1].content.mount_path(), Some("/srv"));
        assert!(partitions[2].search.is_some());
        assert_eq!(partitions[2].found_device(), None);
        assert_eq!(resolution.issues.len(), 1);
        assert!(resolution.issues[0].message.contains("/dev/vda9"));
    }

    #[test]
    fn resolving_twice_gives_the_same_result() {
        let mut graph = Devicegraph::new();
        disk(&mut graph, "/dev/sda", 10 * GIB, &[GIB, GIB]);
        disk(&mut graph, "/dev/sdb", 10 * GIB, &[]);

        let input = config(json!({
            "drives": [
                { "search": "*", "partitions": [{ "search": "*", "deleteIfNeeded": true }] },
                { "search": "/dev/sda" }
            ]
        }));
        let first = resolve(&input, &graph);
        let second = resolve(&first.config, &graph);

        assert_eq!(first, second);
        assert_eq!(input.drives[0].search.device, None);
    }
}
