// SPDX-License-Identifier: GPL-3.0-only

//! Semantic checks of a storage config, run before searching

use std::collections::{BTreeMap, BTreeSet};

use storage_contracts::Validation;
use storage_types::{Config, Issue, IssueSource, MdLevel, PartitionConfig, PhysicalVolumeConfig};

pub struct ConfigChecker<'a> {
    config: &'a Config,
}

impl<'a> ConfigChecker<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn check_aliases(&self, issues: &mut Vec<Issue>) {
        let mut seen = BTreeSet::new();
        for alias in self.config.aliases() {
            if !seen.insert(alias) {
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!("The alias '{alias}' is used by more than one device"),
                ));
            }
        }

        let known: BTreeSet<&str> = self.config.aliases().into_iter().collect();
        let drives: BTreeSet<&str> = self
            .config
            .drives
            .iter()
            .filter_map(|drive| drive.alias.as_deref())
            .collect();
        let mut unknown = |alias: &str, what: &str, expected: &BTreeSet<&str>| {
            if !expected.contains(alias) {
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!("There is no {what} with alias '{alias}'"),
                ));
            }
        };

        for vg in &self.config.volume_groups {
            for pv in &vg.physical_volumes {
                match pv {
                    PhysicalVolumeConfig::Alias(alias) => unknown(alias, "device", &known),
                    PhysicalVolumeConfig::Generate(targets) => {
                        for target in targets {
                            unknown(target, "drive", &drives);
                        }
                    }
                }
            }
        }
        for md in &self.config.md_raids {
            for member in &md.devices {
                unknown(member, "device", &known);
            }
        }
        if let Some(device) = &self.config.boot.device {
            unknown(device, "drive", &drives);
        }
    }

    fn check_volume_groups(&self, issues: &mut Vec<Issue>) {
        for vg in &self.config.volume_groups {
            if vg.physical_volumes.is_empty() {
                let name = vg.name.as_deref().unwrap_or("without name");
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!("The volume group {name} has no physical volumes"),
                ));
            }
        }
    }

    fn check_md_raids(&self, issues: &mut Vec<Issue>) {
        for md in self.config.md_raids.iter().filter(|md| md.is_new()) {
            let level = md.level.unwrap_or(MdLevel::Raid1);
            if md.devices.len() < level.min_devices() {
                let name = md.alias.as_deref().or(md.name.as_deref()).unwrap_or("new");
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!(
                        "The MD RAID {name} needs at least {} devices for {}",
                        level.min_devices(),
                        level.as_str()
                    ),
                ));
            }
        }
    }

    fn check_mount_paths(&self, issues: &mut Vec<Issue>) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, content) in self.config.contents() {
            if let Some(path) = content.mount_path() {
                *counts.entry(path).or_default() += 1;
            }
        }
        for (path, count) in counts {
            if count > 1 {
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!("The mount point {path} is used by {count} devices"),
                ));
            }
        }
    }

    fn check_encryption(&self, issues: &mut Vec<Issue>) {
        for (kind, content) in self.config.contents() {
            let Some(encryption) = &content.encryption else {
                continue;
            };
            if encryption.needs_password() && encryption.password.is_none() {
                let method = encryption.method.map(|m| m.as_str()).unwrap_or_default();
                let target = content
                    .mount_path()
                    .map(|path| format!(" for {path}"))
                    .unwrap_or_default();
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!("No passphrase provided for the {method} encrypted {kind}{target}"),
                ));
            }
        }
    }

    fn check_partitions(&self, issues: &mut Vec<Issue>) {
        let conflicting = |partition: &PartitionConfig| partition.is_new() && partition.is_deletion();

        for drive in &self.config.drives {
            if drive.is_used_directly() && !drive.partitions.is_empty() {
                issues.push(Issue::error(
                    IssueSource::Config,
                    format!(
                        "The drive {} is formatted directly but also has partitions",
                        drive.search.describe()
                    ),
                ));
            }
        }

        let partitions = self
            .config
            .drives
            .iter()
            .flat_map(|drive| &drive.partitions)
            .chain(self.config.md_raids.iter().flat_map(|md| &md.partitions));
        for partition in partitions.filter(|p| conflicting(p)) {
            let name = partition.alias.as_deref().unwrap_or("without alias");
            issues.push(Issue::error(
                IssueSource::Config,
                format!("The new partition {name} cannot be deleted"),
            ));
        }
    }
}

impl Validation for ConfigChecker<'_> {
    fn validate(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        self.check_aliases(&mut issues);
        self.check_volume_groups(&mut issues);
        self.check_md_raids(&mut issues);
        self.check_mount_paths(&mut issues);
        self.check_encryption(&mut issues);
        self.check_partitions(&mut issues);
        issues
    }
}
