//! Storage config model
//!
//! Declarative description of the wanted storage layout: drives with their
//! partitions, MD RAIDs, LVM volume groups, boot settings and encryption
//! defaults. Elements bind to existing devices through a [`Search`]; the
//! resolver records the matched device in [`Search::device`].
//!
//! The JSON form is converted by [`Config::from_json`] (filling defaults from
//! [`ProductSettings`](crate::ProductSettings)) and [`Config::to_json`].

mod format;
mod from_json;
mod search;
mod size;
mod to_json;

pub use format::{ContentConfig, EncryptionConfig, FilesystemConfig, MountConfig};
pub use search::{
    IfNotFound, Search, SearchCandidate, SearchCondition, SearchMatcher, SearchScope, glob_match,
};
pub use size::SizeConfig;

use crate::devicegraph::{MdLevel, PartitionId, PtableType, Sid};

/// What may happen to the existing content of a drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SpacePolicy {
    /// Never touch partitions the config does not mention
    #[default]
    Keep,

    /// Delete untouched partitions when space is needed
    Delete,

    /// Shrink untouched partitions when space is needed
    Resize,
}

impl SpacePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Delete => "delete",
            Self::Resize => "resize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keep" => Some(Self::Keep),
            "delete" => Some(Self::Delete),
            "resize" => Some(Self::Resize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub drives: Vec<DriveConfig>,
    pub md_raids: Vec<MdRaidConfig>,
    pub volume_groups: Vec<VolumeGroupConfig>,
    pub boot: BootConfig,

    /// Defaults for every encryption object of the config
    pub encryption: Option<EncryptionConfig>,
}

impl Config {
    /// Every alias declared in the config, in declaration order
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases = Vec::new();
        for drive in &self.drives {
            aliases.extend(drive.alias.as_deref());
            aliases.extend(drive.partitions.iter().filter_map(|p| p.alias.as_deref()));
        }
        for md in &self.md_raids {
            aliases.extend(md.alias.as_deref());
            aliases.extend(md.partitions.iter().filter_map(|p| p.alias.as_deref()));
        }
        for vg in &self.volume_groups {
            aliases.extend(vg.logical_volumes.iter().filter_map(|lv| lv.alias.as_deref()));
        }
        aliases
    }

    pub fn drive_by_alias(&self, alias: &str) -> Option<&DriveConfig> {
        self.drives
            .iter()
            .find(|drive| drive.alias.as_deref() == Some(alias))
    }

    /// Content of every element, with the kind of element holding it
    pub fn contents(&self) -> Vec<(&'static str, &ContentConfig)> {
        let mut contents = Vec::new();
        for drive in &self.drives {
            contents.push(("drive", &drive.content));
            contents.extend(drive.partitions.iter().map(|p| ("partition", &p.content)));
        }
        for md in &self.md_raids {
            contents.push(("MD RAID", &md.content));
            contents.extend(md.partitions.iter().map(|p| ("partition", &p.content)));
        }
        for vg in &self.volume_groups {
            contents.extend(
                vg.logical_volumes
                    .iter()
                    .map(|lv| ("logical volume", &lv.content)),
            );
        }
        contents
    }

    /// Index of the drive holding the root filesystem, directly or through
    /// one of its partitions
    pub fn root_drive(&self) -> Option<usize> {
        self.drives.iter().position(|drive| {
            drive.content.mount_path() == Some("/")
                || drive
                    .partitions
                    .iter()
                    .any(|p| p.content.mount_path() == Some("/"))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveConfig {
    pub search: Search,
    pub alias: Option<String>,
    pub ptable_type: Option<PtableType>,
    pub space_policy: Option<SpacePolicy>,
    pub partitions: Vec<PartitionConfig>,

    /// Content when the whole drive is used without partition table
    pub content: ContentConfig,
}

impl DriveConfig {
    pub fn effective_space_policy(&self) -> SpacePolicy {
        self.space_policy.unwrap_or_default()
    }

    /// Whether the drive itself gets formatted or encrypted
    pub fn is_used_directly(&self) -> bool {
        !self.content.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionConfig {
    /// `None` for partitions to create
    pub search: Option<Search>,
    pub alias: Option<String>,
    pub id: Option<PartitionId>,
    pub size: SizeConfig,
    pub delete: bool,
    pub delete_if_needed: bool,
    pub content: ContentConfig,
}

impl PartitionConfig {
    pub fn is_new(&self) -> bool {
        self.search.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.delete || self.delete_if_needed
    }

    /// Existing partition kept by the config
    pub fn is_reused(&self) -> bool {
        self.search.is_some() && !self.is_deletion()
    }

    pub fn found_device(&self) -> Option<Sid> {
        self.search.as_ref().and_then(|search| search.device)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MdRaidConfig {
    /// `None` for arrays to create from `devices`
    pub search: Option<Search>,
    pub alias: Option<String>,
    pub name: Option<String>,
    pub level: Option<MdLevel>,
    pub chunk_size: Option<u64>,

    /// Aliases of the member devices
    pub devices: Vec<String>,

    pub ptable_type: Option<PtableType>,
    pub space_policy: Option<SpacePolicy>,
    pub partitions: Vec<PartitionConfig>,
    pub content: ContentConfig,
}

impl MdRaidConfig {
    pub fn is_new(&self) -> bool {
        self.search.is_none()
    }
}

/// Physical volume of a volume group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhysicalVolumeConfig {
    /// Alias of a drive, partition or MD RAID
    Alias(String),

    /// New PV partitions on each of the aliased drives
    Generate(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeGroupConfig {
    pub name: Option<String>,
    pub extent_size: Option<u64>,
    pub physical_volumes: Vec<PhysicalVolumeConfig>,
    pub logical_volumes: Vec<LogicalVolumeConfig>,
}

impl VolumeGroupConfig {
    /// Aliases of all drives and devices the volume group depends on
    pub fn referenced_aliases(&self) -> impl Iterator<Item = &str> {
        self.physical_volumes
            .iter()
            .flat_map(|pv| match pv {
                PhysicalVolumeConfig::Alias(alias) => std::slice::from_ref(alias).iter(),
                PhysicalVolumeConfig::Generate(targets) => targets.iter(),
            })
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalVolumeConfig {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub size: SizeConfig,
    pub stripes: Option<u32>,
    pub stripe_size: Option<u64>,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootConfig {
    /// Whether boot partitions get proposed (default true)
    pub configure: Option<bool>,

    /// Alias of the boot drive
    pub device: Option<String>,
}

impl BootConfig {
    pub fn is_configured(&self) -> bool {
        self.configure.unwrap_or(true)
    }

    pub fn is_default(&self) -> bool {
        self.configure.is_none() && self.device.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_root_drive_through_partitions() {
        let config = Config {
            drives: vec![
                DriveConfig::default(),
                DriveConfig {
                    partitions: vec![PartitionConfig {
                        content: ContentConfig {
                            mount: Some(MountConfig::at("/")),
                            ..ContentConfig::default()
                        },
                        ..PartitionConfig::default()
                    }],
                    ..DriveConfig::default()
                },
            ],
            ..Config::default()
        };
        assert_eq!(config.root_drive(), Some(1));
    }

    #[test]
    fn partitions_classify_by_search_and_flags() {
        let new = PartitionConfig::default();
        assert!(new.is_new());
        assert!(!new.is_reused());

        let reused = PartitionConfig {
            search: Some(Search::by_name("/dev/vda2")),
            ..PartitionConfig::default()
        };
        assert!(reused.is_reused());

        let deleted = PartitionConfig {
            delete: true,
            ..reused
        };
        assert!(deleted.is_deletion());
        assert!(!deleted.is_reused());
    }

    #[test]
    fn volume_group_lists_generate_targets() {
        let vg = VolumeGroupConfig {
            physical_volumes: vec![
                PhysicalVolumeConfig::Alias("pv1".to_string()),
                PhysicalVolumeConfig::Generate(vec!["disk1".to_string(), "disk2".to_string()]),
            ],
            ..VolumeGroupConfig::default()
        };
        let aliases: Vec<&str> = vg.referenced_aliases().collect();
        assert_eq!(aliases, vec!["pv1", "disk1", "disk2"]);
    }
}
