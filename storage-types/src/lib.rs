// SPDX-License-Identifier: GPL-3.0-only

//! Shared data types of the storage proposal engine
//!
//! This crate defines the types every other crate of the stack works with:
//!
//! - **storage-proposal**: resolves a [`Config`] against a [`Devicegraph`]
//!   and produces a target devicegraph plus [`Issue`]s
//! - **storage-sys**: probes and activates the transport devices described in
//!   [`activation`]
//! - **storage-cli**: reads configs, inventories and [`ProductSettings`] and
//!   prints the [`layout`] export
//!
//! ## Architecture
//!
//! ### Config (what the user wants)
//! - [`Config`] → drives, MD RAIDs and volume groups with search conditions
//! - JSON conversion in both directions, defaults from [`ProductSettings`]
//!
//! ### Devicegraph (what the machine has)
//! - [`Devicegraph`] → disks, MD RAIDs, partitions, volume groups and logical
//!   volumes, with their filesystems and encryption layers
//!
//! No I/O happens here besides reading the JSON and TOML documents.

pub mod activation;
pub mod common;
pub mod config;
pub mod devicegraph;
pub mod error;
pub mod issue;
pub mod layout;
pub mod settings;

pub use activation::{
    DasdDevice, IscsiAuth, IscsiNode, StartupMode, ZfcpController, ZfcpDisk,
};
pub use common::{
    ByteRange, GIB, GPT_ALIGNMENT_BYTES, KIB, MIB, PIB, TIB, align_down, align_up,
    bytes_to_pretty, parse_size,
};
pub use config::{
    BootConfig, Config, ContentConfig, DriveConfig, EncryptionConfig, FilesystemConfig,
    IfNotFound, LogicalVolumeConfig, MdRaidConfig, MountConfig, PartitionConfig,
    PhysicalVolumeConfig, Search, SearchCandidate, SearchCondition, SearchMatcher, SearchScope,
    SizeConfig, SpacePolicy, VolumeGroupConfig,
};
pub use devicegraph::{
    ContentMut, DEFAULT_EXTENT_SIZE, DeviceKind, Devicegraph, Disk, DiskKind, Encryption,
    EncryptionMethod, Filesystem, FilesystemType, LogicalVolume, MdLevel, MdRaid, MountBy,
    Partition, PartitionId, PartitionTable, Partitionable, PbkdFunction, PtableType, Sid,
    VolumeGroup,
};
pub use error::{ConfigError, Result};
pub use issue::{Issue, IssueSeverity, IssueSource, has_errors};
pub use layout::{DeviceClass, DeviceInfo, export_layout};
pub use settings::{
    ActivationSettings, Architecture, BootSettings, ProductSettings, StorageDefaults,
    VolumeTemplate,
};
