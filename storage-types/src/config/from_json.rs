//! JSON to config conversion
//!
//! Every element starts from its default value; keys present in the JSON
//! override it. Unknown keys and malformed values are ignored, leaving the
//! default in place. Once an element is read, the values it left unset are
//! completed from the product settings (volume templates, encryption
//! defaults).

use std::path::Path;

use serde_json::Value;

use super::{
    BootConfig, Config, ContentConfig, DriveConfig, EncryptionConfig, FilesystemConfig,
    LogicalVolumeConfig, MdRaidConfig, PartitionConfig, PhysicalVolumeConfig, Search,
    SizeConfig, SpacePolicy, VolumeGroupConfig,
};
use crate::devicegraph::{
    EncryptionMethod, FilesystemType, MdLevel, PartitionId, PbkdFunction, PtableType,
};
use crate::error::{ConfigError, Result};
use crate::settings::ProductSettings;

impl Config {
    pub fn from_json(json: &Value, settings: &ProductSettings) -> Result<Self> {
        let root = json.as_object().ok_or_else(|| {
            ConfigError::InvalidDocument("the storage config must be a JSON object".to_string())
        })?;

        let mut converter = Converter {
            settings,
            encryption: None,
        };
        if let Some(encryption) = root.get("encryption").and_then(EncryptionConfig::from_json) {
            converter.encryption = Some(encryption);
        }

        let mut config = Config {
            encryption: converter.encryption.clone(),
            ..Config::default()
        };
        for (key, value) in root {
            match key.as_str() {
                "drives" => config.drives = converter.list(value, Converter::drive),
                "mdRaids" => config.md_raids = converter.list(value, Converter::md_raid),
                "volumeGroups" => {
                    config.volume_groups = converter.list(value, Converter::volume_group)
                }
                "boot" => config.boot = boot(value),
                "encryption" => {}
                other => tracing::debug!("ignoring unknown config key {other}"),
            }
        }
        Ok(config)
    }

    pub fn from_json_str(raw: &str, settings: &ProductSettings) -> Result<Self> {
        let json: Value = serde_json::from_str(raw)?;
        Self::from_json(&json, settings)
    }

    pub fn load(path: &Path, settings: &ProductSettings) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, settings)
    }
}

struct Converter<'a> {
    settings: &'a ProductSettings,

    /// Top-level encryption of the config
    encryption: Option<EncryptionConfig>,
}

impl Converter<'_> {
    fn list<T>(&self, value: &Value, convert: fn(&Self, &Value) -> Option<T>) -> Vec<T> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(|item| convert(self, item)).collect())
            .unwrap_or_default()
    }

    fn drive(&self, value: &Value) -> Option<DriveConfig> {
        let map = value.as_object()?;
        let mut drive = DriveConfig::default();
        for (key, value) in map {
            match key.as_str() {
                "search" => {
                    if let Some(search) = Search::from_json(value) {
                        drive.search = search;
                    }
                }
                "alias" => drive.alias = value.as_str().map(str::to_string),
                "ptableType" => drive.ptable_type = value.as_str().and_then(PtableType::parse),
                "spacePolicy" => drive.space_policy = value.as_str().and_then(SpacePolicy::parse),
                "partitions" => drive.partitions = self.list(value, Converter::partition),
                key => drive.content.read_key(key, value),
            }
        }
        self.complete_content(&mut drive.content);
        Some(drive)
    }

    fn partition(&self, value: &Value) -> Option<PartitionConfig> {
        let map = value.as_object()?;
        let mut partition = PartitionConfig::default();
        for (key, value) in map {
            match key.as_str() {
                "search" => partition.search = Search::from_json(value),
                "alias" => partition.alias = value.as_str().map(str::to_string),
                "id" => partition.id = value.as_str().and_then(PartitionId::parse),
                "size" => {
                    if let Some(size) = SizeConfig::from_json(value) {
                        partition.size = size;
                    }
                }
                "delete" => partition.delete = value.as_bool().unwrap_or(false),
                "deleteIfNeeded" => partition.delete_if_needed = value.as_bool().unwrap_or(false),
                key => partition.content.read_key(key, value),
            }
        }
        self.complete_content(&mut partition.content);
        self.complete_size(&mut partition.size, &partition.content);
        Some(partition)
    }

    fn md_raid(&self, value: &Value) -> Option<MdRaidConfig> {
        let map = value.as_object()?;
        let mut md = MdRaidConfig::default();
        for (key, value) in map {
            match key.as_str() {
                "search" => md.search = Search::from_json(value),
                "alias" => md.alias = value.as_str().map(str::to_string),
                "name" => md.name = value.as_str().map(str::to_string),
                "level" => md.level = value.as_str().and_then(MdLevel::parse),
                "chunkSize" => {
                    md.chunk_size = SizeConfig::from_json(value).map(|size| size.min)
                }
                "devices" => md.devices = aliases(value),
                "ptableType" => md.ptable_type = value.as_str().and_then(PtableType::parse),
                "spacePolicy" => md.space_policy = value.as_str().and_then(SpacePolicy::parse),
                "partitions" => md.partitions = self.list(value, Converter::partition),
                key => md.content.read_key(key, value),
            }
        }
        self.complete_content(&mut md.content);
        Some(md)
    }

    fn volume_group(&self, value: &Value) -> Option<VolumeGroupConfig> {
        let map = value.as_object()?;
        let mut vg = VolumeGroupConfig::default();
        for (key, value) in map {
            match key.as_str() {
                "name" => vg.name = value.as_str().map(str::to_string),
                "extentSize" => {
                    vg.extent_size = SizeConfig::from_json(value).map(|size| size.min)
                }
                "physicalVolumes" => {
                    vg.physical_volumes = value
                        .as_array()
                        .map(|items| items.iter().filter_map(physical_volume).collect())
                        .unwrap_or_default()
                }
                "logicalVolumes" => {
                    vg.logical_volumes = self.list(value, Converter::logical_volume)
                }
                _ => {}
            }
        }
        Some(vg)
    }

    fn logical_volume(&self, value: &Value) -> Option<LogicalVolumeConfig> {
        let map = value.as_object()?;
        let mut lv = LogicalVolumeConfig::default();
        for (key, value) in map {
            match key.as_str() {
                "name" => lv.name = value.as_str().map(str::to_string),
                "alias" => lv.alias = value.as_str().map(str::to_string),
                "size" => {
                    if let Some(size) = SizeConfig::from_json(value) {
                        lv.size = size;
                    }
                }
                "stripes" => lv.stripes = value.as_u64().map(|stripes| stripes as u32),
                "stripeSize" => {
                    lv.stripe_size = SizeConfig::from_json(value).map(|size| size.min)
                }
                key => lv.content.read_key(key, value),
            }
        }
        self.complete_content(&mut lv.content);
        self.complete_size(&mut lv.size, &lv.content);
        Some(lv)
    }

    /// Fills filesystem and encryption values the element left unset
    fn complete_content(&self, content: &mut ContentConfig) {
        let template_key = match (content.mount_path(), content.fs_type()) {
            (_, Some(FilesystemType::Swap)) => Some("swap".to_string()),
            (Some(path), _) => Some(path.to_string()),
            (None, _) => None,
        };
        let template = template_key
            .as_deref()
            .and_then(|key| self.settings.volume_for(key));

        if content.filesystem.is_none() && content.mount_path().is_some() {
            content.filesystem = Some(FilesystemConfig {
                implied: true,
                ..FilesystemConfig::default()
            });
        }
        if let Some(filesystem) = content.filesystem.as_mut() {
            if filesystem.fs_type.is_none() {
                filesystem.fs_type = Some(
                    template
                        .map(|template| template.filesystem)
                        .unwrap_or(self.settings.storage.filesystem),
                );
                filesystem.type_filled = true;
            }
            if filesystem.fs_type == Some(FilesystemType::Btrfs) && filesystem.snapshots.is_none()
            {
                filesystem.snapshots = template
                    .filter(|template| template.filesystem == FilesystemType::Btrfs)
                    .map(|template| template.snapshots);
                filesystem.snapshots_filled = filesystem.snapshots.is_some();
            }
        }

        if let Some(encryption) = content.encryption.as_mut() {
            if let Some(parent) = &self.encryption {
                encryption.inherit(parent);
            }
            encryption.fill_method(self.settings.storage.encryption_method);
            if encryption.needs_password() {
                let pbkd_function = match encryption.method {
                    Some(EncryptionMethod::Luks1) => PbkdFunction::Pbkdf2,
                    _ => self.settings.storage.pbkd_function,
                };
                encryption.fill_pbkd_function(pbkd_function);
            }
        }
    }

    /// Takes the bounds of a default size from the volume template
    fn complete_size(&self, size: &mut SizeConfig, content: &ContentConfig) {
        if !size.default {
            return;
        }
        let template = match content.fs_type() {
            Some(FilesystemType::Swap) => self.settings.volume_for("swap"),
            _ => content
                .mount_path()
                .and_then(|path| self.settings.volume_for(path)),
        };
        match template {
            Some(template) => {
                size.min = template.min_size;
                size.max = template.max_size;
            }
            None => {
                size.min = self.settings.storage.min_partition_size;
                size.max = None;
            }
        }
    }
}

fn physical_volume(value: &Value) -> Option<PhysicalVolumeConfig> {
    match value {
        Value::String(alias) => Some(PhysicalVolumeConfig::Alias(alias.clone())),
        Value::Object(map) => map
            .get("generate")
            .map(|targets| PhysicalVolumeConfig::Generate(aliases(targets))),
        _ => None,
    }
}

fn boot(value: &Value) -> BootConfig {
    let mut boot = BootConfig::default();
    if let Some(map) = value.as_object() {
        for (key, value) in map {
            match key.as_str() {
                "configure" => boot.configure = value.as_bool(),
                "device" => boot.device = value.as_str().map(str::to_string),
                _ => {}
            }
        }
    }
    boot
}

fn aliases(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
