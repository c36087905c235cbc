//! Product settings
//!
//! Product-level defaults consumed when converting a storage config: which
//! filesystem each mount path gets, default sizes, encryption defaults, the
//! boot architecture and the tuning of device activation. Loaded from TOML:
//!
//! ```toml
//! [storage]
//! ptable_type = "gpt"
//! encryption_method = "luks2"
//!
//! [[volumes]]
//! mount_path = "/"
//! filesystem = "btrfs"
//! snapshots = true
//! min_size = "5 GiB"
//!
//! [boot]
//! arch = "x86_64"
//! efi = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::{GIB, MIB, parse_size};
use crate::devicegraph::{
    DEFAULT_EXTENT_SIZE, EncryptionMethod, FilesystemType, PbkdFunction, PtableType,
};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductSettings {
    pub storage: StorageDefaults,
    pub volumes: Vec<VolumeTemplate>,
    pub boot: BootSettings,
    pub activation: ActivationSettings,
}

impl Default for ProductSettings {
    fn default() -> Self {
        Self {
            storage: StorageDefaults::default(),
            volumes: vec![
                VolumeTemplate {
                    mount_path: "/".to_string(),
                    filesystem: FilesystemType::Btrfs,
                    snapshots: true,
                    min_size: 5 * GIB,
                    max_size: None,
                    mount_options: Vec::new(),
                },
                VolumeTemplate {
                    mount_path: "/home".to_string(),
                    filesystem: FilesystemType::Xfs,
                    snapshots: false,
                    min_size: 5 * GIB,
                    max_size: None,
                    mount_options: Vec::new(),
                },
                VolumeTemplate {
                    mount_path: "swap".to_string(),
                    filesystem: FilesystemType::Swap,
                    snapshots: false,
                    min_size: GIB,
                    max_size: Some(2 * GIB),
                    mount_options: Vec::new(),
                },
            ],
            boot: BootSettings::default(),
            activation: ActivationSettings::default(),
        }
    }
}

impl ProductSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Volume template for a mount path ("swap" for swap)
    pub fn volume_for(&self, mount_path: &str) -> Option<&VolumeTemplate> {
        self.volumes.iter().find(|v| v.mount_path == mount_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageDefaults {
    pub ptable_type: PtableType,
    pub encryption_method: EncryptionMethod,
    pub pbkd_function: PbkdFunction,

    /// Filesystem for mount paths without a volume template
    pub filesystem: FilesystemType,

    #[serde(deserialize_with = "size_field")]
    pub extent_size: u64,

    /// Size of new partitions with neither explicit nor template size
    #[serde(deserialize_with = "size_field")]
    pub min_partition_size: u64,
}

impl Default for StorageDefaults {
    fn default() -> Self {
        Self {
            ptable_type: PtableType::Gpt,
            encryption_method: EncryptionMethod::Luks2,
            pbkd_function: PbkdFunction::Argon2id,
            filesystem: FilesystemType::Ext4,
            extent_size: DEFAULT_EXTENT_SIZE,
            min_partition_size: 100 * MIB,
        }
    }
}

/// Product outline of a volume (default filesystem and size for a mount path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTemplate {
    pub mount_path: String,
    pub filesystem: FilesystemType,

    #[serde(default)]
    pub snapshots: bool,

    #[serde(deserialize_with = "size_field")]
    pub min_size: u64,

    #[serde(default, deserialize_with = "optional_size_field")]
    pub max_size: Option<u64>,

    #[serde(default)]
    pub mount_options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "aarch64")]
    Aarch64,
    #[serde(rename = "ppc64le")]
    Ppc64le,
    #[serde(rename = "s390x")]
    S390x,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootSettings {
    pub arch: Architecture,

    /// Whether the machine boots through UEFI firmware
    pub efi: bool,
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            arch: Architecture::X86_64,
            efi: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationSettings {
    pub format_poll_interval_ms: u64,
    pub format_start_timeout_ms: u64,
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            format_poll_interval_ms: 500,
            format_start_timeout_ms: 5_000,
        }
    }
}

impl ActivationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.format_poll_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.format_start_timeout_ms)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

impl RawSize {
    fn bytes<E: serde::de::Error>(self) -> std::result::Result<u64, E> {
        match self {
            RawSize::Bytes(bytes) => Ok(bytes),
            RawSize::Text(text) => {
                parse_size(&text).ok_or_else(|| E::custom(format!("invalid size: {text}")))
            }
        }
    }
}

fn size_field<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    RawSize::deserialize(deserializer)?.bytes()
}

fn optional_size_field<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<RawSize>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawSize::Text(text)) if text == "unlimited" => Ok(None),
        Some(raw) => raw.bytes().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_describe_a_btrfs_root() {
        let settings = ProductSettings::default();
        let root = settings.volume_for("/").unwrap();
        assert_eq!(root.filesystem, FilesystemType::Btrfs);
        assert!(root.snapshots);
        assert!(settings.volume_for("/srv").is_none());
    }

    #[test]
    fn parses_sizes_written_as_text() {
        let settings = ProductSettings::from_toml_str(
            r#"
            [storage]
            ptable_type = "msdos"
            extent_size = "8 MiB"

            [[volumes]]
            mount_path = "/"
            filesystem = "xfs"
            min_size = "10 GiB"
            max_size = "unlimited"

            [boot]
            arch = "s390x"
            efi = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.storage.ptable_type, PtableType::Msdos);
        assert_eq!(settings.storage.extent_size, 8 * MIB);
        assert_eq!(settings.storage.encryption_method, EncryptionMethod::Luks2);
        assert_eq!(settings.volumes[0].min_size, 10 * GIB);
        assert_eq!(settings.volumes[0].max_size, None);
        assert_eq!(settings.boot.arch, Architecture::S390x);
        assert_eq!(settings.activation.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_unparsable_sizes() {
        let result = ProductSettings::from_toml_str(
            r#"
            [[volumes]]
            mount_path = "/"
            filesystem = "xfs"
            min_size = "ten gigs"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[activation]\nformat_poll_interval_ms = 10").unwrap();

        let settings = ProductSettings::load(file.path()).unwrap();
        assert_eq!(settings.activation.format_poll_interval_ms, 10);
        assert_eq!(settings.activation.format_start_timeout_ms, 5_000);
    }
}
