//! Filesystem and encryption layers of a block device

use serde::{Deserialize, Serialize};

/// Filesystem types known to the proposal engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    Btrfs,
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Vfat,
    Swap,
    Exfat,
    Ntfs,
    Bcachefs,
    F2fs,
}

impl FilesystemType {
    pub const ALL: [FilesystemType; 11] = [
        FilesystemType::Btrfs,
        FilesystemType::Ext2,
        FilesystemType::Ext3,
        FilesystemType::Ext4,
        FilesystemType::Xfs,
        FilesystemType::Vfat,
        FilesystemType::Swap,
        FilesystemType::Exfat,
        FilesystemType::Ntfs,
        FilesystemType::Bcachefs,
        FilesystemType::F2fs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Btrfs => "btrfs",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Vfat => "vfat",
            Self::Swap => "swap",
            Self::Exfat => "exfat",
            Self::Ntfs => "ntfs",
            Self::Bcachefs => "bcachefs",
            Self::F2fs => "f2fs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|fs| fs.as_str() == s)
    }
}

/// How a filesystem is referenced in fstab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountBy {
    Device,
    Id,
    Label,
    Path,
    Uuid,
}

impl MountBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Id => "id",
            Self::Label => "label",
            Self::Path => "path",
            Self::Uuid => "uuid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "device" => Some(Self::Device),
            "id" => Some(Self::Id),
            "label" => Some(Self::Label),
            "path" => Some(Self::Path),
            "uuid" => Some(Self::Uuid),
            _ => None,
        }
    }
}

/// A filesystem living on a block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filesystem {
    pub fs_type: FilesystemType,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub mount_path: Option<String>,

    #[serde(default)]
    pub mount_options: Vec<String>,

    #[serde(default)]
    pub mount_by: Option<MountBy>,

    /// Btrfs only: snapper snapshots configured for this filesystem
    #[serde(default)]
    pub snapshots: bool,
}

impl Filesystem {
    pub fn new(fs_type: FilesystemType) -> Self {
        Self {
            fs_type,
            label: None,
            mount_path: None,
            mount_options: Vec::new(),
            mount_by: None,
            snapshots: false,
        }
    }

    pub fn is_mounted_at(&self, path: &str) -> bool {
        self.mount_path.as_deref() == Some(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMethod {
    Luks1,
    Luks2,
    PervasiveLuks2,
    TpmFde,
    ProtectedSwap,
    SecureSwap,
    RandomSwap,
}

impl EncryptionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Luks1 => "luks1",
            Self::Luks2 => "luks2",
            Self::PervasiveLuks2 => "pervasive_luks2",
            Self::TpmFde => "tpm_fde",
            Self::ProtectedSwap => "protected_swap",
            Self::SecureSwap => "secure_swap",
            Self::RandomSwap => "random_swap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "luks1" => Some(Self::Luks1),
            "luks2" => Some(Self::Luks2),
            "pervasive_luks2" => Some(Self::PervasiveLuks2),
            "tpm_fde" => Some(Self::TpmFde),
            "protected_swap" => Some(Self::ProtectedSwap),
            "secure_swap" => Some(Self::SecureSwap),
            "random_swap" => Some(Self::RandomSwap),
            _ => None,
        }
    }

    /// Methods whose key is derived from a user passphrase
    pub fn needs_password(self) -> bool {
        matches!(
            self,
            Self::Luks1 | Self::Luks2 | Self::PervasiveLuks2 | Self::TpmFde
        )
    }
}

/// Password-based key derivation function for LUKS2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PbkdFunction {
    Pbkdf2,
    Argon2i,
    Argon2id,
}

impl PbkdFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pbkdf2 => "pbkdf2",
            Self::Argon2i => "argon2i",
            Self::Argon2id => "argon2id",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pbkdf2" => Some(Self::Pbkdf2),
            "argon2i" => Some(Self::Argon2i),
            "argon2id" => Some(Self::Argon2id),
            _ => None,
        }
    }
}

/// An encryption layer (dm-crypt device) on top of a block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    /// Device-mapper name, e.g. "cr_vda2"
    pub name: String,

    pub method: EncryptionMethod,

    /// Never exported
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub pbkd_function: Option<PbkdFunction>,

    #[serde(default)]
    pub key_size: Option<u32>,

    #[serde(default)]
    pub cipher: Option<String>,

    #[serde(default)]
    pub label: Option<String>,
}

impl Encryption {
    /// Path of the opened device, e.g. "/dev/mapper/cr_vda2"
    pub fn device_path(&self) -> String {
        format!("/dev/mapper/{}", self.name)
    }
}
