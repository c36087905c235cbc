//! Filesystem, mount point and encryption settings of a config element

use serde_json::{Map, Value, json};

use crate::devicegraph::{EncryptionMethod, FilesystemType, MountBy, PbkdFunction};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemConfig {
    pub fs_type: Option<FilesystemType>,

    /// Btrfs snapshots, only meaningful for btrfs
    pub snapshots: Option<bool>,

    pub label: Option<String>,
    pub mkfs_options: Vec<String>,

    /// Keep the existing filesystem of a reused device when it has this type
    pub reuse_if_possible: Option<bool>,

    /// Added only because the element has a mount point
    pub implied: bool,
    /// `fs_type` came from the product settings
    pub type_filled: bool,
    /// `snapshots` came from the product volume template
    pub snapshots_filled: bool,
}

impl FilesystemConfig {
    pub fn with_type(fs_type: FilesystemType) -> Self {
        Self {
            fs_type: Some(fs_type),
            ..Self::default()
        }
    }

    /// Accepts `"btrfs"` or `{type, label, mkfsOptions, reuseIfPossible}`
    /// where `type` is a name or `{btrfs: {snapshots}}`
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => Some(Self {
                fs_type: FilesystemType::parse(name),
                ..Self::default()
            }),
            Value::Object(map) => {
                let mut filesystem = Self::default();
                for (key, value) in map {
                    match key.as_str() {
                        "type" => filesystem.read_type(value),
                        "label" => filesystem.label = value.as_str().map(str::to_string),
                        "mkfsOptions" => filesystem.mkfs_options = strings(value),
                        "reuseIfPossible" => filesystem.reuse_if_possible = value.as_bool(),
                        _ => {}
                    }
                }
                Some(filesystem)
            }
            _ => None,
        }
    }

    fn read_type(&mut self, value: &Value) {
        match value {
            Value::String(name) => self.fs_type = FilesystemType::parse(name),
            Value::Object(map) => {
                if let Some(btrfs) = map.get("btrfs") {
                    self.fs_type = Some(FilesystemType::Btrfs);
                    self.snapshots = btrfs.get("snapshots").and_then(Value::as_bool);
                }
            }
            _ => {}
        }
    }

    /// JSON form of the values the config set; filled values are left out
    pub fn to_json(&self) -> Value {
        let fs_type = self.fs_type.filter(|_| !self.type_filled);
        let snapshots = self.snapshots.filter(|_| !self.snapshots_filled);
        let simple = snapshots.is_none()
            && self.label.is_none()
            && self.mkfs_options.is_empty()
            && self.reuse_if_possible.is_none();
        if simple && let Some(fs_type) = fs_type {
            return json!(fs_type.as_str());
        }

        let mut map = Map::new();
        match (fs_type, snapshots) {
            (Some(FilesystemType::Btrfs), Some(snapshots)) => {
                map.insert(
                    "type".to_string(),
                    json!({ "btrfs": { "snapshots": snapshots } }),
                );
            }
            (Some(fs_type), _) => {
                map.insert("type".to_string(), json!(fs_type.as_str()));
            }
            (None, _) => {}
        }
        if let Some(label) = &self.label {
            map.insert("label".to_string(), json!(label));
        }
        if !self.mkfs_options.is_empty() {
            map.insert("mkfsOptions".to_string(), json!(self.mkfs_options));
        }
        if let Some(reuse) = self.reuse_if_possible {
            map.insert("reuseIfPossible".to_string(), json!(reuse));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountConfig {
    pub path: Option<String>,
    pub options: Vec<String>,
    pub mount_by: Option<MountBy>,
}

impl MountConfig {
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut mount = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "path" => mount.path = value.as_str().map(str::to_string),
                "options" => mount.options = strings(value),
                "mountBy" => mount.mount_by = value.as_str().and_then(MountBy::parse),
                _ => {}
            }
        }
        Some(mount)
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(path) = &self.path {
            map.insert("path".to_string(), json!(path));
        }
        if !self.options.is_empty() {
            map.insert("options".to_string(), json!(self.options));
        }
        if let Some(mount_by) = self.mount_by {
            map.insert("mountBy".to_string(), json!(mount_by.as_str()));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionConfig {
    pub password: Option<String>,
    pub method: Option<EncryptionMethod>,
    pub pbkd_function: Option<PbkdFunction>,
    pub key_size: Option<u32>,
    pub cipher: Option<String>,
    pub label: Option<String>,

    /// JSON keys whose values were filled from elsewhere
    pub filled: Vec<&'static str>,
}

impl EncryptionConfig {
    /// Fills the unset fields from `parent`
    pub fn inherit(&mut self, parent: &EncryptionConfig) {
        fill(&mut self.password, &parent.password, "password", &mut self.filled);
        fill(&mut self.method, &parent.method, "method", &mut self.filled);
        fill(
            &mut self.pbkd_function,
            &parent.pbkd_function,
            "pbkdFunction",
            &mut self.filled,
        );
        fill(&mut self.key_size, &parent.key_size, "keySize", &mut self.filled);
        fill(&mut self.cipher, &parent.cipher, "cipher", &mut self.filled);
        fill(&mut self.label, &parent.label, "label", &mut self.filled);
    }

    pub fn fill_method(&mut self, method: EncryptionMethod) {
        fill(&mut self.method, &Some(method), "method", &mut self.filled);
    }

    pub fn fill_pbkd_function(&mut self, pbkd_function: PbkdFunction) {
        fill(
            &mut self.pbkd_function,
            &Some(pbkd_function),
            "pbkdFunction",
            &mut self.filled,
        );
    }

    pub fn needs_password(&self) -> bool {
        self.method.is_some_and(EncryptionMethod::needs_password)
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut encryption = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "password" => encryption.password = value.as_str().map(str::to_string),
                "method" => encryption.method = value.as_str().and_then(EncryptionMethod::parse),
                "pbkdFunction" => {
                    encryption.pbkd_function = value.as_str().and_then(PbkdFunction::parse)
                }
                "keySize" => encryption.key_size = value.as_u64().map(|size| size as u32),
                "cipher" => encryption.cipher = value.as_str().map(str::to_string),
                "label" => encryption.label = value.as_str().map(str::to_string),
                _ => {}
            }
        }
        Some(encryption)
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(password) = &self.password {
            map.insert("password".to_string(), json!(password));
        }
        if let Some(method) = self.method {
            map.insert("method".to_string(), json!(method.as_str()));
        }
        if let Some(pbkd) = self.pbkd_function {
            map.insert("pbkdFunction".to_string(), json!(pbkd.as_str()));
        }
        if let Some(key_size) = self.key_size {
            map.insert("keySize".to_string(), json!(key_size));
        }
        if let Some(cipher) = &self.cipher {
            map.insert("cipher".to_string(), json!(cipher));
        }
        if let Some(label) = &self.label {
            map.insert("label".to_string(), json!(label));
        }
        map.retain(|key, _| !self.filled.contains(&key.as_str()));
        Value::Object(map)
    }
}

fn fill<T: Clone>(
    value: &mut Option<T>,
    from: &Option<T>,
    key: &'static str,
    filled: &mut Vec<&'static str>,
) {
    if value.is_none() && from.is_some() {
        *value = from.clone();
        filled.push(key);
    }
}

/// Content layers shared by every block-device element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentConfig {
    pub filesystem: Option<FilesystemConfig>,
    pub mount: Option<MountConfig>,
    pub encryption: Option<EncryptionConfig>,
}

impl ContentConfig {
    pub fn mount_path(&self) -> Option<&str> {
        self.mount.as_ref().and_then(|mount| mount.path.as_deref())
    }

    pub fn fs_type(&self) -> Option<FilesystemType> {
        self.filesystem.as_ref().and_then(|fs| fs.fs_type)
    }

    pub fn is_empty(&self) -> bool {
        self.filesystem.is_none() && self.mount.is_none() && self.encryption.is_none()
    }

    /// Handles the content keys of an element, ignoring any other key
    pub(crate) fn read_key(&mut self, key: &str, value: &Value) {
        match key {
            "filesystem" => self.filesystem = FilesystemConfig::from_json(value),
            "mount" => self.mount = MountConfig::from_json(value),
            "encryption" => self.encryption = EncryptionConfig::from_json(value),
            _ => {}
        }
    }

    pub(crate) fn write_keys(&self, map: &mut Map<String, Value>) {
        if let Some(filesystem) = self.filesystem.as_ref().filter(|fs| !fs.implied) {
            map.insert("filesystem".to_string(), filesystem.to_json());
        }
        if let Some(mount) = &self.mount {
            map.insert("mount".to_string(), mount.to_json());
        }
        if let Some(encryption) = &self.encryption {
            map.insert("encryption".to_string(), encryption.to_json());
        }
    }
}

fn strings(value: &Value) -> Vec<String> {
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
