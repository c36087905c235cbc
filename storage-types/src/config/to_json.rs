//! Config to JSON conversion
//!
//! Writes every explicitly set value back in the form `from_json` reads.
//! Default sizes and values completed from the product settings are left
//! out, so reading the output again completes them the same way.

use serde_json::{Map, Value, json};

use super::{
    BootConfig, Config, DriveConfig, LogicalVolumeConfig, MdRaidConfig, PartitionConfig,
    PhysicalVolumeConfig, VolumeGroupConfig,
};

impl Config {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if !self.drives.is_empty() {
            map.insert(
                "drives".to_string(),
                Value::Array(self.drives.iter().map(drive).collect()),
            );
        }
        if !self.md_raids.is_empty() {
            map.insert(
                "mdRaids".to_string(),
                Value::Array(self.md_raids.iter().map(md_raid).collect()),
            );
        }
        if !self.volume_groups.is_empty() {
            map.insert(
                "volumeGroups".to_string(),
                Value::Array(self.volume_groups.iter().map(volume_group).collect()),
            );
        }
        if !self.boot.is_default() {
            map.insert("boot".to_string(), boot(&self.boot));
        }
        if let Some(encryption) = &self.encryption {
            map.insert("encryption".to_string(), encryption.to_json());
        }
        Value::Object(map)
    }
}

fn drive(drive: &DriveConfig) -> Value {
    let mut map = Map::new();
    map.insert("search".to_string(), drive.search.to_json());
    if let Some(alias) = &drive.alias {
        map.insert("alias".to_string(), json!(alias));
    }
    if let Some(ptable_type) = drive.ptable_type {
        map.insert("ptableType".to_string(), json!(ptable_type.as_str()));
    }
    if let Some(policy) = drive.space_policy {
        map.insert("spacePolicy".to_string(), json!(policy.as_str()));
    }
    drive.content.write_keys(&mut map);
    if !drive.partitions.is_empty() {
        map.insert(
            "partitions".to_string(),
            Value::Array(drive.partitions.iter().map(partition).collect()),
        );
    }
    Value::Object(map)
}

fn partition(partition: &PartitionConfig) -> Value {
    let mut map = Map::new();
    if let Some(search) = &partition.search {
        map.insert("search".to_string(), search.to_json());
    }
    if let Some(alias) = &partition.alias {
        map.insert("alias".to_string(), json!(alias));
    }
    if let Some(id) = partition.id {
        map.insert("id".to_string(), json!(id.as_str()));
    }
    if let Some(size) = partition.size.to_json() {
        map.insert("size".to_string(), size);
    }
    if partition.delete {
        map.insert("delete".to_string(), json!(true));
    }
    if partition.delete_if_needed {
        map.insert("deleteIfNeeded".to_string(), json!(true));
    }
    partition.content.write_keys(&mut map);
    Value::Object(map)
}

fn md_raid(md: &MdRaidConfig) -> Value {
    let mut map = Map::new();
    if let Some(search) = &md.search {
        map.insert("search".to_string(), search.to_json());
    }
    if let Some(alias) = &md.alias {
        map.insert("alias".to_string(), json!(alias));
    }
    if let Some(name) = &md.name {
        map.insert("name".to_string(), json!(name));
    }
    if let Some(level) = md.level {
        map.insert("level".to_string(), json!(level.as_str()));
    }
    if let Some(chunk_size) = md.chunk_size {
        map.insert("chunkSize".to_string(), json!(chunk_size));
    }
    if !md.devices.is_empty() {
        map.insert("devices".to_string(), json!(md.devices));
    }
    if let Some(ptable_type) = md.ptable_type {
        map.insert("ptableType".to_string(), json!(ptable_type.as_str()));
    }
    if let Some(policy) = md.space_policy {
        map.insert("spacePolicy".to_string(), json!(policy.as_str()));
    }
    md.content.write_keys(&mut map);
    if !md.partitions.is_empty() {
        map.insert(
            "partitions".to_string(),
            Value::Array(md.partitions.iter().map(partition).collect()),
        );
    }
    Value::Object(map)
}

fn volume_group(vg: &VolumeGroupConfig) -> Value {
    let mut map = Map::new();
    if let Some(name) = &vg.name {
        map.insert("name".to_string(), json!(name));
    }
    if let Some(extent_size) = vg.extent_size {
        map.insert("extentSize".to_string(), json!(extent_size));
    }
    if !vg.physical_volumes.is_empty() {
        let pvs = vg
            .physical_volumes
            .iter()
            .map(|pv| match pv {
                PhysicalVolumeConfig::Alias(alias) => json!(alias),
                PhysicalVolumeConfig::Generate(targets) => json!({ "generate": targets }),
            })
            .collect();
        map.insert("physicalVolumes".to_string(), Value::Array(pvs));
    }
    if !vg.logical_volumes.is_empty() {
        map.insert(
            "logicalVolumes".to_string(),
            Value::Array(vg.logical_volumes.iter().map(logical_volume).collect()),
        );
    }
    Value::Object(map)
}

fn logical_volume(lv: &LogicalVolumeConfig) -> Value {
    let mut map = Map::new();
    if let Some(name) = &lv.name {
        map.insert("name".to_string(), json!(name));
    }
    if let Some(alias) = &lv.alias {
        map.insert("alias".to_string(), json!(alias));
    }
    if let Some(size) = lv.size.to_json() {
        map.insert("size".to_string(), size);
    }
    if let Some(stripes) = lv.stripes {
        map.insert("stripes".to_string(), json!(stripes));
    }
    if let Some(stripe_size) = lv.stripe_size {
        map.insert("stripeSize".to_string(), json!(stripe_size));
    }
    lv.content.write_keys(&mut map);
    Value::Object(map)
}

fn boot(boot: &BootConfig) -> Value {
    let mut map = Map::new();
    if let Some(configure) = boot.configure {
        map.insert("configure".to_string(), json!(configure));
    }
    if let Some(device) = &boot.device {
        map.insert("device".to_string(), json!(device));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::settings::ProductSettings;

    /// Every key of `expected` is present in `actual` with the same value;
    /// `actual` may carry additional keys filled from defaults
    fn assert_subset(expected: &Value, actual: &Value, path: &str) {
        match (expected, actual) {
            (Value::Object(expected), Value::Object(actual)) => {
                for (key, value) in expected {
                    let nested = format!("{path}.{key}");
                    let other = actual
                        .get(key)
                        .unwrap_or_else(|| panic!("missing key {nested}"));
                    assert_subset(value, other, &nested);
                }
            }
            (Value::Array(expected), Value::Array(actual)) => {
                assert_eq!(expected.len(), actual.len(), "length of {path}");
                for (index, (value, other)) in expected.iter().zip(actual).enumerate() {
                    assert_subset(value, other, &format!("{path}[{index}]"));
                }
            }
            (expected, actual) => assert_eq!(expected, actual, "value of {path}"),
        }
    }

    fn roundtrip(json: Value) {
        let config = Config::from_json(&json, &ProductSettings::default()).unwrap();
        assert_subset(&json, &config.to_json(), "");
    }

    #[test]
    fn explicit_values_survive_a_roundtrip() {
        roundtrip(json!({
            "drives": [{
                "search": "/dev/vda",
                "alias": "system",
                "ptableType": "gpt",
                "spacePolicy": "delete",
                "partitions": [
                    { "search": { "condition": { "name": "/dev/vda3" }, "ifNotFound": "skip" }, "delete": true },
                    { "id": "esp", "size": 536870912, "filesystem": "vfat", "mount": { "path": "/boot/efi" } },
                    {
                        "alias": "root",
                        "size": { "min": 10737418240_u64 },
                        "filesystem": { "type": { "btrfs": { "snapshots": false } }, "label": "ROOT" },
                        "mount": { "path": "/", "options": ["noatime"], "mountBy": "uuid" },
                        "encryption": { "password": "12345", "method": "luks2", "keySize": 512 }
                    }
                ]
            }],
            "volumeGroups": [{
                "name": "data",
                "physicalVolumes": [{ "generate": ["system"] }],
                "logicalVolumes": [{ "name": "home", "size": 21474836480_u64, "stripes": 2, "mount": { "path": "/home" } }]
            }],
            "mdRaids": [{ "alias": "md0", "level": "raid1", "devices": ["a", "b"] }],
            "boot": { "configure": true, "device": "system" }
        }));
    }

    #[test]
    fn short_form_config_comes_back_unchanged() {
        let json = json!({
            "drives": [{
                "search": "/dev/vda",
                "partitions": [
                    { "filesystem": "btrfs", "size": "10 GiB", "mount": { "path": "/" } },
                    { "size": { "min": "1 GiB", "max": "unlimited" }, "mount": { "path": "/home" } },
                    { "filesystem": "swap", "mount": { "path": "swap" }, "encryption": {} }
                ]
            }],
            "encryption": { "password": "notsecret" }
        });

        let config = Config::from_json(&json, &ProductSettings::default()).unwrap();
        let partitions = &config.drives[0].partitions;
        let root = partitions[0].content.filesystem.as_ref().unwrap();
        assert_eq!(root.snapshots, Some(true));
        let home = partitions[1].content.filesystem.as_ref().unwrap();
        assert!(home.implied);
        let swap = partitions[2].content.encryption.as_ref().unwrap();
        assert_eq!(swap.password.as_deref(), Some("notsecret"));

        assert_eq!(config.to_json(), json);
    }

    #[test]
    fn default_sizes_are_not_written() {
        let config = Config::from_json(
            &json!({ "drives": [{ "partitions": [{ "mount": { "path": "/" } }] }] }),
            &ProductSettings::default(),
        )
        .unwrap();
        let json = config.to_json();
        let partition = &json["drives"][0]["partitions"][0];
        assert!(partition.get("size").is_none());
        assert_eq!(json["drives"][0]["search"], json!("*"));
    }
}
