// SPDX-License-Identifier: GPL-3.0-only

use serde_json::json;
use storage_contracts::IssuesReporter;
use storage_proposal::{Proposal, ProposalState, resolve};
use storage_testing::{GraphBuilder, config};
use storage_types::{
    DeviceClass, FilesystemType, GIB, IssueSource, MIB, PartitionId, ProductSettings, PtableType,
};

#[test]
fn minimal_root_filesystem_on_an_empty_disk() {
    let graph = GraphBuilder::new().disk(1, "/dev/vda", 20 * GIB).build();
    let config = config(json!({
        "drives": [{
            "search": "/dev/vda",
            "partitions": [{ "filesystem": "btrfs", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph));

    assert!(proposal.issues().is_empty(), "{:?}", proposal.issues());
    let target = proposal.target().unwrap();
    let table = target.disks[0].partition_table.as_ref().unwrap();
    assert_eq!(table.ptable_type, PtableType::Gpt);
    let data: Vec<_> = table
        .partitions
        .iter()
        .filter(|partition| partition.id != PartitionId::Esp)
        .collect();
    assert_eq!(data.len(), 1);
    let root = data[0].filesystem.as_ref().unwrap();
    assert_eq!(root.fs_type, FilesystemType::Btrfs);
    assert!(root.is_mounted_at("/"));

    let layout = proposal.layout().unwrap();
    let mounted: Vec<_> = layout
        .iter()
        .filter(|device| device.class == DeviceClass::Partition)
        .filter_map(|device| device.filesystem.as_ref()?.mount_path.clone())
        .collect();
    assert!(mounted.contains(&"/".to_string()));
}

#[test]
fn without_boot_partitions_only_root_is_created() {
    let graph = GraphBuilder::new().disk(1, "/dev/vda", 20 * GIB).build();
    let config = config(json!({
        "boot": { "configure": false },
        "drives": [{
            "search": "/dev/vda",
            "partitions": [{ "filesystem": "btrfs", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph));

    let table = proposal.target().unwrap().disks[0]
        .partition_table
        .as_ref()
        .unwrap();
    assert_eq!(table.partitions.len(), 1);
    assert_eq!(table.partitions[0].name, "/dev/vda1");
    assert!(table.partitions[0].size() > 19 * GIB);
}

#[test]
fn first_declared_drive_wins() {
    let graph = GraphBuilder::new().disk(1, "/dev/sda", 20 * GIB).build();
    let config = config(json!({ "drives": [{ "search": "*" }, { "search": "*" }] }));

    let resolution = resolve(&config, &graph);

    assert_eq!(resolution.config.drives[0].search.device, Some(1));
    assert_eq!(resolution.config.drives[1].search.device, None);
    assert_eq!(resolution.issues.len(), 1);
    assert!(resolution.issues[0].is_error());
}

#[test]
fn skipped_drives_vanish_silently() {
    let graph = GraphBuilder::new().disk(1, "/dev/vda", 20 * GIB).build();
    let config = config(json!({
        "drives": [
            { "search": "/dev/vda", "partitions": [{ "mount": { "path": "/" } }] },
            { "search": { "condition": { "name": "nope" }, "ifNotFound": "skip" } }
        ]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph));

    assert!(proposal.issues().is_empty());
    assert_eq!(proposal.resolved_config().unwrap().drives.len(), 1);
}

#[test]
fn missing_required_drives_fail_the_proposal() {
    let graph = GraphBuilder::new().disk(1, "/dev/vda", 20 * GIB).build();
    let config = config(json!({
        "drives": [
            { "search": "/dev/vda", "partitions": [{ "mount": { "path": "/" } }] },
            { "search": { "condition": { "name": "nope" }, "ifNotFound": "error" } }
        ]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(!proposal.propose(&config, &graph));

    assert_eq!(proposal.state(), ProposalState::Failed);
    assert_eq!(proposal.issues().len(), 1);
    assert_eq!(proposal.issues()[0].source, IssueSource::Search);
    assert!(proposal.target().is_none());
    assert!(proposal.layout().is_none());
}

#[test]
fn resize_policy_shrinks_windows() {
    let graph = GraphBuilder::new()
        .disk(1, "/dev/sda", 50 * GIB)
        .partition(1, 2, MIB, 50 * GIB - 2 * MIB, Some(FilesystemType::Ntfs))
        .resizable(2, 10 * GIB)
        .build();
    let config = config(json!({
        "drives": [{
            "search": "/dev/sda",
            "spacePolicy": "resize",
            "partitions": [{ "size": "20 GiB", "filesystem": "ext4", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph), "{:?}", proposal.issues());

    let target = proposal.target().unwrap();
    let windows = target.partition(2).unwrap();
    assert!(windows.size() >= 10 * GIB);
    assert!(windows.size() < 30 * GIB);
    assert_eq!(windows.filesystem.as_ref().unwrap().fs_type, FilesystemType::Ntfs);
    // The input devicegraph is never touched
    assert_eq!(graph.partition(2).unwrap().size(), 50 * GIB - 2 * MIB);
}

#[test]
fn delete_policy_removes_only_what_is_needed() {
    let graph = GraphBuilder::new()
        .disk(1, "/dev/sda", 50 * GIB)
        .partition(1, 2, MIB, 25 * GIB - MIB, Some(FilesystemType::Ext4))
        .partition(1, 3, 25 * GIB, 25 * GIB - MIB, Some(FilesystemType::Ext4))
        .build();
    let config = config(json!({
        "drives": [{
            "search": "/dev/sda",
            "spacePolicy": "delete",
            "partitions": [{ "size": "20 GiB", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph), "{:?}", proposal.issues());

    let target = proposal.target().unwrap();
    assert!(target.partition(2).is_some());
    assert!(target.partition(3).is_none());
}

#[test]
fn keep_policy_never_deletes() {
    let graph = GraphBuilder::new()
        .disk(1, "/dev/sda", 20 * GIB)
        .partition(1, 2, MIB, 20 * GIB - 2 * MIB, Some(FilesystemType::Ext4))
        .build();
    let config = config(json!({
        "drives": [{
            "search": "/dev/sda",
            "partitions": [{ "size": "10 GiB", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(!proposal.propose(&config, &graph));
    assert!(
        proposal
            .issues()
            .iter()
            .any(|issue| issue.is_error() && issue.source == IssueSource::Space)
    );
}

#[test]
fn empty_tables_are_replaced_by_the_preferred_type() {
    let graph = GraphBuilder::new()
        .disk(1, "/dev/sda", 20 * GIB)
        .table(1, PtableType::Msdos)
        .build();
    let config = config(json!({
        "boot": { "configure": false },
        "drives": [{
            "search": "/dev/sda",
            "partitions": [{ "size": "10 GiB", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph), "{:?}", proposal.issues());

    let table = proposal.target().unwrap().disks[0]
        .partition_table
        .as_ref()
        .unwrap();
    assert_eq!(table.ptable_type, PtableType::Gpt);
    assert_eq!(table.partitions.len(), 1);
}

#[test]
fn delete_policy_wipes_a_formatted_disk() {
    let graph = GraphBuilder::new()
        .disk(1, "/dev/sda", 20 * GIB)
        .formatted(1, FilesystemType::Ext4)
        .build();
    let config = config(json!({
        "boot": { "configure": false },
        "drives": [{
            "search": "/dev/sda",
            "spacePolicy": "delete",
            "partitions": [{ "size": "10 GiB", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph), "{:?}", proposal.issues());

    let disk = &proposal.target().unwrap().disks[0];
    assert!(disk.filesystem.is_none());
    assert_eq!(disk.partition_table.as_ref().unwrap().partitions.len(), 1);
}

#[test]
fn keep_policy_leaves_a_formatted_disk_alone() {
    let graph = GraphBuilder::new()
        .disk(1, "/dev/sda", 20 * GIB)
        .formatted(1, FilesystemType::Ext4)
        .build();
    let config = config(json!({
        "boot": { "configure": false },
        "drives": [{
            "search": "/dev/sda",
            "partitions": [{ "size": "10 GiB", "mount": { "path": "/" } }]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(!proposal.propose(&config, &graph));
    assert!(
        proposal
            .issues()
            .iter()
            .any(|issue| issue.is_error() && issue.source == IssueSource::Space)
    );
}

#[test]
fn generated_physical_volumes_hold_the_volume_group() {
    let graph = GraphBuilder::new().disk(1, "/dev/vda", 50 * GIB).build();
    let config = config(json!({
        "drives": [{ "search": "/dev/vda", "alias": "disk" }],
        "volumeGroups": [{
            "name": "system",
            "physicalVolumes": [{ "generate": ["disk"] }],
            "logicalVolumes": [
                { "name": "root", "size": "10 GiB", "mount": { "path": "/" } },
                { "name": "swap", "size": "2 GiB", "filesystem": "swap", "mount": { "path": "swap" } }
            ]
        }]
    }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&config, &graph), "{:?}", proposal.issues());

    let target = proposal.target().unwrap();
    let vg = target.volume_group_by_name("system").unwrap();
    let names: Vec<&str> = vg.logical_volumes.iter().map(|lv| lv.name.as_str()).collect();
    assert_eq!(names, vec!["root", "swap"]);
    assert!(vg.logical_volumes[0].size >= 10 * GIB);
    let table = target.disks[0].partition_table.as_ref().unwrap();
    assert!(table.partitions.iter().any(|p| p.id == PartitionId::Lvm));
}

#[test]
fn proposals_start_over_every_time() {
    let graph = GraphBuilder::new().disk(1, "/dev/vda", 20 * GIB).build();
    let good = config(json!({
        "drives": [{ "search": "/dev/vda", "partitions": [{ "mount": { "path": "/" } }] }]
    }));
    let bad = config(json!({ "drives": [{ "search": "/dev/sdz" }] }));
    let mut proposal = Proposal::new(ProductSettings::default());

    assert!(proposal.propose(&good, &graph));
    let first = proposal.target().cloned();
    assert!(!proposal.propose(&bad, &graph));
    assert!(proposal.target().is_none());
    assert!(proposal.propose(&good, &graph));
    assert_eq!(proposal.target().cloned(), first);
}
