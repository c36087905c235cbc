// SPDX-License-Identifier: GPL-3.0-only

//! Reused and protected devices survive space making, whatever the config

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use storage_proposal::{ArchBootPolicy, DevicesPlanner, ProposalError, SpaceMaker, resolve};
use storage_testing::GraphBuilder;
use storage_types::{
    Config, Devicegraph, FilesystemType, GIB, MIB, ProductSettings, PtableType, has_errors,
};

const FILESYSTEMS: [Option<FilesystemType>; 4] = [
    None,
    Some(FilesystemType::Ext4),
    Some(FilesystemType::Ntfs),
    Some(FilesystemType::Xfs),
];

fn random_graph(rng: &mut StdRng) -> (Devicegraph, Vec<String>) {
    let mut builder = GraphBuilder::new();
    let mut partitions = Vec::new();
    let mut sid = 1;
    for disk in ["/dev/sda", "/dev/sdb"].iter().take(rng.gen_range(1..=2)) {
        let disk_sid = sid;
        let size = (10 + rng.gen_range(0..40_u64)) * GIB;
        builder = builder.disk(disk_sid, disk, size);
        sid += 1;

        let count: u64 = rng.gen_range(0..4);
        let mut start = MIB;
        for number in 1..=count {
            let part_size = (1 + rng.gen_range(0..size / GIB / 4)) * GIB;
            if start + part_size + MIB > size {
                break;
            }
            let filesystem = *FILESYSTEMS.choose(rng).unwrap();
            builder = builder.partition(disk_sid, sid, start, part_size, filesystem);
            if rng.gen_bool(0.5) {
                builder = builder.resizable(sid, part_size / 2);
            }
            partitions.push(format!("{disk}{number}"));
            start += part_size + rng.gen_range(0..3_u64) * GIB;
            sid += 1;
        }
    }
    (builder.build(), partitions)
}

fn random_config(rng: &mut StdRng, partitions: &[String]) -> Value {
    let mut entries = Vec::new();
    let mut mounts = ["/", "/home", "/srv", "/var"].into_iter();
    for partition in partitions {
        match rng.gen_range(0..4) {
            0 => {
                if let Some(path) = mounts.next() {
                    entries.push(json!({ "search": partition, "mount": { "path": path } }));
                }
            }
            1 => entries.push(json!({ "search": partition, "deleteIfNeeded": true })),
            2 => entries.push(json!({ "search": partition, "delete": true })),
            _ => {}
        }
    }
    for _ in 0..rng.gen_range(0..3) {
        let size = format!("{} GiB", rng.gen_range(1..=8));
        match mounts.next() {
            Some(path) => entries.push(json!({ "size": size, "mount": { "path": path } })),
            None => entries.push(json!({ "size": size })),
        }
    }
    let policy = *["keep", "delete", "resize"].choose(rng).unwrap();
    json!({
        "drives": [{ "search": "*", "spacePolicy": policy, "partitions": entries }]
    })
}

#[test]
fn reused_devices_are_never_deleted() {
    let settings = ProductSettings::default();
    let boot = ArchBootPolicy::new(&settings.boot);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut checked = 0;
    let mut fitted = 0;

    for _ in 0..300 {
        let (graph, partitions) = random_graph(&mut rng);
        let json = random_config(&mut rng, &partitions);
        let Ok(config) = Config::from_json(&json, &settings) else {
            continue;
        };
        let resolution = resolve(&config, &graph);
        if has_errors(&resolution.issues) {
            continue;
        }
        let plan = DevicesPlanner::new(&settings, &graph, &boot).plan(&resolution.config);
        if has_errors(&plan.issues) {
            continue;
        }

        let mut target = graph.clone();
        // Running out of space is fine; touching protected devices is not
        match SpaceMaker::new(&plan, PtableType::Gpt).make_space(&mut target) {
            Ok(_) => fitted += 1,
            Err(ProposalError::NoSpace { .. }) => {}
            Err(other) => panic!("unexpected failure {other} for config {json}"),
        }

        for reused in plan.reused() {
            assert!(
                target.contains(reused.sid),
                "reused device {} was deleted for config {json}",
                reused.sid
            );
        }
        for sid in &plan.protected {
            assert!(
                target.contains(*sid),
                "protected device {sid} was deleted for config {json}"
            );
        }
        checked += 1;
    }

    assert!(checked > 30, "only {checked} cases reached space making");
    assert!(fitted > 0, "space making never succeeded");
}
