// SPDX-License-Identifier: GPL-3.0-only

mod common;

use storage_contracts::ActivationManager;
use storage_sys::IscsiManager;
use storage_sys::iscsi::INITIATOR_FILE;
use storage_testing::{exit_code, output};
use storage_types::{IscsiAuth, StartupMode};

use common::{changes, fake_system};

const NODES: &str = "\
10.0.0.1:3260,1 iqn.2024-01.org.example:disk1
10.0.0.2:3260,1 iqn.2024-01.org.example:disk2
";

#[test]
fn login_all_reports_each_node_and_the_overall_result() {
    let system = fake_system();
    system
        .on("iscsiadm -m node", output(NODES))
        .on("iscsiadm -m session", exit_code(21))
        .on(
            "iscsiadm -m session",
            output("tcp: [1] 10.0.0.1:3260,1 iqn.2024-01.org.example:disk1 (non-flash)\n"),
        )
        .on(
            "iscsiadm -m node -T iqn.2024-01.org.example:disk2 -p 10.0.0.2:3260 -I default --login",
            exit_code(8),
        );
    let mut manager = IscsiManager::new(system.clone());
    let subscription = manager.subscribe();
    assert!(manager.probe());
    let nodes = manager.devices().to_vec();
    assert!(nodes.iter().all(|node| !node.connected));

    let batch = manager.login_all(&nodes, &IscsiAuth::default(), StartupMode::Onboot);

    assert!(!batch.success());
    assert_eq!(
        batch.results.get("10.0.0.1:3260 iqn.2024-01.org.example:disk1"),
        Some(&true)
    );
    assert_eq!(
        batch.failed(),
        vec!["10.0.0.2:3260 iqn.2024-01.org.example:disk2"]
    );
    assert!(manager.devices()[0].connected);
    assert!(!manager.devices()[1].connected);
    assert_eq!(changes(&subscription.drain()), 1);
    assert!(system.calls().contains(
        &"iscsiadm -m node -T iqn.2024-01.org.example:disk1 -p 10.0.0.1:3260 -I default \
          -o update -n node.startup -v onboot"
            .to_string()
    ));
}

#[test]
fn login_with_chap_sets_the_credentials_first() {
    let system = fake_system();
    system.on("iscsiadm -m node", output(NODES));
    let mut manager = IscsiManager::new(system.clone());
    manager.probe();
    let node = manager.devices()[0].clone();
    system.clear_calls();

    let auth = IscsiAuth {
        username: Some("user".to_string()),
        password: Some("secret".to_string()),
        ..IscsiAuth::default()
    };
    assert!(manager.login(&node, &auth, StartupMode::Manual));

    let calls = system.calls();
    let prefix = "iscsiadm -m node -T iqn.2024-01.org.example:disk1 -p 10.0.0.1:3260 -I default";
    assert_eq!(
        calls[..4],
        [
            format!("{prefix} -o update -n node.session.auth.authmethod -v CHAP"),
            format!("{prefix} -o update -n node.session.auth.username -v user"),
            format!("{prefix} -o update -n node.session.auth.password -v secret"),
            format!("{prefix} --login"),
        ]
    );
}

#[test]
fn discovery_adds_nodes() {
    let system = fake_system();
    system
        .on("iscsiadm -m node", exit_code(21))
        .on("iscsiadm -m node", output(NODES));
    let mut manager = IscsiManager::new(system.clone());
    let subscription = manager.subscribe();
    manager.probe();

    assert!(manager.discover("10.0.0.1", 3260, &IscsiAuth::default()));

    assert_eq!(manager.devices().len(), 2);
    assert_eq!(changes(&subscription.drain()), 1);
    assert!(
        system
            .calls()
            .contains(&"iscsiadm -m discovery -t st -p 10.0.0.1:3260".to_string())
    );
}

#[test]
fn connected_nodes_are_not_deleted() {
    let system = fake_system();
    system
        .on("iscsiadm -m node", output(NODES))
        .on(
            "iscsiadm -m session",
            output("tcp: [1] 10.0.0.1:3260,1 iqn.2024-01.org.example:disk1 (non-flash)\n"),
        );
    let mut manager = IscsiManager::new(system.clone());
    manager.probe();
    let node = manager.devices()[0].clone();

    assert!(node.connected);
    assert!(!manager.delete(&node));
    assert!(
        system
            .calls()
            .iter()
            .all(|call| !call.ends_with("-o delete"))
    );
}

#[test]
fn initiator_name_lives_in_its_file() {
    let system = fake_system();
    system.file(INITIATOR_FILE, "## generated\nInitiatorName=iqn.1996-04.de.suse:01:abc\n");
    let manager = IscsiManager::new(system.clone());

    assert_eq!(
        manager.initiator_name().as_deref(),
        Some("iqn.1996-04.de.suse:01:abc")
    );
    assert!(manager.set_initiator_name("iqn.2024-01.org.example:host"));
    assert_eq!(
        manager.initiator_name().as_deref(),
        Some("iqn.2024-01.org.example:host")
    );
}
