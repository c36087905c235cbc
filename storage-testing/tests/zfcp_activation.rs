// SPDX-License-Identifier: GPL-3.0-only

mod common;

use storage_contracts::{ActivationEvent, ActivationManager};
use storage_sys::ZfcpManager;
use storage_testing::{exit_code, output};

use common::{changes, fake_system};

const LSCSS: &str = "\
Device   Subchan.  DevType CU Type Use  PIM PAM POM  CHPIDs
----------------------------------------------------------------------
0.0.fa00 0.0.0008  1732/03 1731/03 yes  80  80  ff   01000000 00000000
0.0.fc00 0.0.0009  1732/03 1731/03      80  80  ff   02000000 00000000
";

const WWPN: &str = "0x500507630300c562";
const LUN: &str = "0x4010403300000000";

fn scripted() -> std::sync::Arc<storage_testing::FakeSystem> {
    let system = fake_system();
    system
        .on("lscss -t 1732/03,1732/04", output(LSCSS))
        .on("lszfcp -H", output("0.0.fa00 host0\n"))
        .on("lszfcp -D", exit_code(1))
        .on(
            "lszfcp -D",
            output(&format!("0.0.fa00/{WWPN}/{LUN} 0:0:0:1089355792\n")),
        )
        .dir("/sys/bus/scsi/devices/0:0:0:1089355792/block", &["sda"])
        .file("/sys/module/zfcp/parameters/allow_lun_scan", "Y\n");
    system
}

#[test]
fn probes_controllers_and_disks() {
    let system = scripted();
    let mut manager = ZfcpManager::new(system.clone());

    assert!(manager.probe());

    let controllers = manager.controllers();
    assert_eq!(controllers.len(), 2);
    assert!(controllers[0].active && controllers[0].lun_scan);
    assert!(!controllers[1].active);
    assert!(manager.devices().is_empty());
}

#[test]
fn disk_changes_are_published_once() {
    let system = scripted();
    let mut manager = ZfcpManager::new(system.clone());
    manager.probe();
    let subscription = manager.subscribe();

    assert!(manager.activate_disk("0.0.fa00", WWPN, LUN));
    assert!(manager.activate_disk("0.0.fa00", WWPN, LUN));

    let events = subscription.drain();
    assert_eq!(events.len(), 3);
    assert_eq!(changes(&events), 1);
    let ActivationEvent::Changed(disks) = &events[1] else {
        panic!("expected a change, got {:?}", events[1]);
    };
    assert_eq!(disks[0].name, "/dev/sda");
    assert_eq!(disks[0].lun, LUN);
}

#[test]
fn failed_activation_leaves_the_snapshot_alone() {
    let system = scripted();
    system.on(
        &format!("zfcp_disk_configure 0.0.fa00 {WWPN} {LUN} 1"),
        exit_code(1),
    );
    let mut manager = ZfcpManager::new(system.clone());
    manager.probe();
    let subscription = manager.subscribe();

    assert!(!manager.activate_disk("0.0.fa00", WWPN, LUN));
    assert!(subscription.drain().is_empty());
}

#[test]
fn activating_a_controller_refreshes_controllers() {
    let system = scripted();
    system.on("lszfcp -H", output("0.0.fa00 host0\n0.0.fc00 host1\n"));
    let mut manager = ZfcpManager::new(system.clone());
    manager.probe();
    let controller_events = manager.controller_events().subscribe();

    assert!(manager.activate_controller("0.0.fc00"));

    assert!(manager.controllers()[1].active);
    assert_eq!(changes(&controller_events.drain()), 1);
    assert!(
        system
            .calls()
            .contains(&"zfcp_host_configure 0.0.fc00 1".to_string())
    );
}

#[test]
fn discovers_ports_and_luns() {
    let system = scripted();
    system
        .on("zfcp_san_disc -b 0.0.fa00 -W", output(&format!("{WWPN}\n")))
        .on(
            &format!("zfcp_san_disc -b 0.0.fa00 -p {WWPN} -L"),
            output(&format!("{LUN}\n0x4010403400000000\n")),
        );
    let manager = ZfcpManager::new(system.clone());

    assert_eq!(manager.find_wwpns("0.0.fa00"), vec![WWPN]);
    assert_eq!(manager.find_luns("0.0.fa00", WWPN).len(), 2);
    assert!(manager.find_wwpns("0.0.fc00").is_empty());
}
