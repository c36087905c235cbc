// SPDX-License-Identifier: GPL-3.0-only

//! iSCSI discovery and sessions through `iscsiadm`

use std::path::Path;
use std::sync::Arc;

use storage_contracts::{ActivationEvent, ActivationManager, EventBus};
use storage_types::{IscsiAuth, IscsiNode, StartupMode};
use tracing::{info, warn};

use crate::activation::{BatchResult, DeviceSnapshot};
use crate::error::Result;
use crate::system::{CommandOutput, System};

pub const ISCSIADM: &str = "iscsiadm";
pub const INITIATOR_FILE: &str = "/etc/iscsi/initiatorname.iscsi";

/// `iscsiadm` exit code when no node or session exists
const EXIT_NO_RECORDS: i32 = 21;

const DEFAULT_INTERFACE: &str = "default";

pub struct IscsiManager {
    system: Arc<dyn System>,
    snapshot: DeviceSnapshot<IscsiNode>,
}

impl IscsiManager {
    pub fn new(system: Arc<dyn System>) -> Self {
        Self {
            system,
            snapshot: DeviceSnapshot::new(),
        }
    }

    pub fn initiator_name(&self) -> Option<String> {
        let contents = self.system.read_file(Path::new(INITIATOR_FILE)).ok()?;
        contents.lines().find_map(|line| {
            line.trim()
                .strip_prefix("InitiatorName=")
                .map(|name| name.trim().to_string())
        })
    }

    pub fn set_initiator_name(&self, name: &str) -> bool {
        let contents = format!("InitiatorName={name}\n");
        match self.system.write_file(Path::new(INITIATOR_FILE), &contents) {
            Ok(()) => true,
            Err(e) => {
                warn!("could not write {INITIATOR_FILE}: {e}");
                false
            }
        }
    }

    /// Sends targets discovery on a portal, with CHAP when `auth` has
    /// credentials
    pub fn discover(&mut self, address: &str, port: u16, auth: &IscsiAuth) -> bool {
        let portal = portal(address, port);
        let success = if auth.by_target() || auth.by_initiator() {
            let mut settings =
                vec![("discovery.sendtargets.auth.authmethod".to_string(), "CHAP")];
            settings.extend(chap_settings(auth, "discovery.sendtargets.auth"));
            self.action(&["-m", "discoverydb", "-t", "st", "-p", &portal, "-o", "new"])
                && settings.iter().all(|(name, value)| {
                    self.action(&[
                        "-m",
                        "discoverydb",
                        "-t",
                        "st",
                        "-p",
                        portal.as_str(),
                        "-o",
                        "update",
                        "-n",
                        name.as_str(),
                        "-v",
                        *value,
                    ])
                })
                && self.action(&["-m", "discoverydb", "-t", "st", "-p", &portal, "--discover"])
        } else {
            self.action(&["-m", "discovery", "-t", "st", "-p", &portal])
        };
        self.after_action(success, "discovery", &portal)
    }

    pub fn login(&mut self, node: &IscsiNode, auth: &IscsiAuth, startup: StartupMode) -> bool {
        let success = self.login_node(node, auth, startup);
        self.after_action(success, "login", &node.target)
    }

    /// Logs into every node in turn, going on after failures
    pub fn login_all(
        &mut self,
        nodes: &[IscsiNode],
        auth: &IscsiAuth,
        startup: StartupMode,
    ) -> BatchResult {
        let mut batch = BatchResult::default();
        for node in nodes {
            let success = self.login_node(node, auth, startup);
            if !success {
                warn!("login to {} failed", node.target);
            }
            batch.record(format!("{} {}", node.portal(), node.target), success);
        }
        if batch.any_success() {
            self.refresh();
        }
        batch
    }

    pub fn logout(&mut self, node: &IscsiNode) -> bool {
        let success = self.node_action(node, &["--logout"]);
        self.after_action(success, "logout", &node.target)
    }

    /// Removes the record of a node without an open session
    pub fn delete(&mut self, node: &IscsiNode) -> bool {
        if node.connected {
            warn!("refusing to delete connected node {}", node.target);
            return false;
        }
        let success = self.node_action(node, &["-o", "delete"]);
        self.after_action(success, "delete", &node.target)
    }

    pub fn set_startup(&mut self, node: &IscsiNode, startup: StartupMode) -> bool {
        let success = self.update_node(node, "node.startup", startup.as_str());
        self.after_action(success, "startup update", &node.target)
    }

    fn login_node(&self, node: &IscsiNode, auth: &IscsiAuth, startup: StartupMode) -> bool {
        if auth.by_target() || auth.by_initiator() {
            let authenticated = self.update_node(node, "node.session.auth.authmethod", "CHAP")
                && chap_settings(auth, "node.session.auth")
                    .iter()
                    .all(|(name, value)| self.update_node(node, name, value));
            if !authenticated {
                return false;
            }
        }
        self.node_action(node, &["--login"])
            && self.update_node(node, "node.startup", startup.as_str())
    }

    fn update_node(&self, node: &IscsiNode, name: &str, value: &str) -> bool {
        self.node_action(node, &["-o", "update", "-n", name, "-v", value])
    }

    fn node_action(&self, node: &IscsiNode, extra: &[&str]) -> bool {
        let portal = node.portal();
        let mut args = vec![
            "-m",
            "node",
            "-T",
            node.target.as_str(),
            "-p",
            portal.as_str(),
            "-I",
            node.interface.as_str(),
        ];
        args.extend_from_slice(extra);
        self.action(&args)
    }

    fn action(&self, args: &[&str]) -> bool {
        match self.system.run(ISCSIADM, args) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!("{ISCSIADM} exited with {}: {}", output.code, output.stderr.trim());
                false
            }
            Err(e) => {
                warn!("{ISCSIADM}: {e}");
                false
            }
        }
    }

    fn after_action(&mut self, success: bool, action: &str, what: &str) -> bool {
        if success {
            info!("iSCSI {action} of {what} succeeded");
            self.refresh();
        } else {
            warn!("iSCSI {action} of {what} failed");
        }
        success
    }

    fn refresh(&mut self) {
        match self.read_nodes() {
            Ok(nodes) => {
                self.snapshot.refreshed(nodes);
            }
            Err(e) => warn!("could not read iSCSI nodes: {e}"),
        }
    }

    fn read_nodes(&self) -> Result<Vec<IscsiNode>> {
        let nodes = records(self.system.run(ISCSIADM, &["-m", "node"])?)?;
        let sessions = records(self.system.run(ISCSIADM, &["-m", "session"])?)?;
        let sessions = parse_sessions(&sessions);

        let mut nodes = parse_nodes(&nodes);
        for node in nodes.iter_mut() {
            node.connected = sessions.iter().any(|session| session.is_same(node));
            let portal = node.portal();
            let details = self.system.run(
                ISCSIADM,
                &["-m", "node", "-T", &node.target, "-p", &portal, "-I", &node.interface],
            )?;
            node.startup = details
                .success()
                .then(|| parse_startup(&details.stdout))
                .flatten();
        }
        Ok(nodes)
    }
}

impl ActivationManager for IscsiManager {
    type Device = IscsiNode;

    fn probe(&mut self) -> bool {
        match self.read_nodes() {
            Ok(nodes) => {
                info!("found {} iSCSI nodes", nodes.len());
                self.snapshot.probed(nodes);
                true
            }
            Err(e) => {
                warn!("could not probe iSCSI nodes: {e}");
                false
            }
        }
    }

    fn is_probed(&self) -> bool {
        self.snapshot.is_probed()
    }

    fn devices(&self) -> &[IscsiNode] {
        self.snapshot.devices()
    }

    fn events(&self) -> &EventBus<ActivationEvent<IscsiNode>> {
        self.snapshot.events()
    }
}

fn records(output: CommandOutput) -> Result<String> {
    if output.code == EXIT_NO_RECORDS {
        return Ok(String::new());
    }
    Ok(output.check(ISCSIADM)?.stdout)
}

fn portal(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

fn chap_settings<'a>(auth: &'a IscsiAuth, prefix: &str) -> Vec<(String, &'a str)> {
    let mut settings = Vec::new();
    if let (Some(username), Some(password)) = (&auth.username, &auth.password) {
        settings.push((format!("{prefix}.username"), username.as_str()));
        settings.push((format!("{prefix}.password"), password.as_str()));
    }
    if let (Some(username), Some(password)) = (&auth.reverse_username, &auth.reverse_password) {
        settings.push((format!("{prefix}.username_in"), username.as_str()));
        settings.push((format!("{prefix}.password_in"), password.as_str()));
    }
    settings
}

/// Parses `<address>:<port>,<tpgt> <target>` records
fn parse_record(portal: &str, target: &str) -> Option<IscsiNode> {
    let portal = portal.split(',').next()?;
    let (address, port) = portal.rsplit_once(':')?;
    let address = address.trim_start_matches('[').trim_end_matches(']');
    Some(IscsiNode {
        address: address.to_string(),
        port: port.parse().ok()?,
        target: target.to_string(),
        interface: DEFAULT_INTERFACE.to_string(),
        connected: false,
        startup: None,
    })
}

/// Parses the output of `iscsiadm -m node`
pub fn parse_nodes(output: &str) -> Vec<IscsiNode> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            parse_record(fields.next()?, fields.next()?)
        })
        .collect()
}

/// Parses the output of `iscsiadm -m session`
pub fn parse_sessions(output: &str) -> Vec<IscsiNode> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let position = fields.iter().position(|field| field.starts_with('['))?;
            parse_record(fields.get(position + 1)?, fields.get(position + 2)?)
        })
        .collect()
}

fn parse_startup(output: &str) -> Option<StartupMode> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "node.startup")
            .then(|| StartupMode::parse(value.trim()))
            .flatten()
    })
}
