// SPDX-License-Identifier: GPL-3.0-only

//! Activation subcommands, run against the live machine

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use serde::Serialize;
use storage_contracts::{ActivationManager, FormatEvent};
use storage_sys::{DasdManager, FormatState, IscsiManager, LinuxSystem, System, ZfcpManager};
use storage_types::{IscsiAuth, IscsiNode, StartupMode};

use crate::propose::load_settings;
use crate::{DasdCommand, IscsiCommand, ZfcpCommand};

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    reverse_username: Option<String>,
    #[arg(long)]
    reverse_password: Option<String>,
}

impl From<AuthArgs> for IscsiAuth {
    fn from(args: AuthArgs) -> Self {
        Self {
            username: args.username,
            password: args.password,
            reverse_username: args.reverse_username,
            reverse_password: args.reverse_password,
        }
    }
}

fn system() -> Arc<dyn System> {
    Arc::new(LinuxSystem::new())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn read_devices(manager: &mut impl ActivationManager, what: &str) -> Result<()> {
    if !manager.probe() {
        return Err(anyhow!("could not probe {what}"));
    }
    Ok(())
}

pub(crate) fn dasd(command: DasdCommand, settings: Option<&Path>) -> Result<ExitCode> {
    let settings = load_settings(settings)?;
    let mut manager = DasdManager::new(system(), settings.activation.clone());
    read_devices(&mut manager, "DASDs")?;

    let success = match command {
        DasdCommand::Probe => true,
        DasdCommand::Enable { ids } => manager.enable(&as_strs(&ids)),
        DasdCommand::Disable { ids } => manager.disable(&as_strs(&ids)),
        DasdCommand::Diag { off, ids } => manager.set_diag(&as_strs(&ids), !off),
        DasdCommand::Format { ids } => {
            let success = format_dasds(&manager, &as_strs(&ids))?;
            read_devices(&mut manager, "DASDs")?;
            success
        }
    };
    print_json(manager.devices())?;
    Ok(exit_code(success))
}

/// Runs `dasdfmt` in the foreground, reporting progress on stderr
fn format_dasds(manager: &DasdManager, ids: &[&str]) -> Result<bool> {
    let mut job = manager
        .format(ids)
        .ok_or_else(|| anyhow!("none of the given DASDs can be formatted"))?;
    let subscription = job.subscribe();
    let interval = manager.settings().poll_interval();

    loop {
        let state = job.poll_once();
        for event in subscription.drain() {
            match event {
                FormatEvent::Progress { statuses, .. } => {
                    for status in statuses {
                        eprintln!(
                            "{}: {}/{} cylinders",
                            status.id, status.formatted_cylinders, status.total_cylinders
                        );
                    }
                }
                FormatEvent::Finished {
                    success, exit_code, ..
                } => {
                    tracing::info!("dasdfmt finished (success: {success}, exit: {exit_code:?})");
                }
            }
        }
        match state {
            FormatState::Finished { success, .. } => return Ok(success),
            FormatState::Idle => {}
            FormatState::Starting | FormatState::Running => std::thread::sleep(interval),
        }
    }
}

pub(crate) fn iscsi(command: IscsiCommand) -> Result<ExitCode> {
    let mut manager = IscsiManager::new(system());
    read_devices(&mut manager, "iSCSI nodes")?;

    let success = match command {
        IscsiCommand::Probe => {
            if let Some(name) = manager.initiator_name() {
                tracing::info!("initiator name: {name}");
            }
            true
        }
        IscsiCommand::Discover {
            address,
            port,
            auth,
        } => manager.discover(&address, port, &auth.into()),
        IscsiCommand::Login {
            target,
            address,
            port,
            startup,
            auth,
        } => {
            let startup = StartupMode::parse(&startup)
                .ok_or_else(|| anyhow!("unknown startup mode {startup}"))?;
            let node = find_node(manager.devices(), &target, address.as_deref(), port)?;
            manager.login(&node, &auth.into(), startup)
        }
        IscsiCommand::Logout {
            target,
            address,
            port,
        } => {
            let node = find_node(manager.devices(), &target, address.as_deref(), port)?;
            manager.logout(&node)
        }
    };
    print_json(manager.devices())?;
    Ok(exit_code(success))
}

/// Known node for `target`, narrowed down by portal when given
fn find_node(
    nodes: &[IscsiNode],
    target: &str,
    address: Option<&str>,
    port: Option<u16>,
) -> Result<IscsiNode> {
    let mut matching = nodes.iter().filter(|node| {
        node.target == target
            && address.is_none_or(|address| node.address == address)
            && port.is_none_or(|port| node.port == port)
    });
    let node = matching
        .next()
        .with_context(|| format!("no discovered node for target {target}"))?;
    if matching.next().is_some() {
        return Err(anyhow!(
            "target {target} is reachable through several portals, pass --address"
        ));
    }
    Ok(node.clone())
}

pub(crate) fn zfcp(command: ZfcpCommand) -> Result<ExitCode> {
    let mut manager = ZfcpManager::new(system());
    read_devices(&mut manager, "zFCP devices")?;

    let success = match command {
        ZfcpCommand::Probe => {
            print_json(manager.controllers())?;
            true
        }
        ZfcpCommand::ActivateController { channel } => {
            let success = manager.activate_controller(&channel);
            if success && !manager.allow_lun_scan() {
                for wwpn in manager.find_wwpns(&channel) {
                    let luns = manager.find_luns(&channel, &wwpn);
                    tracing::info!("{channel} {wwpn}: {} LUNs", luns.len());
                }
            }
            print_json(manager.controllers())?;
            success
        }
        ZfcpCommand::ActivateDisk { channel, wwpn, lun } => {
            manager.activate_disk(&channel, &wwpn, &lun)
        }
        ZfcpCommand::DeactivateDisk { channel, wwpn, lun } => {
            manager.deactivate_disk(&channel, &wwpn, &lun)
        }
    };
    print_json(manager.devices())?;
    Ok(exit_code(success))
}

fn as_strs(ids: &[String]) -> Vec<&str> {
    ids.iter().map(String::as_str).collect()
}
