// SPDX-License-Identifier: GPL-3.0-only

//! Storage CLI
//!
//! Computes storage proposals from JSON documents and drives the DASD, iSCSI
//! and zFCP activation managers on the running machine.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod activation;
mod propose;

#[derive(Debug, Parser)]
#[command(name = "storage-cli")]
#[command(about = "Storage proposals and device activation for the installer")]
struct StorageCli {
    #[command(subcommand)]
    command: StorageCommand,
}

#[derive(Debug, Subcommand)]
enum StorageCommand {
    /// Resolves a storage config against a devicegraph
    Propose {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        devicegraph: PathBuf,
        /// Product settings (TOML); built-in defaults otherwise
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Print a table of the target devices instead of JSON
        #[arg(long)]
        human: bool,
    },
    Dasd {
        #[command(subcommand)]
        command: DasdCommand,
        #[arg(long, global = true)]
        settings: Option<PathBuf>,
    },
    Iscsi {
        #[command(subcommand)]
        command: IscsiCommand,
    },
    Zfcp {
        #[command(subcommand)]
        command: ZfcpCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DasdCommand {
    Probe,
    Enable { ids: Vec<String> },
    Disable { ids: Vec<String> },
    Diag {
        #[arg(long)]
        off: bool,
        ids: Vec<String>,
    },
    Format { ids: Vec<String> },
}

#[derive(Debug, Subcommand)]
enum IscsiCommand {
    Probe,
    Discover {
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 3260)]
        port: u16,
        #[command(flatten)]
        auth: activation::AuthArgs,
    },
    Login {
        #[arg(long)]
        target: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value = "onboot")]
        startup: String,
        #[command(flatten)]
        auth: activation::AuthArgs,
    },
    Logout {
        #[arg(long)]
        target: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Subcommand)]
enum ZfcpCommand {
    Probe,
    ActivateController {
        channel: String,
    },
    ActivateDisk {
        channel: String,
        wwpn: String,
        lun: String,
    },
    DeactivateDisk {
        channel: String,
        wwpn: String,
        lun: String,
    },
}

fn main() -> Result<ExitCode> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("storage_cli=info,storage_proposal=info,storage_sys=info,warn")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = StorageCli::parse();

    match cli.command {
        StorageCommand::Propose {
            config,
            devicegraph,
            settings,
            human,
        } => propose::run(&config, &devicegraph, settings.as_deref(), human),
        StorageCommand::Dasd { command, settings } => {
            require_root()?;
            activation::dasd(command, settings.as_deref())
        }
        StorageCommand::Iscsi { command } => {
            require_root()?;
            activation::iscsi(command)
        }
        StorageCommand::Zfcp { command } => {
            require_root()?;
            activation::zfcp(command)
        }
    }
}

fn require_root() -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("device activation must run as root");
        anyhow::bail!("this command needs root privileges");
    }
    Ok(())
}
