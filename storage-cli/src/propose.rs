// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;
use storage_contracts::{IssuesReporter, StorageError};
use storage_proposal::{Proposal, ProposalState};
use storage_types::{Config, DeviceInfo, Devicegraph, Issue, ProductSettings, bytes_to_pretty};

#[derive(Debug, Serialize)]
pub struct ProposalReport {
    pub state: ProposalState,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StorageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceInfo>>,
}

impl ProposalReport {
    fn new(proposal: &Proposal) -> Self {
        let devices = proposal.layout();
        Self {
            state: proposal.state(),
            issues: proposal.issues().to_vec(),
            error: devices
                .is_none()
                .then(|| StorageError::from_issues(proposal.issues()))
                .flatten(),
            devices,
        }
    }

    pub fn is_success(&self) -> bool {
        self.devices.is_some()
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<ProductSettings> {
    match path {
        Some(path) => ProductSettings::load(path)
            .with_context(|| format!("failed to read product settings {}", path.display())),
        None => Ok(ProductSettings::default()),
    }
}

/// Reads the documents and runs one proposal over them
pub fn propose_files(
    config: &Path,
    devicegraph: &Path,
    settings: Option<&Path>,
) -> Result<ProposalReport> {
    let settings = load_settings(settings)?;
    let config = Config::load(config, &settings)
        .with_context(|| format!("failed to read storage config {}", config.display()))?;
    let devicegraph = Devicegraph::load(devicegraph)
        .with_context(|| format!("failed to read devicegraph {}", devicegraph.display()))?;

    let mut proposal = Proposal::new(settings);
    if proposal.propose(&config, &devicegraph) {
        tracing::info!("proposal succeeded with {} issues", proposal.issues().len());
    } else {
        tracing::warn!("proposal failed");
    }
    Ok(ProposalReport::new(&proposal))
}

pub fn run(
    config: &Path,
    devicegraph: &Path,
    settings: Option<&Path>,
    human: bool,
) -> Result<ExitCode> {
    let report = propose_files(config, devicegraph, settings)?;
    if human {
        print!("{}", render_table(&report));
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn render_table(report: &ProposalReport) -> String {
    let mut out = String::new();
    for issue in &report.issues {
        out.push_str(&format!("{:?}: {}\n", issue.severity, issue.message));
    }
    let Some(devices) = &report.devices else {
        out.push_str("no proposal\n");
        return out;
    };
    for device in devices {
        let (fs, mount) = device
            .filesystem
            .as_ref()
            .map(|fs| (fs.fs_type.as_str(), fs.mount_path.as_deref().unwrap_or("")))
            .unwrap_or(("", ""));
        out.push_str(&format!(
            "{:<24} {:>12} {:<8} {}\n",
            device.name,
            bytes_to_pretty(&device.size, false),
            fs,
            mount
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage_types::{Disk, GIB};

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn single_disk(dir: &Path, size: u64) -> std::path::PathBuf {
        let mut graph = Devicegraph::new();
        graph.disks.push(Disk::new(1, "/dev/vda", size));
        write(dir, "devicegraph.json", &serde_json::to_string(&graph).unwrap())
    }

    #[test]
    fn proposes_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let devicegraph = single_disk(dir.path(), 20 * GIB);
        let config = write(
            dir.path(),
            "config.json",
            &json!({
                "drives": [{
                    "search": "/dev/vda",
                    "partitions": [{ "filesystem": "btrfs", "mount": { "path": "/" } }]
                }]
            })
            .to_string(),
        );

        let report = propose_files(&config, &devicegraph, None).unwrap();

        assert!(report.is_success());
        assert!(report.error.is_none());
        let table = render_table(&report);
        assert!(table.contains("/dev/vda"));
        assert!(table.contains("btrfs"));
    }

    #[test]
    fn failed_proposal_has_no_devices() {
        let dir = tempfile::tempdir().unwrap();
        let devicegraph = single_disk(dir.path(), 20 * GIB);
        let config = write(
            dir.path(),
            "config.json",
            &json!({ "drives": [{ "search": "/dev/sdz" }] }).to_string(),
        );

        let report = propose_files(&config, &devicegraph, None).unwrap();

        assert!(!report.is_success());
        assert!(report.error.is_some());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("devices").is_none());
        assert!(!json["issues"].as_array().unwrap().is_empty());
    }

    #[test]
    fn missing_documents_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let devicegraph = single_disk(dir.path(), 20 * GIB);
        let missing = dir.path().join("nope.json");

        let error = propose_files(&missing, &devicegraph, None).unwrap_err();
        assert!(error.to_string().contains("storage config"));
    }
}
