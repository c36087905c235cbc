// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{Issue, IssueSource, bytes_to_pretty};
use thiserror::Error;

/// Fatal problems of a proposal stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposalError {
    #[error("the system is not bootable: {0}")]
    NotBootable(String),

    #[error("not enough space on {device}: {needed} bytes needed, {available} available")]
    NoSpace {
        device: String,
        needed: u64,
        available: u64,
    },

    #[error("cannot create devices: {0}")]
    Creation(String),

    #[error("inconsistent proposal: {0}")]
    Inconsistent(String),
}

impl ProposalError {
    pub fn to_issue(&self) -> Issue {
        match self {
            Self::NotBootable(reason) => Issue::error(
                IssueSource::Boot,
                "It is not possible to install the boot loader",
            )
            .with_details(reason.clone()),
            Self::NoSpace {
                device,
                needed,
                available,
            } => Issue::error(IssueSource::Space, format!("Not enough space on {device}"))
                .with_details(format!(
                    "{} needed, {} available",
                    bytes_to_pretty(needed, false),
                    bytes_to_pretty(available, false)
                )),
            Self::Creation(message) | Self::Inconsistent(message) => {
                Issue::error(IssueSource::Devices, message.clone())
            }
        }
    }
}

/// Result type alias for proposal stages
pub type Result<T> = std::result::Result<T, ProposalError>;
