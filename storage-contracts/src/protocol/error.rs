// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_types::{Issue, IssueSource};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    InvalidInput,
    NotFound,
    PermissionDenied,
    NotBootable,
    NoSpace,
    Unsupported,
    Timeout,
    Unavailable,
    Internal,
}

impl StorageErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::PermissionDenied => 403,
            Self::NotBootable => 422,
            Self::NoSpace => 507,
            Self::Unsupported => 501,
            Self::Timeout => 504,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

/// Serialisable error handed to the outer boundary (CLI output, front ends)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error summarising a failed proposal from its first error issue
    pub fn from_issues(issues: &[Issue]) -> Option<Self> {
        let issue = issues.iter().find(|issue| issue.is_error())?;
        let kind = match issue.source {
            IssueSource::Config => StorageErrorKind::InvalidInput,
            IssueSource::Search => StorageErrorKind::NotFound,
            IssueSource::Boot => StorageErrorKind::NotBootable,
            IssueSource::Space => StorageErrorKind::NoSpace,
            IssueSource::Devices => StorageErrorKind::Internal,
        };
        Some(Self::new(kind, issue.message.clone()))
    }
}
