//! Issues reported while resolving and planning a storage config
//!
//! Issues are domain-level problems. They are collected in declaration order
//! and handed to the caller instead of being raised; only `Error` issues stop
//! a proposal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// Broad origin of an issue, used by front ends to group messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Config,
    Search,
    Boot,
    Space,
    Devices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub source: IssueSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Issue {
    pub fn error(source: IssueSource, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            source,
            message: message.into(),
            details: None,
        }
    }

    pub fn warning(source: IssueSource, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            source,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }
}

/// Whether any issue in the list is fatal
pub fn has_errors(issues: &[Issue]) -> bool {
    issues.iter().any(Issue::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_errors_are_fatal() {
        let warnings = vec![Issue::warning(IssueSource::Space, "little room left")];
        assert!(!has_errors(&warnings));

        let mixed = vec![
            warnings[0].clone(),
            Issue::error(IssueSource::Search, "no device found").with_details("drive 0"),
        ];
        assert!(has_errors(&mixed));
    }

    #[test]
    fn details_are_omitted_when_absent() {
        let issue = Issue::error(IssueSource::Boot, "not bootable");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["severity"], "error");
        assert!(json.get("details").is_none());
    }
}
