// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use super::{OperationId, StorageError};

#[cfg(test)]
use super::StorageErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Proposal,
    DasdActivation,
    DasdFormat,
    IscsiActivation,
    ZfcpActivation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation_id: OperationId,
    pub operation: OperationKind,
    pub phase: String,
    pub step: u32,
    pub total_steps: u32,
}

impl OperationProgress {
    pub fn percent(&self) -> u8 {
        if self.total_steps == 0 {
            return 100;
        }
        ((self.step.min(self.total_steps) as f64 / self.total_steps as f64) * 100.0) as u8
    }

    pub fn is_finished(&self) -> bool {
        self.step >= self.total_steps
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum OperationEvent {
    Progress(OperationProgress),
    Completed {
        operation_id: OperationId,
        operation: OperationKind,
    },
    Failed {
        operation_id: OperationId,
        operation: OperationKind,
        error: StorageError,
    },
}

/// Format progress of one DASD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatStatus {
    /// Channel bus id
    pub id: String,
    pub total_cylinders: u64,
    pub formatted_cylinders: u64,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum FormatEvent {
    Progress {
        operation_id: OperationId,
        statuses: Vec<FormatStatus>,
    },
    Finished {
        operation_id: OperationId,
        success: bool,
        exit_code: Option<i32>,
    },
}

/// Events of a device activation manager; `T` is the device type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ActivationEvent<T> {
    /// Full snapshot after an explicit probe
    Probed(Vec<T>),

    /// Snapshot after every successful action, changed or not
    Refreshed(Vec<T>),

    /// Snapshot after an action, only when it differs from the previous one
    Changed(Vec<T>),
}

impl<T> ActivationEvent<T> {
    pub fn snapshot(&self) -> &[T] {
        match self {
            Self::Probed(devices) | Self::Refreshed(devices) | Self::Changed(devices) => devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_roundtrips_as_uuid_string() {
        let id = OperationId::new();
        let json = serde_json::to_string(&id).expect("serialize operation id");
        let parsed: OperationId = serde_json::from_str(&json).expect("deserialize operation id");
        assert_eq!(parsed, id);
    }

    #[test]
    fn operation_event_progress_roundtrips() {
        let event = OperationEvent::Progress(OperationProgress {
            operation_id: OperationId::new(),
            operation: OperationKind::Proposal,
            phase: "space_making".to_string(),
            step: 3,
            total_steps: 4,
        });

        let json = serde_json::to_string(&event).expect("serialize event");
        let parsed: OperationEvent = serde_json::from_str(&json).expect("deserialize event");
        assert_eq!(parsed, event);
    }

    #[test]
    fn failed_event_carries_the_error() {
        let event = OperationEvent::Failed {
            operation_id: OperationId::new(),
            operation: OperationKind::DasdFormat,
            error: StorageError::new(StorageErrorKind::Timeout, "dasdfmt did not start"),
        };
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["type"], "failed");
        assert_eq!(json["payload"]["error"]["kind"], "timeout");
    }

    #[test]
    fn progress_percent_is_clamped() {
        let mut progress = OperationProgress {
            operation_id: OperationId::new(),
            operation: OperationKind::Proposal,
            phase: "searching".to_string(),
            step: 1,
            total_steps: 4,
        };
        assert_eq!(progress.percent(), 25);
        progress.step = 9;
        assert_eq!(progress.percent(), 100);
        assert!(progress.is_finished());
    }

    #[test]
    fn activation_events_are_tagged() {
        let event = ActivationEvent::Changed(vec!["0.0.0150".to_string()]);
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["type"], "changed");
        assert_eq!(event.snapshot().len(), 1);
    }
}
