// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{
    ActivationEvent, EventBus, FormatEvent, FormatStatus, OperationEvent, OperationId,
    OperationKind, OperationProgress, StorageError, StorageErrorKind, Subscription,
};
pub use traits::{ActivationManager, IssuesReporter, ProgressReporter, Validation};
