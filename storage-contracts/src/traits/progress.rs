// SPDX-License-Identifier: GPL-3.0-only

use crate::{OperationEvent, OperationProgress, Subscription};

/// Component running a multi-step operation
pub trait ProgressReporter {
    /// Progress of the running or last operation
    fn progress(&self) -> Option<&OperationProgress>;

    /// Progress, completion and failure events of future operations
    fn subscribe_progress(&self) -> Subscription<OperationEvent>;
}
