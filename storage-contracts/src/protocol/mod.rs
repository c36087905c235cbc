// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod events;
pub mod id;
pub mod operations;

pub use error::{StorageError, StorageErrorKind};
pub use events::{EventBus, Subscription};
pub use id::OperationId;
pub use operations::{
    ActivationEvent, FormatEvent, FormatStatus, OperationEvent, OperationKind, OperationProgress,
};
