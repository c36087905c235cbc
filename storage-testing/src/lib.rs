// SPDX-License-Identifier: GPL-3.0-only

//! Test support for the storage stack
//!
//! - [`fake`]: a scripted [`System`](storage_sys::System) and format process,
//!   so the activation managers run without s390 or iSCSI hardware
//! - [`fixtures`]: devicegraph and config builders
//!
//! The integration tests under `tests/` exercise the proposal engine and the
//! managers together.

pub mod fake;
pub mod fixtures;

pub use fake::{FakeFormatProcess, FakeSystem, exit_code, output};
pub use fixtures::{GraphBuilder, config, partition_name};
