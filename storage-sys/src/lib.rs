// SPDX-License-Identifier: GPL-3.0-only

//! System operations for storage activation
//!
//! This crate brings storage transport hardware online before the machine
//! gets probed:
//! - s390 DASDs (enable, disable, DIAG mode, low-level format)
//! - iSCSI targets (discovery, login, logout, startup mode)
//! - zFCP controllers and LUNs
//!
//! Every external tool runs through a [`System`], so the managers can be
//! exercised without the hardware. Most operations require root privileges.

pub mod activation;
pub mod dasd;
pub mod dasd_format;
pub mod error;
pub mod iscsi;
pub mod system;
pub mod zfcp;

pub use activation::{BatchResult, DeviceSnapshot};
pub use dasd::DasdManager;
pub use dasd_format::{FormatJob, FormatState};
pub use error::{Result, SysError};
pub use iscsi::IscsiManager;
pub use system::{CommandOutput, FormatProcess, LinuxSystem, System};
pub use zfcp::ZfcpManager;
