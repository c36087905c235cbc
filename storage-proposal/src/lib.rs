// SPDX-License-Identifier: GPL-3.0-only

//! Storage proposal engine
//!
//! Turns a storage [`Config`](storage_types::Config) and the devicegraph of a
//! machine into a target devicegraph. The work happens in stages:
//!
//! - [`checker`]: structural validation of the config
//! - [`search`]: binds every search of the config to a device
//! - [`planner`]: decides which devices get created, reused or deleted
//! - [`space_maker`]: deletes and shrinks partitions until the plan fits
//! - [`creator`]: materialises the plan in the target devicegraph
//!
//! [`Proposal`] drives the stages and reports issues and progress.

pub mod checker;
pub mod creator;
pub mod error;
pub mod placement;
pub mod planner;
pub mod proposal;
pub mod search;
pub mod space_maker;

pub use checker::ConfigChecker;
pub use creator::DevicesCreator;
pub use error::{ProposalError, Result};
pub use planner::{
    ArchBootPolicy, BootPartition, BootRequirementsDomain, DevicesPlanner, Plan, PlannedDevice,
};
pub use proposal::{Proposal, ProposalState};
pub use search::{Resolution, resolve};
pub use space_maker::SpaceMaker;
