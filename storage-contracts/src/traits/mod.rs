// SPDX-License-Identifier: GPL-3.0-only

pub mod activation;
pub mod issues;
pub mod progress;
pub mod validation;

pub use activation::ActivationManager;
pub use issues::IssuesReporter;
pub use progress::ProgressReporter;
pub use validation::Validation;
