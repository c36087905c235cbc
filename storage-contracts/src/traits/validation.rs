// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{Issue, has_errors};

/// Semantic checks of a value, reported as issues
pub trait Validation {
    fn validate(&self) -> Vec<Issue>;

    fn is_valid(&self) -> bool {
        !has_errors(&self.validate())
    }
}
