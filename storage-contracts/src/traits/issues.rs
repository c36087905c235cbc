// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{Issue, IssueSeverity};

/// Component keeping the issues of its last run
pub trait IssuesReporter {
    fn issues(&self) -> &[Issue];

    fn has_errors(&self) -> bool {
        storage_types::has_errors(self.issues())
    }

    fn issues_with(&self, severity: IssueSeverity) -> Vec<&Issue> {
        self.issues()
            .iter()
            .filter(|issue| issue.severity == severity)
            .collect()
    }
}
