// SPDX-License-Identifier: GPL-3.0-only

//! Proposal orchestration: check, search, plan, make space, create

use serde::{Deserialize, Serialize};
use storage_contracts::{
    EventBus, IssuesReporter, OperationEvent, OperationId, OperationKind, OperationProgress,
    ProgressReporter, StorageError, StorageErrorKind, Subscription, Validation,
};
use storage_types::{
    Config, DeviceInfo, Devicegraph, Issue, ProductSettings, export_layout, has_errors,
};
use tracing::{error, info, warn};

use crate::checker::ConfigChecker;
use crate::creator::DevicesCreator;
use crate::planner::{ArchBootPolicy, BootRequirementsDomain, DevicesPlanner};
use crate::search::resolve;
use crate::space_maker::SpaceMaker;

const TOTAL_STEPS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    NotProposed,
    Searching,
    Planning,
    SpaceMaking,
    Creating,
    Proposed,
    Failed,
}

impl ProposalState {
    fn phase(self) -> &'static str {
        match self {
            Self::NotProposed => "not_proposed",
            Self::Searching => "searching",
            Self::Planning => "planning",
            Self::SpaceMaking => "space_making",
            Self::Creating => "creating",
            Self::Proposed => "proposed",
            Self::Failed => "failed",
        }
    }
}

pub struct Proposal {
    settings: ProductSettings,
    boot: Box<dyn BootRequirementsDomain>,
    state: ProposalState,
    issues: Vec<Issue>,
    resolved: Option<Config>,
    target: Option<Devicegraph>,
    progress: Option<OperationProgress>,
    events: EventBus<OperationEvent>,
}

impl Proposal {
    pub fn new(settings: ProductSettings) -> Self {
        let boot = Box::new(ArchBootPolicy::new(&settings.boot));
        Self::with_boot_policy(settings, boot)
    }

    pub fn with_boot_policy(
        settings: ProductSettings,
        boot: Box<dyn BootRequirementsDomain>,
    ) -> Self {
        Self {
            settings,
            boot,
            state: ProposalState::NotProposed,
            issues: Vec::new(),
            resolved: None,
            target: None,
            progress: None,
            events: EventBus::new(),
        }
    }

    pub fn settings(&self) -> &ProductSettings {
        &self.settings
    }

    pub fn state(&self) -> ProposalState {
        self.state
    }

    /// Devicegraph after a successful proposal
    pub fn target(&self) -> Option<&Devicegraph> {
        self.target.as_ref()
    }

    /// Config with every search bound to its device
    pub fn resolved_config(&self) -> Option<&Config> {
        self.resolved.as_ref()
    }

    pub fn layout(&self) -> Option<Vec<DeviceInfo>> {
        self.target.as_ref().map(export_layout)
    }

    /// Computes a new target devicegraph from `config`, starting over from
    /// `devicegraph`. Returns whether the proposal succeeded; the issues tell
    /// why it did not.
    pub fn propose(&mut self, config: &Config, devicegraph: &Devicegraph) -> bool {
        let operation_id = OperationId::new();
        self.issues.clear();
        self.resolved = None;
        self.target = None;

        self.enter(operation_id, ProposalState::Searching, 1);
        self.issues.extend(ConfigChecker::new(config).validate());
        let resolution = resolve(config, devicegraph);
        self.issues.extend(resolution.issues);
        self.resolved = Some(resolution.config);
        if has_errors(&self.issues) {
            return self.fail(operation_id);
        }
        if self.resolved.is_none() {
            return self.fail(operation_id);
        }

        self.enter(operation_id, ProposalState::Planning, 2);
        let Some(resolved) = self.resolved.as_ref() else {
            return self.fail(operation_id);
        };
        let plan =
            DevicesPlanner::new(&self.settings, devicegraph, self.boot.as_ref()).plan(resolved);
        self.issues.extend(plan.issues.iter().cloned());
        if has_errors(&self.issues) {
            return self.fail(operation_id);
        }

        let mut target = devicegraph.clone();
        self.enter(operation_id, ProposalState::SpaceMaking, 3);
        match SpaceMaker::new(&plan, self.settings.storage.ptable_type).make_space(&mut target) {
            Ok(issues) => self.issues.extend(issues),
            Err(error) => self.issues.push(error.to_issue()),
        }
        if has_errors(&self.issues) {
            return self.fail(operation_id);
        }

        self.enter(operation_id, ProposalState::Creating, 4);
        if let Err(error) = DevicesCreator::new(&self.settings, &plan).create(&mut target) {
            self.issues.push(error.to_issue());
            return self.fail(operation_id);
        }

        for issue in self.issues.iter() {
            warn!("proposal warning: {}", issue.message);
        }
        info!("proposal succeeded with {} devices", target.all_sids().len());
        self.target = Some(target);
        self.state = ProposalState::Proposed;
        self.events.publish(OperationEvent::Completed {
            operation_id,
            operation: OperationKind::Proposal,
        });
        true
    }

    fn enter(&mut self, operation_id: OperationId, state: ProposalState, step: u32) {
        info!("proposal: {}", state.phase());
        self.state = state;
        let progress = OperationProgress {
            operation_id,
            operation: OperationKind::Proposal,
            phase: state.phase().to_string(),
            step,
            total_steps: TOTAL_STEPS,
        };
        self.events.publish(OperationEvent::Progress(progress.clone()));
        self.progress = Some(progress);
    }

    fn fail(&mut self, operation_id: OperationId) -> bool {
        let error = StorageError::from_issues(&self.issues).unwrap_or_else(|| {
            StorageError::new(StorageErrorKind::Internal, "the proposal failed")
        });
        error!(
            "proposal failed while {}: {}",
            self.state.phase(),
            error.message
        );
        self.state = ProposalState::Failed;
        self.target = None;
        self.events.publish(OperationEvent::Failed {
            operation_id,
            operation: OperationKind::Proposal,
            error,
        });
        false
    }
}

impl IssuesReporter for Proposal {
    fn issues(&self) -> &[Issue] {
        &self.issues
    }
}

impl ProgressReporter for Proposal {
    fn progress(&self) -> Option<&OperationProgress> {
        self.progress.as_ref()
    }

    fn subscribe_progress(&self) -> Subscription<OperationEvent> {
        self.events.subscribe()
    }
}
