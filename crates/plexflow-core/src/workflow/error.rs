//! Engine-level errors shared by the interpreter and the resolver.

use plexflow_types::workflow::{StepFailure, StepKind};
use thiserror::Error;

use super::context::ContextError;
use super::dag::PlanError;
use super::definition::BlueprintError;
use super::durable::ActivityError;

/// Why a run (or one step of it) did not complete.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("step '{step_id}' has unknown kind '{kind}'")]
    UnknownStepKind { step_id: String, kind: String },

    /// The executor reported a terminal failure for a leaf or child workflow.
    #[error("step '{step_id}' ({kind}) failed: {source}")]
    ActivityExecution {
        step_id: String,
        kind: StepKind,
        #[source]
        source: ActivityError,
    },

    #[error("step '{step_id}' uses unregistered operation '{operation}'")]
    UnknownOperation { step_id: String, operation: String },

    /// No remaining step can become ready, or the round cap was exhausted.
    #[error("unresolved dependencies for steps {unresolved:?} (missing: {missing:?}, cycles: {cycles:?})")]
    UnresolvedDependency {
        unresolved: Vec<String>,
        missing: Vec<(String, String)>,
        cycles: Vec<Vec<String>>,
    },

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error(transparent)]
    Blueprint(BlueprintError),

    /// A spawned branch panicked or was cancelled.
    #[error("step '{step_id}' branch task failed: {message}")]
    Join { step_id: String, message: String },
}

impl ExecutionError {
    /// The step to blame, when there is exactly one.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutionError::UnknownStepKind { step_id, .. }
            | ExecutionError::ActivityExecution { step_id, .. }
            | ExecutionError::UnknownOperation { step_id, .. }
            | ExecutionError::Join { step_id, .. } => Some(step_id.as_str()),
            ExecutionError::DuplicateStepId(step_id) => Some(step_id.as_str()),
            ExecutionError::UnresolvedDependency { .. } | ExecutionError::Blueprint(_) => None,
        }
    }

    /// Failure record for the result, given the kind of the blamed step.
    pub fn to_failure(&self, kind: StepKind) -> Option<StepFailure> {
        let kind = match self {
            ExecutionError::ActivityExecution { kind, .. } => *kind,
            _ => kind,
        };
        self.step_id().map(|step_id| StepFailure {
            step_id: step_id.to_string(),
            kind,
            error: self.to_string(),
        })
    }
}

impl From<BlueprintError> for ExecutionError {
    fn from(err: BlueprintError) -> Self {
        match err {
            BlueprintError::UnknownStepKind { step_id, kind } => {
                ExecutionError::UnknownStepKind { step_id, kind }
            }
            BlueprintError::UnknownOperation { step_id, operation } => {
                ExecutionError::UnknownOperation { step_id, operation }
            }
            BlueprintError::DuplicateStepId(step_id) => ExecutionError::DuplicateStepId(step_id),
            other => ExecutionError::Blueprint(other),
        }
    }
}

impl From<ContextError> for ExecutionError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::DuplicateStepId(step_id) => ExecutionError::DuplicateStepId(step_id),
            ContextError::InvalidPayload(message) => {
                ExecutionError::Blueprint(BlueprintError::Validation(message))
            }
        }
    }
}

impl From<PlanError> for ExecutionError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::DuplicateStepId(step_id) => ExecutionError::DuplicateStepId(step_id),
            other => ExecutionError::Blueprint(BlueprintError::Validation(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
