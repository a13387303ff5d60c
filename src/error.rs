use thiserror::Error;

use crate::task::{Phase, TaskKey};

/// Configuration errors detected while assembling the task graph.
///
/// All of these are fatal and are reported before any discovery or apply
/// takes place, so a malformed graph never reaches the provider.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task {0} is declared more than once")]
    DuplicateTask(TaskKey),

    #[error("task {task} references unknown task {dependency}")]
    UnknownDependency { task: TaskKey, dependency: TaskKey },

    #[error("task of kind {0:?} has no name")]
    UnnamedTask(&'static str),

    #[error("dependency cycle detected: {0}")]
    Cycle(String),
}

/// Errors returned by per-kind task operations.
///
/// The first three variants are contract violations and permanently fail the
/// task for the run. [`TaskError::TryAgainLater`] is the distinguished
/// transient signal: the executor re-queues the task into a later wave
/// instead of failing it. Anything a kind cannot classify ends up as
/// [`TaskError::Provider`] and is treated as permanent.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("required field {0:?} is not set")]
    RequiredField(&'static str),

    #[error("field {0:?} cannot be changed after creation")]
    CannotChangeField(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("conditions not yet met: {reason}")]
    TryAgainLater { reason: String },

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl TaskError {
    /// A mandatory field was unset on first creation.
    pub fn required_field(field: &'static str) -> Self {
        TaskError::RequiredField(field)
    }

    /// An immutable field differs between actual and expected state.
    pub fn cannot_change_field(field: &'static str) -> Self {
        TaskError::CannotChangeField(field)
    }

    /// Any other constraint violation, e.g. mutually exclusive fields.
    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }

    /// Signal a transient ordering problem: the task should be retried in a
    /// later wave rather than failed now. Kinds use this to re-classify
    /// known-transient provider error codes (eventual-consistency windows).
    pub fn try_again_later(reason: impl Into<String>) -> Self {
        TaskError::TryAgainLater {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::TryAgainLater { .. })
    }
}

/// A task failure tagged with the convergence phase it occurred in.
#[derive(Debug, Error)]
#[error("{phase}: {error}")]
pub struct StepError {
    pub phase: Phase,
    #[source]
    pub error: TaskError,
}

impl StepError {
    pub(crate) fn new(phase: Phase, error: TaskError) -> Self {
        Self { phase, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TaskError::try_again_later("waiting for gateway").is_transient());
        assert!(!TaskError::required_field("Name").is_transient());
        assert!(!TaskError::Provider(anyhow::anyhow!("boom")).is_transient());
    }

    #[test]
    fn step_error_display() {
        let err = StepError::new(Phase::Apply, TaskError::try_again_later("not ready"));
        assert_eq!(err.to_string(), "apply: conditions not yet met: not ready");
    }
}
