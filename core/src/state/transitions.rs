//! Task status transition rules

use super::types::TaskStatus;
use thiserror::Error;

/// Rejected status transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("Cannot transition from terminal state {state:?}")]
    FromTerminalState { state: TaskStatus },
}

/// Task status transitions
pub struct TaskTransition;

impl TaskTransition {
    /// Validate a scheduler-driven transition.
    ///
    /// `Failed` is only terminal once retries are exhausted, so it may go back
    /// to `Pending`. `Paused` is never a valid target.
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if matches!(from, TaskStatus::Completed | TaskStatus::Canceled) {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Canceled) => true,
            // no handler registered for the kind
            (TaskStatus::Pending, TaskStatus::Failed) => true,

            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Canceled) => true,

            // retry wait elapsed, or cancel while waiting
            (TaskStatus::Failed, TaskStatus::Pending) => true,
            (TaskStatus::Failed, TaskStatus::Canceled) => true,

            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    /// Whether an operator may re-queue the task by hand.
    pub fn is_retryable(status: TaskStatus) -> bool {
        matches!(status, TaskStatus::Failed | TaskStatus::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(TaskTransition::validate(TaskStatus::Pending, TaskStatus::Running).is_ok());
        assert!(TaskTransition::validate(TaskStatus::Running, TaskStatus::Completed).is_ok());
        assert!(TaskTransition::validate(TaskStatus::Failed, TaskStatus::Pending).is_ok());
        assert!(TaskTransition::validate(TaskStatus::Running, TaskStatus::Canceled).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(
            TaskTransition::validate(TaskStatus::Pending, TaskStatus::Completed),
            Err(TransitionError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            })
        );
        assert!(TaskTransition::validate(TaskStatus::Completed, TaskStatus::Pending).is_err());
        assert!(TaskTransition::validate(TaskStatus::Canceled, TaskStatus::Running).is_err());
    }

    #[test]
    fn test_paused_is_unreachable() {
        for from in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Failed,
        ] {
            assert!(TaskTransition::validate(from, TaskStatus::Paused).is_err());
        }
    }

    #[test]
    fn test_retryable_states() {
        assert!(TaskTransition::is_retryable(TaskStatus::Failed));
        assert!(TaskTransition::is_retryable(TaskStatus::Canceled));
        assert!(!TaskTransition::is_retryable(TaskStatus::Completed));
        assert!(!TaskTransition::is_retryable(TaskStatus::Running));
    }
}
