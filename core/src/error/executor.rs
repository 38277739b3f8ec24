use thiserror::Error;

use crate::state::{TaskKind, TaskStatus};

/// Errors raised by the task manager's public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {id} cannot be retried from status {status:?}")]
    NotRetryable { id: String, status: TaskStatus },

    #[error("no handler registered for task kind '{0}'")]
    MissingHandler(TaskKind),
}
