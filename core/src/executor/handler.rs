use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::state::Task;

/// Kind-specific executor of a task's network work.
///
/// The manager calls `execute` once per attempt with a snapshot of the task
/// and a fresh [`TaskContext`]. Implementations must observe
/// `ctx.cancel_token()` and return promptly once it fires.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, task: Task, ctx: TaskContext) -> Result<(), TransferError>;
}

type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Per-attempt handle given to a handler: cancellation and progress reporting.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    attempt: u32,
    cancel: CancellationToken,
    progress: ProgressFn,
}

impl TaskContext {
    pub fn new<P>(
        task_id: impl Into<String>,
        attempt: u32,
        cancel: CancellationToken,
        progress: P,
    ) -> Self
    where
        P: Fn(u8) + Send + Sync + 'static,
    {
        Self {
            task_id: task_id.into(),
            attempt,
            cancel,
            progress: Arc::new(progress),
        }
    }

    /// Context not attached to any manager. Progress reports are discarded.
    pub fn detached(task_id: impl Into<String>) -> Self {
        Self::new(task_id, 1, CancellationToken::new(), |_| {})
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report progress in percent; values above 100 are clamped.
    pub fn set_progress(&self, percent: u8) {
        (self.progress)(percent.min(100));
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TransferError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: Task, ctx: TaskContext) -> Result<(), TransferError> {
        (self.f)(task, ctx).await
    }
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TransferError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
