//! Task manager: bounded-concurrency scheduler with fixed-delay retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::TaskManagerConfig;
use crate::error::{ManagerError, TransferError};
use crate::state::{Task, TaskKind, TaskStats, TaskStatus, TaskTransition};

use super::handler::{TaskContext, TaskHandler};
use super::subscription::{Subscription, SubscriptionBus};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub type HandlerMap = HashMap<TaskKind, Arc<dyn TaskHandler>>;

/// Owns the task collection and drives every task through its lifecycle.
///
/// Cloning yields another handle to the same manager. All methods except
/// [`TaskManager::wait_idle`] are synchronous and never block on task work;
/// methods that may start tasks must be called within a Tokio runtime.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: TaskManagerConfig,
    handlers: HandlerMap,
    state: Mutex<ManagerState>,
    bus: Arc<SubscriptionBus>,
    idle: Notify,
}

#[derive(Default)]
struct ManagerState {
    /// Insertion order.
    entries: Vec<TaskEntry>,
}

struct TaskEntry {
    task: Task,
    /// Present only while `Running`.
    cancel: Option<CancellationToken>,
    /// Incremented on every admission; completions from older attempts are stale.
    attempt: u32,
    /// `Failed` but waiting for the retry delay to elapse.
    retry_scheduled: bool,
}

struct Launch {
    task: Task,
    attempt: u32,
    cancel: CancellationToken,
    handler: Arc<dyn TaskHandler>,
}

impl ManagerState {
    fn find_mut(&mut self, id: &str) -> Option<&mut TaskEntry> {
        self.entries.iter_mut().find(|e| e.task.id == id)
    }

    fn snapshot(&self) -> Vec<Task> {
        self.entries.iter().map(|e| e.task.clone()).collect()
    }

    fn running_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.task.status == TaskStatus::Running)
            .count()
    }

    fn is_idle(&self) -> bool {
        !self.entries.iter().any(|e| {
            e.retry_scheduled || matches!(e.task.status, TaskStatus::Pending | TaskStatus::Running)
        })
    }
}

impl TaskEntry {
    fn set_status(&mut self, to: TaskStatus) {
        if let Err(e) = TaskTransition::validate(self.task.status, to) {
            tracing::warn!(task_id = %self.task.id, "{e}");
        }
        self.task.status = to;
        self.task.touch();
    }

    fn mark_canceled(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.retry_scheduled = false;
        self.task.error = None;
        self.set_status(TaskStatus::Canceled);
    }
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig, handlers: HandlerMap) -> Self {
        let config = TaskManagerConfig {
            max_concurrent: config.max_concurrent.max(1),
            ..config
        };
        tracing::debug!(
            max_concurrent = config.max_concurrent,
            max_retries = config.max_retries,
            retry_delay_ms = config.retry_delay_ms,
            "task manager created"
        );

        let inner = ManagerInner {
            config,
            handlers,
            state: Mutex::new(ManagerState::default()),
            bus: Arc::new(SubscriptionBus::default()),
            idle: Notify::new(),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn builder(config: TaskManagerConfig) -> TaskManagerBuilder {
        TaskManagerBuilder {
            config,
            handlers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    /// Register a listener called after every mutation of the collection
    /// with a snapshot reflecting that mutation.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[Task]) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(callback)
    }

    /// Append tasks as `Pending` in submission order and fill free slots.
    pub fn enqueue(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }

        let mut st = lock(&self.inner.state);
        let count = tasks.len();
        for mut task in tasks {
            task.status = TaskStatus::Pending;
            task.progress = 0;
            task.error = None;
            st.entries.push(TaskEntry {
                task,
                cancel: None,
                attempt: 0,
                retry_scheduled: false,
            });
        }
        tracing::debug!("enqueued {} task(s), {} tracked", count, st.entries.len());
        self.stage(&st);

        let launches = self.admit(&mut st);
        self.commit(st, launches);
    }

    /// Cancel one task. Running tasks have their token fired; pending and
    /// retry-waiting tasks never reach the handler again. Terminal tasks are
    /// left untouched.
    pub fn cancel_task(&self, id: &str) -> Result<(), ManagerError> {
        let mut st = lock(&self.inner.state);
        let entry = st
            .find_mut(id)
            .ok_or_else(|| ManagerError::TaskNotFound(id.to_string()))?;

        let was_running = entry.task.status == TaskStatus::Running;
        match entry.task.status {
            TaskStatus::Running | TaskStatus::Pending => entry.mark_canceled(),
            TaskStatus::Failed if entry.retry_scheduled => entry.mark_canceled(),
            _ => return Ok(()),
        }
        tracing::info!(task_id = %id, "task canceled");
        self.stage(&st);

        let launches = if was_running {
            self.admit(&mut st)
        } else {
            Vec::new()
        };
        self.commit(st, launches);
        Ok(())
    }

    /// Cancel every task that has not started yet, including tasks waiting
    /// for a retry. Running tasks are not touched. Returns how many changed.
    pub fn cancel(&self) -> usize {
        let mut st = lock(&self.inner.state);
        let mut count = 0;
        for entry in st.entries.iter_mut() {
            if entry.task.status == TaskStatus::Pending || entry.retry_scheduled {
                entry.mark_canceled();
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!("canceled {} queued task(s)", count);
            self.stage(&st);
        }
        self.commit(st, Vec::new());
        count
    }

    /// Cancel queued and running tasks alike.
    pub fn cancel_all(&self) -> usize {
        let mut st = lock(&self.inner.state);
        let mut count = 0;
        for entry in st.entries.iter_mut() {
            if matches!(entry.task.status, TaskStatus::Pending | TaskStatus::Running)
                || entry.retry_scheduled
            {
                entry.mark_canceled();
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!("canceled {} task(s)", count);
            self.stage(&st);
        }
        self.commit(st, Vec::new());
        count
    }

    /// Re-queue a failed or canceled task as a fresh `Pending` task with
    /// its retry budget restored.
    pub fn retry_task(&self, id: &str) -> Result<(), ManagerError> {
        let mut st = lock(&self.inner.state);
        let entry = st
            .find_mut(id)
            .ok_or_else(|| ManagerError::TaskNotFound(id.to_string()))?;

        if !TaskTransition::is_retryable(entry.task.status) {
            return Err(ManagerError::NotRetryable {
                id: id.to_string(),
                status: entry.task.status,
            });
        }

        entry.retry_scheduled = false;
        entry.task.retry_count = 0;
        entry.task.progress = 0;
        entry.task.error = None;
        entry.task.status = TaskStatus::Pending;
        entry.task.touch();
        tracing::info!(task_id = %id, "task re-queued by operator");
        self.stage(&st);

        let launches = self.admit(&mut st);
        self.commit(st, launches);
        Ok(())
    }

    /// Remove a task whatever its status. A running task's token is fired so
    /// its transfer does not outlive the entry.
    pub fn remove_task(&self, id: &str) -> Result<Task, ManagerError> {
        let mut st = lock(&self.inner.state);
        let pos = st
            .entries
            .iter()
            .position(|e| e.task.id == id)
            .ok_or_else(|| ManagerError::TaskNotFound(id.to_string()))?;

        let mut entry = st.entries.remove(pos);
        if let Some(token) = entry.cancel.take() {
            token.cancel();
        }
        tracing::debug!(task_id = %id, "task removed");
        self.stage(&st);

        let launches = self.admit(&mut st);
        self.commit(st, launches);
        Ok(entry.task)
    }

    pub fn clear_tasks(&self) {
        let mut st = lock(&self.inner.state);
        for entry in st.entries.iter_mut() {
            if let Some(token) = entry.cancel.take() {
                token.cancel();
            }
        }
        st.entries.clear();
        tracing::debug!("task collection cleared");
        self.stage(&st);
        self.commit(st, Vec::new());
    }

    /// Snapshot of all tasks in insertion order.
    pub fn get_tasks(&self) -> Vec<Task> {
        lock(&self.inner.state).snapshot()
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        lock(&self.inner.state)
            .entries
            .iter()
            .find(|e| e.task.id == id)
            .map(|e| e.task.clone())
    }

    pub fn stats(&self) -> TaskStats {
        let st = lock(&self.inner.state);
        TaskStats::from_tasks(st.entries.iter().map(|e| &e.task))
    }

    /// True when nothing is pending, running or waiting for a retry.
    pub fn is_idle(&self) -> bool {
        lock(&self.inner.state).is_idle()
    }

    /// Resolve once the manager becomes idle.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Promote pending tasks, oldest first, into free running slots.
    fn admit(&self, st: &mut ManagerState) -> Vec<Launch> {
        let mut free = self
            .inner
            .config
            .max_concurrent
            .saturating_sub(st.running_count());
        let mut launches = Vec::new();
        let mut changed = false;

        for entry in st.entries.iter_mut() {
            if free == 0 {
                break;
            }
            if entry.task.status != TaskStatus::Pending {
                continue;
            }

            let Some(handler) = self.inner.handlers.get(&entry.task.kind).cloned() else {
                let err = ManagerError::MissingHandler(entry.task.kind);
                tracing::error!(task_id = %entry.task.id, "{err}");
                entry.task.error = Some(err.to_string());
                entry.set_status(TaskStatus::Failed);
                changed = true;
                continue;
            };

            let token = CancellationToken::new();
            entry.attempt += 1;
            entry.cancel = Some(token.clone());
            entry.task.progress = 0;
            entry.task.error = None;
            entry.set_status(TaskStatus::Running);
            tracing::debug!(
                task_id = %entry.task.id,
                kind = %entry.task.kind,
                attempt = entry.attempt,
                handler = handler.name(),
                "task admitted"
            );

            launches.push(Launch {
                task: entry.task.clone(),
                attempt: entry.attempt,
                cancel: token,
                handler,
            });
            free -= 1;
            changed = true;
        }

        if changed {
            self.stage(st);
        }
        launches
    }

    /// Queue a snapshot for listeners. Must be called with the state lock held
    /// so snapshots are queued in mutation order.
    fn stage(&self, st: &ManagerState) {
        if self.inner.bus.has_listeners() {
            self.inner.bus.enqueue(st.snapshot());
        }
    }

    /// Release the state lock, start admitted tasks and notify listeners.
    fn commit(&self, st: MutexGuard<'_, ManagerState>, launches: Vec<Launch>) {
        drop(st);
        for launch in launches {
            self.spawn(launch);
        }
        self.inner.bus.flush();
        self.inner.idle.notify_waiters();
    }

    fn spawn(&self, launch: Launch) {
        let Launch {
            task,
            attempt,
            cancel,
            handler,
        } = launch;
        let id = task.id.clone();

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let progress_id = id.clone();
        let ctx = TaskContext::new(id.clone(), attempt, cancel, move |percent| {
            if let Some(inner) = weak.upgrade() {
                TaskManager { inner }.report_progress(&progress_id, attempt, percent);
            }
        });

        let manager = self.clone();
        tokio::spawn(async move {
            // Run the handler in its own task so a panic is reported as a failure.
            let result = match tokio::spawn(async move { handler.execute(task, ctx).await }).await
            {
                Ok(result) => result,
                Err(join_err) => Err(TransferError::Internal(join_err.to_string())),
            };
            manager.settle(&id, attempt, result);
        });
    }

    fn report_progress(&self, id: &str, attempt: u32, percent: u8) {
        let mut st = lock(&self.inner.state);
        let Some(entry) = st.find_mut(id) else {
            return;
        };
        if entry.attempt != attempt
            || entry.task.status != TaskStatus::Running
            || percent <= entry.task.progress
        {
            return;
        }
        entry.task.progress = percent;
        entry.task.touch();
        self.stage(&st);
        self.commit(st, Vec::new());
    }

    fn settle(&self, id: &str, attempt: u32, result: Result<(), TransferError>) {
        let mut st = lock(&self.inner.state);
        let max_retries = self.inner.config.max_retries;

        let Some(entry) = st.find_mut(id) else {
            tracing::debug!(task_id = %id, "settled task is no longer tracked");
            return;
        };
        if entry.attempt != attempt || entry.task.status != TaskStatus::Running {
            // Canceled or superseded while the handler was in flight.
            tracing::debug!(task_id = %id, attempt, "ignoring stale completion");
            return;
        }
        entry.cancel = None;

        let mut retry = false;
        match result {
            Ok(()) => {
                entry.task.progress = 100;
                entry.task.error = None;
                entry.set_status(TaskStatus::Completed);
                tracing::info!(task_id = %id, kind = %entry.task.kind, "task completed");
            }
            Err(err) => {
                entry.task.error = Some(err.to_string());
                entry.set_status(TaskStatus::Failed);
                if entry.task.retry_count < max_retries {
                    entry.task.retry_count += 1;
                    entry.retry_scheduled = true;
                    retry = true;
                    tracing::warn!(
                        task_id = %id,
                        retry = entry.task.retry_count,
                        max_retries,
                        "task attempt failed, retrying: {}",
                        err
                    );
                } else {
                    tracing::error!(task_id = %id, "task failed: {}", err);
                }
            }
        }
        self.stage(&st);

        let launches = self.admit(&mut st);
        self.commit(st, launches);

        if retry {
            self.schedule_retry(id.to_string(), attempt);
        }
    }

    fn schedule_retry(&self, id: String, attempt: u32) {
        let delay = self.inner.config.retry_delay();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                TaskManager { inner }.requeue(&id, attempt);
            }
        });
    }

    fn requeue(&self, id: &str, attempt: u32) {
        let mut st = lock(&self.inner.state);
        let Some(entry) = st.find_mut(id) else {
            return;
        };
        if entry.attempt != attempt || !entry.retry_scheduled {
            return;
        }
        entry.retry_scheduled = false;
        entry.task.error = None;
        entry.task.progress = 0;
        entry.set_status(TaskStatus::Pending);
        tracing::debug!(task_id = %id, "retry delay elapsed, task pending again");
        self.stage(&st);

        let launches = self.admit(&mut st);
        self.commit(st, launches);
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.handlers.keys().collect::<Vec<_>>())
            .field("listeners", &self.inner.bus.listener_count())
            .finish()
    }
}

pub struct TaskManagerBuilder {
    config: TaskManagerConfig,
    handlers: HandlerMap,
}

impl TaskManagerBuilder {
    pub fn handler(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn build(self) -> TaskManager {
        TaskManager::new(self.config, self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::handler_fn;
    use crate::state::{DeletePayload, TaskDisplay, TaskPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn delete_task(key: &str) -> Task {
        Task::new(
            TaskPayload::Delete(DeletePayload {
                bucket: "bucket".into(),
                key: key.into(),
                version_id: None,
                prefix: None,
                force_delete: false,
            }),
            TaskDisplay::default(),
        )
    }

    fn config(max_concurrent: usize, max_retries: u32) -> TaskManagerConfig {
        TaskManagerConfig {
            max_concurrent,
            max_retries,
            retry_delay_ms: 5,
        }
    }

    async fn idle(manager: &TaskManager) {
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .expect("manager did not become idle");
    }

    #[tokio::test]
    async fn test_completes_tasks() {
        let manager = TaskManager::builder(config(2, 0))
            .handler(
                TaskKind::Delete,
                handler_fn("ok", |_task, ctx| async move {
                    ctx.set_progress(50);
                    Ok(())
                }),
            )
            .build();

        manager.enqueue(vec![delete_task("a"), delete_task("b"), delete_task("c")]);
        idle(&manager).await;

        let stats = manager.stats();
        assert_eq!(stats.completed, 3);
        assert!(manager
            .get_tasks()
            .iter()
            .all(|t| t.progress == 100 && t.error.is_none()));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_without_retry() {
        let manager = TaskManager::new(config(1, 3), HashMap::new());
        let task = delete_task("a");
        let id = task.id.clone();
        manager.enqueue(vec![task]);

        let task = manager.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
        assert!(task.error.unwrap().contains("no handler"));
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = TaskManager::builder(config(1, 3))
            .handler(
                TaskKind::Delete,
                handler_fn("flaky", move |_task, _ctx| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TransferError::Network("connection reset".into()))
                        } else {
                            Ok(())
                        }
                    }
                }),
            )
            .build();

        let task = delete_task("a");
        let id = task.id.clone();
        manager.enqueue(vec![task]);
        idle(&manager).await;

        let task = manager.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_task_requeues_failed() {
        let manager = TaskManager::builder(config(1, 0))
            .handler(
                TaskKind::Delete,
                handler_fn("deny", |_task, _ctx| async {
                    Err(TransferError::Rejected("access denied".into()))
                }),
            )
            .build();
        let task = delete_task("a");
        let id = task.id.clone();
        manager.enqueue(vec![task]);
        idle(&manager).await;
        assert_eq!(manager.get_task(&id).unwrap().status, TaskStatus::Failed);

        manager.retry_task(&id).unwrap();
        idle(&manager).await;
        let task = manager.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("backend rejected request: access denied")
        );

        assert!(matches!(
            manager.retry_task("missing"),
            Err(ManagerError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let manager = TaskManager::new(config(1, 0), HashMap::new());
        let a = delete_task("a");
        let id = a.id.clone();
        manager.enqueue(vec![a, delete_task("b")]);

        let removed = manager.remove_task(&id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(manager.get_tasks().len(), 1);
        assert!(manager.remove_task(&id).is_err());

        manager.clear_tasks();
        assert!(manager.get_tasks().is_empty());
    }

    fn blocking_manager(started: Arc<AtomicUsize>, aborted: Arc<AtomicUsize>) -> TaskManager {
        TaskManager::builder(config(1, 3))
            .handler(
                TaskKind::Delete,
                handler_fn("block", move |_task, ctx| {
                    let started = started.clone();
                    let aborted = aborted.clone();
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        ctx.cancel_token().cancelled().await;
                        aborted.fetch_add(1, Ordering::SeqCst);
                        Err(TransferError::Aborted)
                    }
                }),
            )
            .build()
    }

    async fn until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_remove_and_clear_running_tasks() {
        let started = Arc::new(AtomicUsize::new(0));
        let aborted = Arc::new(AtomicUsize::new(0));
        let manager = blocking_manager(started.clone(), aborted.clone());
        let tasks = vec![delete_task("a"), delete_task("b"), delete_task("c")];
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        manager.enqueue(tasks);
        until(|| started.load(Ordering::SeqCst) == 1).await;

        let removed = manager.remove_task(&ids[0]).unwrap();
        assert_eq!(removed.status, TaskStatus::Running);
        assert_eq!(manager.get_task(&ids[1]).unwrap().status, TaskStatus::Running);
        assert_eq!(manager.get_task(&ids[2]).unwrap().status, TaskStatus::Pending);

        // the removed attempt observes its token and settles with an error
        until(|| aborted.load(Ordering::SeqCst) == 1).await;
        until(|| started.load(Ordering::SeqCst) == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.get_task(&ids[0]).is_none());
        let stats = manager.stats();
        assert_eq!((stats.running, stats.pending, stats.failed), (1, 1, 0));

        manager.clear_tasks();
        assert!(manager.get_tasks().is_empty());
        assert!(manager.is_idle());
        until(|| aborted.load(Ordering::SeqCst) == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.get_tasks().is_empty());
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }
}
