use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::state::{Task, TaskStats, TaskStatus};
use crate::util::display::truncate_middle;

use super::manager::{lock, TaskManager};
use super::subscription::Subscription;

/// Visual progress monitor for a task manager
///
/// Subscribes to the manager and keeps one bar per started task plus an
/// overall bar counting settled tasks.
pub struct ProgressMonitor {
    inner: Arc<MonitorInner>,
    subscription: Option<Subscription>,
}

struct MonitorInner {
    /// Multi-progress container
    multi: MultiProgress,
    /// Overall progress bar
    overall: ProgressBar,
    /// Per-task bars, keyed by task id
    task_bars: Mutex<HashMap<String, ProgressBar>>,
    /// Whether monitoring is enabled
    enabled: bool,
}

impl ProgressMonitor {
    /// Create a new progress monitor
    ///
    /// # Arguments
    ///
    /// * `enabled` - Whether to draw anything (disabled for quiet/json output)
    pub fn new(enabled: bool) -> Self {
        let multi = MultiProgress::new();
        let overall = if enabled {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓▒░  "),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            inner: Arc::new(MonitorInner {
                multi,
                overall,
                task_bars: Mutex::new(HashMap::new()),
                enabled,
            }),
            subscription: None,
        }
    }

    /// Start following `manager`. Re-attaching replaces the previous subscription.
    pub fn attach(&mut self, manager: &TaskManager) {
        self.detach();
        if !self.inner.enabled {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.subscription = Some(manager.subscribe(move |tasks| inner.render(tasks)));
    }

    pub fn detach(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
    }

    /// Update overall progress message
    pub fn set_message(&self, msg: &str) {
        if self.inner.enabled {
            self.inner.overall.set_message(msg.to_string());
        }
    }

    /// Finish overall progress
    pub fn finish(&mut self, stats: &TaskStats) {
        self.detach();
        if !self.inner.enabled {
            return;
        }

        let msg = if stats.failed == 0 && stats.canceled == 0 {
            format!("✅ {} task(s) completed", stats.completed)
        } else {
            format!(
                "❌ {} completed, {} failed, {} canceled",
                stats.completed, stats.failed, stats.canceled
            )
        };
        self.inner.overall.finish_with_message(msg);
    }
}

impl MonitorInner {
    fn render(&self, tasks: &[Task]) {
        let settled = tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
                )
            })
            .count();
        self.overall.set_length(tasks.len() as u64);
        self.overall.set_position(settled as u64);

        let mut bars = lock(&self.task_bars);
        for task in tasks {
            match task.status {
                TaskStatus::Running => {
                    let bar = bars
                        .entry(task.id.clone())
                        .or_insert_with(|| self.task_bar(task));
                    bar.set_position(task.progress as u64);
                }
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled => {
                    if let Some(bar) = bars.remove(&task.id) {
                        let icon = match task.status {
                            TaskStatus::Completed => "✅",
                            TaskStatus::Canceled => "⏹",
                            _ => "❌",
                        };
                        let detail = task.error.as_deref().unwrap_or("");
                        bar.finish_with_message(format!(
                            "{} {} {}",
                            icon, task.display.display_name, detail
                        ));
                    }
                }
                TaskStatus::Pending | TaskStatus::Paused => {}
            }
        }

        // Tasks removed from the manager.
        bars.retain(|id, bar| {
            let keep = tasks.iter().any(|t| &t.id == id);
            if !keep {
                bar.finish_and_clear();
            }
            keep
        });
    }

    fn task_bar(&self, task: &Task) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:30.green/white} {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(format!(
            "{} {}",
            task.display.action_label,
            truncate_middle(&task.display.display_name, 32)
        ));
        bar
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.detach();
        // Ensure all bars are cleaned up
        for (_, bar) in lock(&self.inner.task_bars).drain() {
            bar.finish_and_clear();
        }
    }
}
