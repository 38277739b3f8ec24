//! Task data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::upload::UploadSource;

/// Kind of work a task performs. Selects the handler that executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Upload,
    Delete,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a free slot
    Pending,
    /// Handler in flight
    Running,
    /// Handler resolved
    Completed,
    /// Handler rejected (possibly waiting for a retry)
    Failed,
    /// Reserved; no transition reaches it
    Paused,
    /// Canceled by the operator
    Canceled,
}

impl TaskStatus {
    /// Statuses that still block a new upload for the same target.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Running | Self::Failed | Self::Paused
        )
    }
}

/// How an upload is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum UploadStrategy {
    /// One `put_object` call.
    Single,
    /// Initiate, `total_parts` sequential parts of `chunk_size` bytes, complete.
    Multipart { chunk_size: u64, total_parts: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadPayload {
    pub bucket: String,
    /// Full destination key, prefix included.
    pub key: String,
    #[serde(skip)]
    pub source: UploadSource,
    pub size: u64,
    pub strategy: UploadStrategy,
}

impl UploadPayload {
    /// Deduplication key for active uploads: `bucket/key`.
    pub fn target(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletePayload {
    pub bucket: String,
    /// Full object key, prefix included.
    pub key: String,
    pub version_id: Option<String>,
    pub prefix: Option<String>,
    /// Ask the backend to bypass retention/lock protections.
    pub force_delete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskPayload {
    Upload(UploadPayload),
    Delete(DeletePayload),
}

/// Presentation data computed once by the task factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskDisplay {
    pub display_name: String,
    pub sub_info: String,
    pub action_label: String,
}

/// One unit of orchestrated work.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    pub error: Option<String>,
    pub retry_count: u32,
    pub payload: TaskPayload,
    pub display: TaskDisplay,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(payload: TaskPayload, display: TaskDisplay) -> Self {
        let kind = match &payload {
            TaskPayload::Upload(_) => TaskKind::Upload,
            TaskPayload::Delete(_) => TaskKind::Delete,
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            retry_count: 0,
            payload,
            display,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn upload(&self) -> Option<&UploadPayload> {
        match &self.payload {
            TaskPayload::Upload(p) => Some(p),
            TaskPayload::Delete(_) => None,
        }
    }

    pub fn delete(&self) -> Option<&DeletePayload> {
        match &self.payload {
            TaskPayload::Delete(p) => Some(p),
            TaskPayload::Upload(_) => None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Per-status counters over a snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    pub canceled: usize,
}

impl TaskStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Paused => stats.paused += 1,
                TaskStatus::Canceled => stats.canceled += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.paused + self.canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_task(key: &str) -> Task {
        Task::new(
            TaskPayload::Delete(DeletePayload {
                bucket: "b".into(),
                key: key.into(),
                version_id: None,
                prefix: None,
                force_delete: false,
            }),
            TaskDisplay::default(),
        )
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = delete_task("a.txt");
        assert_eq!(task.kind, TaskKind::Delete);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.error.is_none());
        assert!(task.delete().is_some());
        assert!(task.upload().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(delete_task("a").id, delete_task("a").id);
    }

    #[test]
    fn test_active_statuses() {
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Failed.is_active());
        assert!(TaskStatus::Paused.is_active());
        assert!(!TaskStatus::Completed.is_active());
        assert!(!TaskStatus::Canceled.is_active());
    }

    #[test]
    fn test_stats() {
        let mut done = delete_task("x");
        done.status = TaskStatus::Completed;
        let tasks = vec![delete_task("a"), delete_task("b"), done];
        let stats = TaskStats::from_tasks(&tasks);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 3);
    }
}
