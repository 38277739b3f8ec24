//! Delete tasks: plain and versioned object deletion.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransferError;
use crate::executor::{TaskContext, TaskHandler};
use crate::state::{DeletePayload, Task, TaskDisplay, TaskPayload};
use crate::transport::{abortable, DeleteOptions, ObjectTransport};
use crate::util::{join_key, normalize_prefix, object_name};

/// One object version to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedKey {
    pub key: String,
    pub version_id: String,
}

impl VersionedKey {
    pub fn new(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: version_id.into(),
        }
    }
}

/// Builds delete tasks. `force_delete` applies to every task of a call.
pub struct DeleteTaskFactory;

impl DeleteTaskFactory {
    /// One task per key; keys are relative to `prefix` when given.
    pub fn objects(
        bucket: &str,
        prefix: Option<&str>,
        keys: &[String],
        force_delete: bool,
    ) -> Vec<Task> {
        keys.iter()
            .map(|key| Self::build(bucket, prefix, key, None, force_delete))
            .collect()
    }

    /// One task per version.
    pub fn versions(
        bucket: &str,
        prefix: Option<&str>,
        items: &[VersionedKey],
        force_delete: bool,
    ) -> Vec<Task> {
        items
            .iter()
            .map(|item| {
                Self::build(
                    bucket,
                    prefix,
                    &item.key,
                    Some(item.version_id.clone()),
                    force_delete,
                )
            })
            .collect()
    }

    fn build(
        bucket: &str,
        prefix: Option<&str>,
        key: &str,
        version_id: Option<String>,
        force_delete: bool,
    ) -> Task {
        let full_key = join_key(prefix, key);

        let mut sub_info = format!("{}/{}", bucket, full_key);
        if let Some(v) = &version_id {
            sub_info.push_str(&format!(" @ {}", v));
        }
        if force_delete {
            sub_info.push_str(" (force)");
        }
        let action_label = if version_id.is_some() {
            "Delete version"
        } else {
            "Delete"
        };

        let display = TaskDisplay {
            display_name: object_name(&full_key).to_string(),
            sub_info,
            action_label: action_label.to_string(),
        };

        Task::new(
            TaskPayload::Delete(DeletePayload {
                bucket: bucket.to_string(),
                key: full_key,
                version_id,
                prefix: prefix.map(normalize_prefix).filter(|p| !p.is_empty()),
                force_delete,
            }),
            display,
        )
    }
}

/// Executes delete tasks: exactly one `delete_object` call per attempt.
pub struct DeleteHandler {
    transport: Arc<dyn ObjectTransport>,
}

impl DeleteHandler {
    pub fn new(transport: Arc<dyn ObjectTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TaskHandler for DeleteHandler {
    fn name(&self) -> &str {
        "delete"
    }

    async fn execute(&self, task: Task, ctx: TaskContext) -> Result<(), TransferError> {
        let p = task.delete().ok_or_else(|| {
            TransferError::InvalidInput(format!("task {} is not a delete", task.id))
        })?;

        let opts = DeleteOptions {
            version_id: p.version_id.clone(),
            force_delete: p.force_delete,
        };
        let cancel = ctx.cancel_token();
        abortable(
            cancel,
            self.transport.delete_object(&p.bucket, &p.key, opts, cancel),
        )
        .await?;

        tracing::debug!(
            task_id = ctx.task_id(),
            bucket = %p.bucket,
            key = %p.key,
            version = ?p.version_id,
            "object deleted"
        );
        ctx.set_progress(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CompletedPart;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Deletes {
        calls: Mutex<Vec<(String, DeleteOptions)>>,
    }

    #[async_trait]
    impl ObjectTransport for Deletes {
        fn name(&self) -> &str {
            "deletes"
        }

        async fn put_object(
            &self,
            _: &str,
            _: &str,
            _: Bytes,
            _: &CancellationToken,
        ) -> Result<String, TransferError> {
            unreachable!()
        }

        async fn create_multipart_upload(&self, _: &str, _: &str) -> Result<String, TransferError> {
            unreachable!()
        }

        async fn upload_part(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: u32,
            _: Bytes,
            _: &CancellationToken,
        ) -> Result<CompletedPart, TransferError> {
            unreachable!()
        }

        async fn complete_multipart_upload(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[CompletedPart],
        ) -> Result<(), TransferError> {
            unreachable!()
        }

        async fn delete_object(
            &self,
            bucket: &str,
            key: &str,
            opts: DeleteOptions,
            _: &CancellationToken,
        ) -> Result<(), TransferError> {
            if key.ends_with("missing") {
                return Err(TransferError::not_found(bucket, key));
            }
            self.calls.lock().unwrap().push((key.to_string(), opts));
            Ok(())
        }
    }

    #[test]
    fn test_objects_factory() {
        let tasks = DeleteTaskFactory::objects(
            "logs",
            Some("2024/"),
            &["jan.gz".to_string(), "feb.gz".to_string()],
            true,
        );
        assert_eq!(tasks.len(), 2);

        let p = tasks[0].delete().unwrap();
        assert_eq!(p.key, "2024/jan.gz");
        assert_eq!(p.prefix.as_deref(), Some("2024/"));
        assert!(p.force_delete);
        assert_eq!(tasks[0].display.display_name, "jan.gz");
        assert_eq!(tasks[0].display.sub_info, "logs/2024/jan.gz (force)");
        assert_eq!(tasks[0].display.action_label, "Delete");
        assert!(tasks.iter().all(|t| t.delete().unwrap().force_delete));
    }

    #[test]
    fn test_versions_factory() {
        let tasks =
            DeleteTaskFactory::versions("b", None, &[VersionedKey::new("a.txt", "v2")], false);
        let p = tasks[0].delete().unwrap();
        assert_eq!(p.version_id.as_deref(), Some("v2"));
        assert_eq!(p.prefix, None);
        assert_eq!(tasks[0].display.sub_info, "b/a.txt @ v2");
        assert_eq!(tasks[0].display.action_label, "Delete version");
    }

    #[tokio::test]
    async fn test_handler_passes_options() {
        let transport = Arc::new(Deletes::default());
        let handler = DeleteHandler::new(transport.clone());
        let task = DeleteTaskFactory::versions("b", None, &[VersionedKey::new("k", "v1")], true)
            .remove(0);

        handler.execute(task, TaskContext::detached("t")).await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "k".to_string(),
                DeleteOptions {
                    version_id: Some("v1".into()),
                    force_delete: true
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_handler_surfaces_not_found() {
        let handler = DeleteHandler::new(Arc::new(Deletes::default()));
        let task =
            DeleteTaskFactory::objects("b", None, &["gone/missing".to_string()], false).remove(0);
        let err = handler
            .execute(task, TaskContext::detached("t"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "object not found: b/gone/missing");
    }
}
