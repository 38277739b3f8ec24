use std::sync::Arc;

use anyhow::{Context, Result};

use objtask_core::api::{
    AppConfig, DeleteHandler, ObjectTransport, TaskKind, TaskManager, TransportConfig,
    TransportKind, UploadHandler,
};

use crate::transport::{LocalFsTransport, MemoryTransport};

pub fn build_transport(cfg: &TransportConfig) -> Result<Arc<dyn ObjectTransport>> {
    match cfg.kind {
        TransportKind::Local => {
            let root = cfg
                .root
                .as_deref()
                .context("transport.root is required for the local transport")?;
            Ok(Arc::new(LocalFsTransport::new(root)?))
        }
        TransportKind::Memory => Ok(Arc::new(MemoryTransport::new())),
    }
}

/// Manager with upload and delete handlers sharing `transport`.
pub fn build_task_manager(cfg: &AppConfig, transport: Arc<dyn ObjectTransport>) -> TaskManager {
    tracing::debug!("wiring task manager to the {} transport", transport.name());
    TaskManager::builder(cfg.tasks.clone())
        .handler(
            TaskKind::Upload,
            Arc::new(UploadHandler::new(transport.clone())),
        )
        .handler(TaskKind::Delete, Arc::new(DeleteHandler::new(transport)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use objtask_core::api::{
        DeleteTaskFactory, TaskStatus, UploadFile, UploadSource, UploadTaskFactory,
    };
    use std::time::Duration;

    #[test]
    fn test_local_requires_root() {
        let cfg = TransportConfig {
            kind: TransportKind::Local,
            root: None,
        };
        assert!(build_transport(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_upload_then_delete_on_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig {
            transport: TransportConfig {
                kind: TransportKind::Local,
                root: Some(dir.path().to_string_lossy().to_string()),
            },
            ..Default::default()
        };
        cfg.tasks.retry_delay_ms = 5;

        let manager = build_task_manager(&cfg, build_transport(&cfg.transport).unwrap());
        let body = UploadSource::from_bytes(&b"0123456789"[..]);
        let uploads = UploadTaskFactory::new(4)
            .create_tasks("bucket", Some("in"), vec![UploadFile::new(body, "data.bin")])
            .unwrap();
        manager.enqueue(uploads);
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();

        let stored = dir.path().join("bucket").join("in").join("data.bin");
        assert_eq!(std::fs::read(&stored).unwrap(), b"0123456789");

        manager.enqueue(DeleteTaskFactory::objects(
            "bucket",
            Some("in"),
            &["data.bin".to_string()],
            false,
        ));
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();

        assert!(!stored.exists());
        assert!(manager
            .get_tasks()
            .iter()
            .all(|t| t.status == TaskStatus::Completed));
    }
}
