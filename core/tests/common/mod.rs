#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use objtask_core::api::{
    CompletedPart, DeleteHandler, DeleteOptions, ObjectTransport, Task, TaskKind, TaskManager,
    TaskManagerConfig, TransferError, UploadHandler,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Put { key: String, len: usize },
    Create { key: String },
    Part { key: String, part_number: u32, len: usize },
    Complete { key: String, parts: usize },
    Abort { key: String },
    Delete { key: String, version_id: Option<String>, force: bool },
}

/// Transport that records every call and can be told to stall or fail.
#[derive(Default)]
pub struct RecordingTransport {
    journal: Mutex<Vec<Call>>,
    delay: Duration,
    /// Remaining failures per key.
    failures: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn fail_times(&self, key: &str, times: u32) {
        self.failures.lock().unwrap().insert(key.to_string(), times);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.lock().unwrap().clone()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, key: &str, call: Call) -> Result<(), TransferError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(left) = self.failures.lock().unwrap().get_mut(key) {
            if *left > 0 {
                *left -= 1;
                return Err(TransferError::Network(format!("injected failure for {}", key)));
            }
        }
        self.journal.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ObjectTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: Bytes,
        _cancel: &CancellationToken,
    ) -> Result<String, TransferError> {
        self.enter(
            key,
            Call::Put {
                key: key.to_string(),
                len: body.len(),
            },
        )
        .await?;
        Ok(format!("etag-{}", key))
    }

    async fn create_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
    ) -> Result<String, TransferError> {
        self.enter(key, Call::Create { key: key.to_string() }).await?;
        Ok(format!("upload-{}", key))
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        _upload_id: &str,
        part_number: u32,
        chunk: Bytes,
        _cancel: &CancellationToken,
    ) -> Result<CompletedPart, TransferError> {
        self.enter(
            key,
            Call::Part {
                key: key.to_string(),
                part_number,
                len: chunk.len(),
            },
        )
        .await?;
        Ok(CompletedPart {
            part_number,
            etag: format!("etag-{}-{}", key, part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        _upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransferError> {
        self.journal.lock().unwrap().push(Call::Complete {
            key: key.to_string(),
            parts: parts.len(),
        });
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        _upload_id: &str,
    ) -> Result<(), TransferError> {
        self.journal.lock().unwrap().push(Call::Abort { key: key.to_string() });
        Ok(())
    }

    async fn delete_object(
        &self,
        _bucket: &str,
        key: &str,
        opts: DeleteOptions,
        _cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.enter(
            key,
            Call::Delete {
                key: key.to_string(),
                version_id: opts.version_id,
                force: opts.force_delete,
            },
        )
        .await
    }
}

/// Route `tracing` output through the test harness; honors `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(max_concurrent: usize, max_retries: u32) -> TaskManagerConfig {
    TaskManagerConfig {
        max_concurrent,
        max_retries,
        retry_delay_ms: 5,
    }
}

/// Manager with the upload and delete handlers wired to `transport`.
pub fn manager_with(cfg: TaskManagerConfig, transport: Arc<RecordingTransport>) -> TaskManager {
    init_logging();
    let transport: Arc<dyn ObjectTransport> = transport;
    TaskManager::builder(cfg)
        .handler(TaskKind::Upload, Arc::new(UploadHandler::new(transport.clone())))
        .handler(TaskKind::Delete, Arc::new(DeleteHandler::new(transport)))
        .build()
}

pub async fn wait_idle(manager: &TaskManager) {
    tokio::time::timeout(Duration::from_secs(10), manager.wait_idle())
        .await
        .expect("manager did not become idle");
}

/// Poll `cond` until it holds or a second has passed.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn ids(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.id.clone()).collect()
}
