//! In-memory transport with object versions and retention locks.
//!
//! Every call is appended to a journal so callers can inspect exactly what
//! reached the backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use objtask_core::api::{CompletedPart, DeleteOptions, ObjectTransport, TransferError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One request as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Put { bucket: String, key: String, size: usize },
    CreateMultipart { bucket: String, key: String },
    UploadPart { upload_id: String, part_number: u32, size: usize },
    CompleteMultipart { upload_id: String, parts: usize },
    AbortMultipart { upload_id: String },
    Delete { bucket: String, key: String, version_id: Option<String>, force: bool },
}

/// Metadata of the latest version of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub etag: String,
    pub version_id: String,
    pub stored_at: DateTime<Utc>,
}

struct ObjectVersion {
    version_id: String,
    etag: String,
    body: Bytes,
    stored_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoredObject {
    /// Oldest first.
    versions: Vec<ObjectVersion>,
    retention_locked: bool,
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct Store {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

impl Store {
    fn store(&mut self, bucket: &str, key: &str, body: Bytes) -> (String, String) {
        let version = ObjectVersion {
            version_id: Uuid::new_v4().simple().to_string(),
            etag: format!("\"{}\"", Uuid::new_v4().simple()),
            body,
            stored_at: Utc::now(),
        };
        let ids = (version.version_id.clone(), version.etag.clone());
        self.objects
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .versions
            .push(version);
        ids
    }
}

#[derive(Default)]
pub struct MemoryTransport {
    store: Mutex<Store>,
    journal: Mutex<Vec<TransportCall>>,
    latency: Duration,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every data call by `latency`; cancellation cuts the wait short.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Seed an object version without going through the journal. Returns the version id.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) -> String {
        lock(&self.store).store(bucket, key, body.into()).0
    }

    /// Place or lift a retention lock. Returns false if the object does not exist.
    pub fn set_retention(&self, bucket: &str, key: &str, locked: bool) -> bool {
        match lock(&self.store)
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            Some(obj) => {
                obj.retention_locked = locked;
                true
            }
            None => false,
        }
    }

    /// Body of the latest version.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        lock(&self.store)
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|o| o.versions.last())
            .map(|v| v.body.clone())
    }

    pub fn head(&self, bucket: &str, key: &str) -> Option<ObjectInfo> {
        lock(&self.store)
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|o| o.versions.last())
            .map(|v| ObjectInfo {
                size: v.body.len() as u64,
                etag: v.etag.clone(),
                version_id: v.version_id.clone(),
                stored_at: v.stored_at,
            })
    }

    /// Version ids, oldest first.
    pub fn versions(&self, bucket: &str, key: &str) -> Vec<String> {
        lock(&self.store)
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.versions.iter().map(|v| v.version_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_uploads(&self) -> usize {
        lock(&self.store).uploads.len()
    }

    pub fn journal(&self) -> Vec<TransportCall> {
        lock(&self.journal).clone()
    }

    fn record(&self, call: TransportCall) {
        lock(&self.journal).push(call);
    }

    async fn simulate_latency(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), TransferError> {
        if self.latency.is_zero() {
            return Ok(());
        }
        match cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => Err(TransferError::Aborted),
                _ = tokio::time::sleep(self.latency) => Ok(()),
            },
            None => {
                tokio::time::sleep(self.latency).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ObjectTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<String, TransferError> {
        self.simulate_latency(Some(cancel)).await?;
        self.record(TransportCall::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: body.len(),
        });
        Ok(lock(&self.store).store(bucket, key, body).1)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, TransferError> {
        self.simulate_latency(None).await?;
        self.record(TransportCall::CreateMultipart {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let upload_id = Uuid::new_v4().to_string();
        lock(&self.store).uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        chunk: Bytes,
        cancel: &CancellationToken,
    ) -> Result<CompletedPart, TransferError> {
        self.simulate_latency(Some(cancel)).await?;
        self.record(TransportCall::UploadPart {
            upload_id: upload_id.to_string(),
            part_number,
            size: chunk.len(),
        });
        let mut store = lock(&self.store);
        let upload = store
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| TransferError::Rejected(format!("no such upload {}", upload_id)))?;
        upload.parts.insert(part_number, chunk);
        Ok(CompletedPart {
            part_number,
            etag: format!("\"{}-{}\"", upload_id, part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransferError> {
        self.simulate_latency(None).await?;
        self.record(TransportCall::CompleteMultipart {
            upload_id: upload_id.to_string(),
            parts: parts.len(),
        });
        let mut store = lock(&self.store);
        let upload = store
            .uploads
            .remove(upload_id)
            .ok_or_else(|| TransferError::Rejected(format!("no such upload {}", upload_id)))?;

        let mut body = BytesMut::new();
        for part in parts {
            let chunk = upload.parts.get(&part.part_number).ok_or_else(|| {
                TransferError::Rejected(format!("part {} was never uploaded", part.part_number))
            })?;
            body.extend_from_slice(chunk);
        }
        store.store(&upload.bucket, &upload.key, body.freeze());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), TransferError> {
        self.record(TransportCall::AbortMultipart {
            upload_id: upload_id.to_string(),
        });
        lock(&self.store).uploads.remove(upload_id);
        Ok(())
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        opts: DeleteOptions,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.simulate_latency(Some(cancel)).await?;
        self.record(TransportCall::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: opts.version_id.clone(),
            force: opts.force_delete,
        });

        let mut store = lock(&self.store);
        let id = (bucket.to_string(), key.to_string());
        let obj = store
            .objects
            .get_mut(&id)
            .ok_or_else(|| TransferError::not_found(bucket, key))?;

        if obj.retention_locked && !opts.force_delete {
            return Err(TransferError::Rejected(format!(
                "{}/{} is under retention",
                bucket, key
            )));
        }

        match opts.version_id {
            Some(version) => {
                let before = obj.versions.len();
                obj.versions.retain(|v| v.version_id != version);
                if obj.versions.len() == before {
                    return Err(TransferError::not_found(
                        bucket,
                        &format!("{}?versionId={}", key, version),
                    ));
                }
                if obj.versions.is_empty() {
                    store.objects.remove(&id);
                }
            }
            None => {
                store.objects.remove(&id);
            }
        }
        Ok(())
    }
}
