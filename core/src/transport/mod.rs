//! Storage backend contract consumed by the upload and delete handlers.
//!
//! The host application supplies the implementation. Every call is an
//! independent request/response exchange, so one transport instance is shared
//! by all in-flight handlers without extra locking.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// Completion token for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub version_id: Option<String>,
    /// Sent out-of-band (a bypass-governance header) so the backend skips
    /// retention and legal-hold checks.
    pub force_delete: bool,
}

#[async_trait]
pub trait ObjectTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Single-shot upload. Returns the object's ETag.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<String, TransferError>;

    /// Start a multipart upload. Returns the upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str)
        -> Result<String, TransferError>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        chunk: Bytes,
        cancel: &CancellationToken,
    ) -> Result<CompletedPart, TransferError>;

    /// `parts` is ordered by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransferError>;

    /// Discard the staged parts of an unfinished upload.
    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        opts: DeleteOptions,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError>;
}

/// Run `fut` unless `cancel` fires first, in which case the in-flight call is
/// dropped and `TransferError::Aborted` is returned.
pub async fn abortable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, TransferError>
where
    F: std::future::Future<Output = Result<T, TransferError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Aborted),
        res = fut => res,
    }
}
