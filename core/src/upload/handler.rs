use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransferError;
use crate::executor::{TaskContext, TaskHandler};
use crate::state::{Task, UploadPayload, UploadStrategy};
use crate::transport::{abortable, CompletedPart, ObjectTransport};

/// Executes upload tasks against an [`ObjectTransport`].
pub struct UploadHandler {
    transport: Arc<dyn ObjectTransport>,
}

impl UploadHandler {
    pub fn new(transport: Arc<dyn ObjectTransport>) -> Self {
        Self { transport }
    }

    async fn put_single(&self, p: &UploadPayload, ctx: &TaskContext) -> Result<(), TransferError> {
        let cancel = ctx.cancel_token();
        let body = abortable(cancel, p.source.read_all()).await?;
        let etag = abortable(
            cancel,
            self.transport.put_object(&p.bucket, &p.key, body, cancel),
        )
        .await?;
        tracing::debug!(task_id = ctx.task_id(), etag = %etag, "object stored");
        ctx.set_progress(100);
        Ok(())
    }

    async fn put_multipart(
        &self,
        p: &UploadPayload,
        chunk_size: u64,
        total_parts: u32,
        ctx: &TaskContext,
    ) -> Result<(), TransferError> {
        let upload_id = abortable(
            ctx.cancel_token(),
            self.transport.create_multipart_upload(&p.bucket, &p.key),
        )
        .await?;
        tracing::debug!(
            task_id = ctx.task_id(),
            upload_id = %upload_id,
            total_parts,
            "multipart upload started"
        );

        let result = match self
            .upload_parts(p, &upload_id, chunk_size, total_parts, ctx)
            .await
        {
            Ok(parts) => {
                self.transport
                    .complete_multipart_upload(&p.bucket, &p.key, &upload_id, &parts)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            // Best effort: a failed abort leaves staged parts for the backend to expire.
            if let Err(abort_err) = self
                .transport
                .abort_multipart_upload(&p.bucket, &p.key, &upload_id)
                .await
            {
                tracing::warn!(
                    task_id = ctx.task_id(),
                    upload_id = %upload_id,
                    "abort after '{}' failed: {}",
                    e,
                    abort_err
                );
            }
            return result;
        }

        ctx.set_progress(100);
        Ok(())
    }

    async fn upload_parts(
        &self,
        p: &UploadPayload,
        upload_id: &str,
        chunk_size: u64,
        total_parts: u32,
        ctx: &TaskContext,
    ) -> Result<Vec<CompletedPart>, TransferError> {
        let cancel = ctx.cancel_token();
        let size = p.source.len();
        let mut parts = Vec::with_capacity(total_parts as usize);

        for index in 0..total_parts {
            let offset = u64::from(index) * chunk_size;
            let len = chunk_size.min(size.saturating_sub(offset));
            let chunk = abortable(cancel, p.source.read_range(offset, len)).await?;

            let part_number = index + 1;
            let part = abortable(
                cancel,
                self.transport
                    .upload_part(&p.bucket, &p.key, upload_id, part_number, chunk, cancel),
            )
            .await?;
            parts.push(part);

            let percent = u64::from(part_number) * 100 / u64::from(total_parts);
            ctx.set_progress(percent as u8);
        }

        Ok(parts)
    }
}

#[async_trait]
impl TaskHandler for UploadHandler {
    fn name(&self) -> &str {
        "upload"
    }

    async fn execute(&self, task: Task, ctx: TaskContext) -> Result<(), TransferError> {
        let payload = task.upload().ok_or_else(|| {
            TransferError::InvalidInput(format!("task {} is not an upload", task.id))
        })?;

        match payload.strategy {
            UploadStrategy::Single => self.put_single(payload, &ctx).await,
            UploadStrategy::Multipart {
                chunk_size,
                total_parts,
            } => {
                self.put_multipart(payload, chunk_size, total_parts, &ctx)
                    .await
            }
        }
    }
}
