//! Filesystem-backed transport.
//!
//! Objects live at `<root>/<bucket>/<key>`. Multipart uploads stage their
//! parts under `<root>/.multipart/<upload_id>/` and are concatenated on
//! completion. There is no versioning: the only accepted version id is
//! `null`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use objtask_core::api::{CompletedPart, DeleteOptions, ObjectTransport, TransferError};

const STAGING_DIR: &str = ".multipart";

pub struct LocalFsTransport {
    root: PathBuf,
}

impl LocalFsTransport {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root {}", root.display()))?;
        tracing::debug!("local transport rooted at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `bucket/key` below the root, rejecting anything that would
    /// escape it.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, TransferError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == STAGING_DIR {
            return Err(TransferError::InvalidInput(format!(
                "invalid bucket name '{}'",
                bucket
            )));
        }
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(TransferError::InvalidInput(format!(
                "invalid object key '{}'",
                key
            )));
        }
        Ok(self.root.join(bucket).join(rel))
    }

    fn staging_path(&self, upload_id: &str) -> Result<PathBuf, TransferError> {
        Uuid::parse_str(upload_id).map_err(|_| {
            TransferError::InvalidInput(format!("unknown upload id '{}'", upload_id))
        })?;
        Ok(self.root.join(STAGING_DIR).join(upload_id))
    }

    async fn write_file(path: &Path, body: &[u8]) -> Result<(), TransferError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so readers never see a torn object.
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn concat_parts(
        dir: &Path,
        parts: &[CompletedPart],
        out_path: &Path,
    ) -> Result<(), TransferError> {
        let mut out = tokio::fs::File::create(out_path).await?;
        for part in parts {
            let chunk = tokio::fs::read(dir.join(part_file(part.part_number)))
                .await
                .map_err(|e| {
                    if e.kind() == ErrorKind::NotFound {
                        TransferError::Rejected(format!(
                            "part {} was never uploaded",
                            part.part_number
                        ))
                    } else {
                        e.into()
                    }
                })?;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

fn part_file(part_number: u32) -> String {
    format!("part-{:05}", part_number)
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        Err(TransferError::Aborted)
    } else {
        Ok(())
    }
}

/// Quoted hex of the first 16 bytes of the BLAKE3 digest.
fn etag_for(body: &[u8]) -> String {
    let hash = blake3::hash(body);
    format!("\"{}\"", hex::encode(&hash.as_bytes()[..16]))
}

#[async_trait]
impl ObjectTransport for LocalFsTransport {
    fn name(&self) -> &str {
        "local"
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<String, TransferError> {
        let path = self.object_path(bucket, key)?;
        ensure_live(cancel)?;
        Self::write_file(&path, &body).await?;
        Ok(etag_for(&body))
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, TransferError> {
        self.object_path(bucket, key)?;
        let upload_id = Uuid::new_v4().to_string();
        tokio::fs::create_dir_all(self.staging_path(&upload_id)?).await?;
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
        let dir = self.staging_path(upload_id)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(TransferError::Rejected(format!("no such upload {}", upload_id)));
        }
        ensure_live(cancel)?;
        let part = dir.join(part_file(part_number));
        Self::write_file(&part, &chunk).await?;
        Ok(CompletedPart {
            part_number,
            etag: etag_for(&chunk),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransferError> {
        let dir = self.staging_path(upload_id)?;
        let path = self.object_path(bucket, key)?;
        if parts.is_empty() {
            return Err(TransferError::InvalidInput("no parts to complete".into()));
        }
        if let Some((i, part)) = parts
            .iter()
            .enumerate()
            .find(|(i, p)| p.part_number as usize != i + 1)
        {
            return Err(TransferError::InvalidInput(format!(
                "part {} listed at position {}",
                part.part_number,
                i + 1
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        if let Err(e) = Self::concat_parts(&dir, parts, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), TransferError> {
        match tokio::fs::remove_dir_all(self.staging_path(upload_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        opts: DeleteOptions,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        if let Some(version) = opts.version_id.as_deref().filter(|v| *v != "null") {
            return Err(TransferError::Rejected(format!(
                "versioning is not supported, cannot delete version {}",
                version
            )));
        }
        if opts.force_delete {
            tracing::debug!("force flag has no effect on local storage: {}/{}", bucket, key);
        }
        let path = self.object_path(bucket, key)?;
        ensure_live(cancel)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TransferError::not_found(bucket, key)),
            Err(e) => Err(e.into()),
        }
    }
}
