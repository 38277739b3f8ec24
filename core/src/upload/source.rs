use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::TransferError;

/// Where an upload's bytes come from.
///
/// Cloning is cheap: in-memory bodies are reference counted and files are
/// re-opened for every read.
#[derive(Clone)]
pub enum UploadSource {
    Memory(Bytes),
    File { path: PathBuf, size: u64 },
}

impl UploadSource {
    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        Self::Memory(body.into())
    }

    /// Stat `path` and capture its size. Directories are rejected.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(TransferError::InvalidInput(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self::File {
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(b) => b.len() as u64,
            Self::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn read_all(&self) -> Result<Bytes, TransferError> {
        self.read_range(0, self.len()).await
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, TransferError> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                TransferError::InvalidInput(format!(
                    "range {}+{} exceeds source length {}",
                    offset,
                    len,
                    self.len()
                ))
            })?;

        match self {
            Self::Memory(b) => Ok(b.slice(offset as usize..end as usize)),
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(b) => f.debug_tuple("Memory").field(&b.len()).finish(),
            Self::File { path, size } => f
                .debug_struct("File")
                .field("path", path)
                .field("size", size)
                .finish(),
        }
    }
}
