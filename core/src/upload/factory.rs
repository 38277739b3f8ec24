use std::collections::HashSet;

use crate::config::UploadConfig;
use crate::error::TransferError;
use crate::state::{Task, TaskDisplay, TaskPayload, UploadPayload, UploadStrategy};
use crate::util::{human_size, join_key, object_name};

use super::source::UploadSource;

/// One file to upload and its key relative to the destination prefix.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub source: UploadSource,
    pub relative_key: String,
}

impl UploadFile {
    pub fn new(source: UploadSource, relative_key: impl Into<String>) -> Self {
        Self {
            source,
            relative_key: relative_key.into(),
        }
    }
}

/// Builds upload tasks and decides single vs. multipart per file.
#[derive(Debug, Clone, Copy)]
pub struct UploadTaskFactory {
    chunk_size: u64,
}

impl UploadTaskFactory {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(cfg: &UploadConfig) -> Self {
        Self::new(cfg.chunk_size_bytes())
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Part numbers are `u32`; a file needing more parts than that is rejected.
    pub fn strategy_for(&self, size: u64) -> Result<UploadStrategy, TransferError> {
        if size < self.chunk_size {
            return Ok(UploadStrategy::Single);
        }
        let parts = size.div_ceil(self.chunk_size);
        let total_parts = u32::try_from(parts).map_err(|_| {
            TransferError::InvalidInput(format!(
                "{} bytes would need {} parts of {} bytes, at most {} are allowed",
                size,
                parts,
                self.chunk_size,
                u32::MAX
            ))
        })?;
        Ok(UploadStrategy::Multipart {
            chunk_size: self.chunk_size,
            total_parts,
        })
    }

    /// Build one task per file, or fail on the first file that cannot be
    /// split into parts.
    pub fn create_tasks(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        files: Vec<UploadFile>,
    ) -> Result<Vec<Task>, TransferError> {
        files
            .into_iter()
            .map(|file| self.create_task(bucket, prefix, file))
            .collect()
    }

    fn create_task(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        file: UploadFile,
    ) -> Result<Task, TransferError> {
        let key = join_key(prefix, &file.relative_key);
        let size = file.source.len();
        let strategy = self.strategy_for(size).map_err(|e| match e {
            TransferError::InvalidInput(msg) => {
                TransferError::InvalidInput(format!("{}/{}: {}", bucket, key, msg))
            }
            other => other,
        })?;

        let mut sub_info = format!("{} → {}/{}", human_size(size), bucket, key);
        if let UploadStrategy::Multipart { total_parts, .. } = strategy {
            sub_info.push_str(&format!(" · {} parts", total_parts));
        }
        let display = TaskDisplay {
            display_name: object_name(&key).to_string(),
            sub_info,
            action_label: "Upload".to_string(),
        };

        Ok(Task::new(
            TaskPayload::Upload(UploadPayload {
                bucket: bucket.to_string(),
                key,
                source: file.source,
                size,
                strategy,
            }),
            display,
        ))
    }
}

/// Drop files whose `bucket/key` target already has an active upload in
/// `snapshot`, and repeated targets within `files` itself.
pub fn filter_active_uploads(
    snapshot: &[Task],
    bucket: &str,
    prefix: Option<&str>,
    files: Vec<UploadFile>,
) -> Vec<UploadFile> {
    let mut busy: HashSet<String> = snapshot
        .iter()
        .filter(|t| t.status.is_active())
        .filter_map(|t| t.upload().map(|p| p.target()))
        .collect();

    files
        .into_iter()
        .filter(|file| {
            let target = format!("{}/{}", bucket, join_key(prefix, &file.relative_key));
            let fresh = busy.insert(target.clone());
            if !fresh {
                tracing::debug!("skipping {}: upload already active", target);
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskStatus;
    use pretty_assertions::assert_eq;

    const MIB: u64 = 1024 * 1024;

    fn file(key: &str, size: usize) -> UploadFile {
        UploadFile::new(UploadSource::from_bytes(vec![0u8; size]), key)
    }

    #[test]
    fn test_strategy_selection() {
        let factory = UploadTaskFactory::new(16 * MIB);
        assert_eq!(factory.strategy_for(0).unwrap(), UploadStrategy::Single);
        assert_eq!(
            factory.strategy_for(16 * MIB - 1).unwrap(),
            UploadStrategy::Single
        );
        assert_eq!(
            factory.strategy_for(16 * MIB).unwrap(),
            UploadStrategy::Multipart {
                chunk_size: 16 * MIB,
                total_parts: 1
            }
        );
        assert_eq!(
            factory.strategy_for(50 * MIB).unwrap(),
            UploadStrategy::Multipart {
                chunk_size: 16 * MIB,
                total_parts: 4
            }
        );
    }

    #[test]
    fn test_create_tasks_display() {
        let factory = UploadTaskFactory::new(4);
        let tasks = factory.create_tasks(
            "media",
            Some("/photos/"),
            vec![file("a.jpg", 2), file("raw/b.dng", 10)],
        )
        .unwrap();

        assert_eq!(tasks.len(), 2);
        let first = tasks[0].upload().unwrap();
        assert_eq!(first.key, "photos/a.jpg");
        assert_eq!(first.strategy, UploadStrategy::Single);
        assert_eq!(tasks[0].display.display_name, "a.jpg");
        assert_eq!(tasks[0].display.sub_info, "2 B → media/photos/a.jpg");
        assert_eq!(tasks[0].display.action_label, "Upload");

        let second = tasks[1].upload().unwrap();
        assert_eq!(second.key, "photos/raw/b.dng");
        assert_eq!(
            second.strategy,
            UploadStrategy::Multipart {
                chunk_size: 4,
                total_parts: 3
            }
        );
        assert!(tasks[1].display.sub_info.ends_with("· 3 parts"));
    }

    #[test]
    fn test_filter_active_uploads() {
        let factory = UploadTaskFactory::new(MIB);
        let mut existing = factory
            .create_tasks("b", None, vec![file("busy.txt", 1), file("done.txt", 1)])
            .unwrap();
        existing[1].status = TaskStatus::Completed;

        let kept = filter_active_uploads(
            &existing,
            "b",
            None,
            vec![
                file("busy.txt", 1),
                file("done.txt", 1),
                file("new.txt", 1),
                file("new.txt", 1),
            ],
        );
        let keys: Vec<_> = kept.iter().map(|f| f.relative_key.as_str()).collect();
        assert_eq!(keys, vec!["done.txt", "new.txt"]);

        // same key in another bucket is a different target
        let other = filter_active_uploads(&existing, "c", None, vec![file("busy.txt", 1)]);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_rejects_file_with_too_many_parts() {
        let factory = UploadTaskFactory::new(1);
        let limit = u64::from(u32::MAX);
        assert_eq!(
            factory.strategy_for(limit).unwrap(),
            UploadStrategy::Multipart {
                chunk_size: 1,
                total_parts: u32::MAX
            }
        );
        assert!(matches!(
            factory.strategy_for(limit + 1),
            Err(TransferError::InvalidInput(_))
        ));

        let huge = UploadFile::new(
            UploadSource::File {
                path: "huge.bin".into(),
                size: limit + 1,
            },
            "huge.bin",
        );
        let err = factory
            .create_tasks("b", None, vec![file("ok.txt", 0), huge])
            .unwrap_err();
        assert!(err.to_string().contains("b/huge.bin"), "{err}");
    }
}
