use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};

use objtask_core::api::{
    filter_active_uploads, key_from_path, CliError, TaskManager, UploadConfig, UploadFile,
    UploadSource, UploadTaskFactory,
};

use super::cli::UploadArgs;
use super::run;

/// Stat at most this many files at once while building sources.
const STAT_CONCURRENCY: usize = 16;

/// A file to upload and the directory its key is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub base: PathBuf,
    pub path: PathBuf,
}

impl PlannedFile {
    pub fn key(&self) -> String {
        key_from_path(&self.base, &self.path)
    }
}

pub async fn handle_upload(
    args: UploadArgs,
    upload_cfg: &UploadConfig,
    manager: &TaskManager,
    dry_run: bool,
    quiet: bool,
) -> Result<i32, CliError> {
    let planned = expand_inputs(&args.paths)?;
    tracing::debug!("{} file(s) matched", planned.len());

    let files: Vec<UploadFile> = stream::iter(planned)
        .map(|p| async move {
            let key = p.key();
            UploadSource::from_path(&p.path)
                .await
                .map(|src| UploadFile::new(src, key))
        })
        .buffered(STAT_CONCURRENCY)
        .try_collect()
        .await?;

    let files = filter_active_uploads(
        &manager.get_tasks(),
        &args.bucket,
        args.prefix.as_deref(),
        files,
    );
    let tasks = UploadTaskFactory::from_config(upload_cfg).create_tasks(
        &args.bucket,
        args.prefix.as_deref(),
        files,
    )?;

    if dry_run {
        run::print_plan(&tasks);
        return Ok(0);
    }
    run::run_tasks(manager, tasks, quiet).await
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expand files, directories and glob patterns into regular files.
///
/// A plain file is keyed by its name; a directory keeps its own name as the
/// first key segment.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<PlannedFile>, CliError> {
    let mut out = Vec::new();
    for input in inputs {
        if is_glob(input) {
            let matches = glob::glob(input)
                .map_err(|e| CliError::Command(format!("bad pattern '{}': {}", input, e)))?;
            let mut any = false;
            for entry in matches {
                let path = entry.map_err(|e| CliError::Io(e.into_error()))?;
                any = true;
                push_path(&path, &mut out)?;
            }
            if !any {
                tracing::warn!("pattern '{}' matched nothing", input);
            }
        } else {
            let path = Path::new(input);
            if !path.exists() {
                return Err(CliError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", input),
                )));
            }
            push_path(path, &mut out)?;
        }
    }
    Ok(out)
}

fn push_path(path: &Path, out: &mut Vec<PlannedFile>) -> Result<(), CliError> {
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    if path.is_file() {
        out.push(PlannedFile {
            base,
            path: path.to_path_buf(),
        });
        return Ok(());
    }
    if !path.is_dir() {
        return Ok(());
    }

    let pattern = format!(
        "{}/**/*",
        glob::Pattern::escape(&path.to_string_lossy())
    );
    let walker = glob::glob(&pattern)
        .map_err(|e| CliError::Command(format!("cannot walk {}: {}", path.display(), e)))?;

    let mut found: Vec<PathBuf> = Vec::new();
    for entry in walker {
        let file = entry.map_err(|e| CliError::Io(e.into_error()))?;
        if file.is_file() {
            found.push(file);
        }
    }
    found.sort();
    out.extend(found.into_iter().map(|file| PlannedFile {
        base: base.clone(),
        path: file,
    }));
    Ok(())
}
