//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `objtask_core::api` instead of reaching into internal modules.

pub use crate::config::{
    get_objtask_data_dir, load_default, load_file, AppConfig, LoggingConfig, TaskManagerConfig,
    TransportConfig, TransportKind, UploadConfig,
};
pub use crate::delete::{DeleteHandler, DeleteTaskFactory, VersionedKey};
pub use crate::error::{CliError, ManagerError, TransferError};
pub use crate::executor::{
    handler_fn, HandlerMap, ProgressMonitor, Subscription, TaskContext, TaskHandler, TaskManager,
    TaskManagerBuilder,
};
pub use crate::state::{
    DeletePayload, Task, TaskDisplay, TaskKind, TaskPayload, TaskStats, TaskStatus,
    TaskTransition, UploadPayload, UploadStrategy,
};
pub use crate::transport::{abortable, CompletedPart, DeleteOptions, ObjectTransport};
pub use crate::upload::{
    filter_active_uploads, UploadFile, UploadHandler, UploadSource, UploadTaskFactory,
};
pub use crate::util::{human_size, join_key, key_from_path, normalize_prefix, object_name};
