//! # Task state
//!
//! The task entity, its status machine and per-status statistics.
//! Tasks carry no behavior; the executor owns all mutation.

pub mod transitions;
pub mod types;

pub use transitions::{TaskTransition, TransitionError};
pub use types::{
    DeletePayload, Task, TaskDisplay, TaskKind, TaskPayload, TaskStats, TaskStatus,
    UploadPayload, UploadStrategy,
};
