//! Task orchestration engine
//!
//! This module owns the scheduler that drives uploads and deletes against a
//! storage backend. It supports:
//! - Bounded concurrency with FIFO admission across task kinds
//! - Fixed-delay retries
//! - Cooperative cancellation through one token per running task
//! - Push notifications to subscribers after every change
//!
//! # Architecture
//!
//! ```text
//! UploadTaskFactory / DeleteTaskFactory
//!   ↓ Vec<Task>
//! TaskManager::enqueue()
//!   ↓ admission pass (max_concurrent slots)
//! TaskHandler::execute(task, TaskContext)   one spawned future per task
//!   ↓ Ok / Err / aborted
//! TaskManager::settle() → retry? → admission pass
//!   ↓
//! Subscription callbacks (&[Task] snapshot)
//! ```

mod handler;
mod manager;
mod progress;
mod subscription;

pub use handler::{handler_fn, TaskContext, TaskHandler};
pub use manager::{HandlerMap, TaskManager, TaskManagerBuilder};
pub use progress::ProgressMonitor;
pub use subscription::Subscription;
