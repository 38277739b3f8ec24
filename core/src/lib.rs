//! Task orchestration for bulk object uploads and deletes.
//!
//! Consumers should import from [`api`].

pub mod api;
pub mod config;
pub mod delete;
pub mod error;
pub mod executor;
pub mod state;
pub mod transport;
pub mod upload;
pub mod util;
