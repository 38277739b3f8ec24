//! Upload tasks: byte sources, task construction and the transfer handler.
//!
//! Files smaller than the configured chunk size go up in one `put_object`
//! call; everything else is split into `ceil(size / chunk)` parts that are
//! sent sequentially and then committed.

mod factory;
mod handler;
mod source;

pub use factory::{filter_active_uploads, UploadFile, UploadTaskFactory};
pub use handler::UploadHandler;
pub use source::UploadSource;
