mod load;
mod types;

pub use load::{get_objtask_data_dir, load_default, load_file};
pub use types::{
    AppConfig, LoggingConfig, TaskManagerConfig, TransportConfig, TransportKind, UploadConfig,
};
