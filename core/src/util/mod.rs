pub mod display;
pub mod keys;

pub use display::{human_size, truncate_middle};
pub use keys::{join_key, key_from_path, normalize_key, normalize_prefix, object_name};
