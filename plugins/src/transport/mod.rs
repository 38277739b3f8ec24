mod local;
mod memory;

pub use local::LocalFsTransport;
pub use memory::{MemoryTransport, ObjectInfo, TransportCall};
