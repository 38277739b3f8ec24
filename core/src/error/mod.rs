#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;
pub mod transfer;

pub use error::CliError;
pub use executor::ManagerError;
pub use transfer::TransferError;
