use thiserror::Error;

use super::{ManagerError, TransferError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("task manager error: {0}")]
    Manager(#[from] ManagerError),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
