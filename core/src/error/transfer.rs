use thiserror::Error;

/// Failure of a transport call or of a task handler.
///
/// The scheduler does not classify these: every variant except `Aborted`
/// goes through the same retry policy.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("operation aborted")]
    Aborted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("handler crashed: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}
