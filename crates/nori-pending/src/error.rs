use crate::entry::EncodingError;
use thiserror::Error;

/// Errors returned by [`PendingLog`](crate::PendingLog).
///
/// An `Io` error from `add` or `commit` means the durability of that record is
/// unknown: it may or may not have reached the file.
#[derive(Debug, Error)]
pub enum PendingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("Pending log is closed")]
    Closed,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PendingError {
    pub fn is_closed(&self) -> bool {
        matches!(self, PendingError::Closed)
    }
}
