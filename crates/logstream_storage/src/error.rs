//! Error types for log storage operations.

use std::io;
use thiserror::Error;

/// Result type for log storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during log storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The supplied address does not point inside the log.
    #[error("invalid address {address}: log size is {size}")]
    InvalidAddress {
        /// The requested address.
        address: u64,
        /// The current log size.
        size: u64,
    },

    /// The storage is not open.
    #[error("storage is not open")]
    NotOpen,

    /// The storage is already open.
    #[error("storage is already open")]
    AlreadyOpen,
}
