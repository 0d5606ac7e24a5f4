//! Error types for the log stream engine.

use thiserror::Error;

/// Result type for log stream operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in log stream operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Log storage error.
    #[error("storage error: {0}")]
    Storage(#[from] logstream_storage::StorageError),

    /// A frame on storage or in the write buffer is corrupted.
    #[error("frame corruption: {message}")]
    FrameCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A block index snapshot is corrupted or has an unsupported format.
    #[error("snapshot corruption: {message}")]
    SnapshotCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Snapshot storage failed.
    #[error("snapshot storage error: {message}")]
    SnapshotStorage {
        /// Description of the failure.
        message: String,
    },

    /// A record is too large to be framed.
    #[error("record too large: {message}")]
    RecordTooLarge {
        /// Description of the violated limit.
        message: String,
    },

    /// Operation not permitted in the current stream state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The stream's worker was shut down before the request completed.
    #[error("stream shut down before the request completed")]
    Shutdown,
}

impl CoreError {
    /// Creates a frame corruption error.
    pub fn frame_corruption(message: impl Into<String>) -> Self {
        Self::FrameCorruption {
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            message: message.into(),
        }
    }

    /// Creates a snapshot storage error.
    pub fn snapshot_storage(message: impl Into<String>) -> Self {
        Self::SnapshotStorage {
            message: message.into(),
        }
    }

    /// Creates a record-too-large error.
    pub fn record_too_large(message: impl Into<String>) -> Self {
        Self::RecordTooLarge {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
