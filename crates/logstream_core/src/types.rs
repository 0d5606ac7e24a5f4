//! Core type aliases and shared handles.

use logstream_storage::LogStorage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Log storage shared between the appender (writes) and the indexer (reads).
///
/// Each state machine owns a private cursor and read buffer; the lock only
/// serializes the storage calls themselves.
pub type SharedLogStorage = Arc<parking_lot::Mutex<Box<dyn LogStorage>>>;

/// Global, monotonically increasing record position within a stream.
pub type Position = u64;

/// Byte address of a block in log storage.
pub type BlockAddress = u64;

/// Sentinel for a record without a causal back-reference.
pub const NO_SOURCE_RECORD_POSITION: i64 = -1;

/// Sentinel stream id for a record without a causal back-reference.
pub const NO_SOURCE_STREAM_ID: u32 = 0;

/// Shared handle to the stream's commit position.
///
/// The commit position is advanced by an external replication collaborator
/// and read by the indexer, which never indexes records above it. The handle
/// is cheap to clone; all clones observe the same marker.
#[derive(Debug, Clone, Default)]
pub struct CommitPositionHandle {
    inner: Arc<AtomicU64>,
}

impl CommitPositionHandle {
    /// Creates a handle starting at the given position.
    #[must_use]
    pub fn new(position: Position) -> Self {
        Self {
            inner: Arc::new(AtomicU64::new(position)),
        }
    }

    /// Returns the current commit position.
    #[must_use]
    pub fn get(&self) -> Position {
        self.inner.load(Ordering::Acquire)
    }

    /// Advances the commit position to `position`.
    ///
    /// The marker is monotonic: calls with a smaller position are ignored.
    pub fn advance_to(&self, position: Position) {
        self.inner.fetch_max(position, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_position_starts_at_initial_value() {
        let commit = CommitPositionHandle::new(7);
        assert_eq!(commit.get(), 7);
    }

    #[test]
    fn commit_position_is_monotonic() {
        let commit = CommitPositionHandle::new(10);
        commit.advance_to(5);
        assert_eq!(commit.get(), 10);
        commit.advance_to(42);
        assert_eq!(commit.get(), 42);
    }

    #[test]
    fn clones_share_the_marker() {
        let commit = CommitPositionHandle::default();
        let clone = commit.clone();
        commit.advance_to(3);
        assert_eq!(clone.get(), 3);
    }
}
