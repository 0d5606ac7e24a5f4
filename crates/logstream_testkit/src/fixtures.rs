//! Test fixtures and stream helpers.
//!
//! Provides convenience functions for setting up test streams and waiting
//! for their asynchronous state machines to settle.

use logstream_core::{
    FailureListener, FileSnapshotStore, InMemorySnapshotStore, LogStream, LogStreamConfig,
    LoggedRecord, Position,
};
use logstream_storage::{FileLogStorage, LogStorage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Installs a tracing subscriber honoring `RUST_LOG`, once per process.
///
/// Call at the top of a test to see the worker thread's trace output.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Byte length of one frame produced by [`test_record`].
#[must_use]
pub fn test_frame_len() -> usize {
    test_record(1)
        .encode()
        .expect("test record encodes")
        .len()
}

/// Builds a small record with a deterministic payload.
#[must_use]
pub fn test_record(position: Position) -> LoggedRecord {
    LoggedRecord::new(1, 1, position).with_value(vec![0xAB; 24])
}

/// Stream configuration where `frames_per_block` test records fill one
/// indexed block and every block is snapshotted.
#[must_use]
pub fn test_config(frames_per_block: usize) -> LogStreamConfig {
    LogStreamConfig::new()
        .index_block_size(test_frame_len() * frames_per_block)
        .deviation(0.0)
        .snapshot_interval(1)
}

/// A test stream with automatic cleanup.
pub struct TestStream {
    /// The stream under test.
    pub stream: LogStream,
    /// The snapshot store, when in-memory.
    pub snapshots: Option<InMemorySnapshotStore>,
    /// The temporary directory, kept alive for file-based streams.
    pub temp_dir: Option<TempDir>,
}

impl TestStream {
    /// Creates an in-memory stream where `frames_per_block` test records
    /// fill one indexed block.
    #[must_use]
    pub fn memory(name: &str, frames_per_block: usize) -> Self {
        let snapshots = InMemorySnapshotStore::new();
        let stream = LogStream::builder(name)
            .config(test_config(frames_per_block))
            .snapshot_store(Box::new(snapshots.clone()))
            .build();
        Self {
            stream,
            snapshots: Some(snapshots),
            temp_dir: None,
        }
    }

    /// Creates a file-backed stream in a fresh temporary directory.
    #[must_use]
    pub fn file(name: &str, frames_per_block: usize) -> Self {
        let temp_dir = TempDir::new().expect("create temp directory");
        let stream = build_file_stream(name, frames_per_block, &temp_dir);
        Self {
            stream,
            snapshots: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Rebuilds a file-backed stream over this stream's directory,
    /// simulating a restart. The current stream must be closed first.
    #[must_use]
    pub fn reopen_file(self, name: &str, frames_per_block: usize) -> Self {
        let temp_dir = self.temp_dir.expect("reopen requires a file-backed stream");
        drop(self.stream);
        let stream = build_file_stream(name, frames_per_block, &temp_dir);
        Self {
            stream,
            snapshots: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Publishes test records at the given positions.
    pub fn publish_all(&self, positions: impl IntoIterator<Item = Position>) {
        for position in positions {
            self.stream
                .publish(&test_record(position))
                .expect("publish test record");
        }
    }

    /// Waits until all published records left the write buffer.
    pub fn wait_for_drain(&self) {
        let writer = self.stream.writer();
        wait_until(|| writer.is_empty());
    }

    /// Waits until the index holds exactly `blocks` entries.
    pub fn wait_for_indexed_blocks(&self, blocks: usize) {
        wait_until(|| self.stream.indexed_block_count() == blocks);
    }
}

fn build_file_stream(name: &str, frames_per_block: usize, temp_dir: &TempDir) -> LogStream {
    let storage = FileLogStorage::new(&temp_dir.path().join(format!("{name}.log")));
    let snapshots = FileSnapshotStore::new(&temp_dir.path().join("snapshots"));
    LogStream::builder(name)
        .config(test_config(frames_per_block))
        .storage(Box::new(storage))
        .snapshot_store(Box::new(snapshots))
        .build()
}

impl std::ops::Deref for TestStream {
    type Target = LogStream;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

/// Spins until `condition` holds, panicking after five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition not met within 5 seconds"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Failure listener recording every notification it receives.
#[derive(Default)]
pub struct RecordingListener {
    failed: Mutex<Vec<Position>>,
    recovered: AtomicUsize,
}

impl RecordingListener {
    /// Creates a listener with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions passed to `on_failed`, in notification order.
    #[must_use]
    pub fn failed_positions(&self) -> Vec<Position> {
        self.failed.lock().clone()
    }

    /// Number of `on_recovered` notifications.
    #[must_use]
    pub fn recovered_count(&self) -> usize {
        self.recovered.load(Ordering::Acquire)
    }
}

impl FailureListener for RecordingListener {
    fn on_failed(&self, first_failed_position: Position) {
        self.failed.lock().push(first_failed_position);
    }

    fn on_recovered(&self) {
        self.recovered.fetch_add(1, Ordering::AcqRel);
    }
}

/// Appends pre-framed records directly to a storage, bypassing the stream.
///
/// Useful for preparing a log a fresh stream recovers from.
pub fn seed_storage(storage: &mut dyn LogStorage, positions: &[Position]) {
    let framed: Vec<u8> = positions
        .iter()
        .flat_map(|&position| test_record(position).encode().expect("encode test record"))
        .collect();
    storage.open().expect("open storage");
    storage.append(&framed).expect("seed storage");
    storage.close();
}
