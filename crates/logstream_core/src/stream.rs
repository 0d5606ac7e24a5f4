//! Log stream facade.
//!
//! Wires the appender and indexer together over one shared log storage and
//! hosts both on a single worker thread. The facade is the only public
//! entry point for lifecycle requests; producers publish through a
//! [`QueueWriteBuffer`] handle and readers resolve positions to block
//! addresses through the shared index.

use crate::actor::{Actor, AgentRunner, CommandQueue};
use crate::appender::{Appender, AppenderCommand};
use crate::buffer::QueueWriteBuffer;
use crate::config::LogStreamConfig;
use crate::error::{CoreError, CoreResult};
use crate::frame::LoggedRecord;
use crate::index::BlockIndex;
use crate::indexer::{Indexer, IndexerCommand, SharedBlockIndex};
use crate::listener::{FailureListener, FailureListeners, ListenerId};
use crate::snapshot::{
    InMemorySnapshotStore, PositionSnapshotPolicy, SnapshotPolicy, SnapshotStore,
};
use crate::types::{BlockAddress, CommitPositionHandle, Position, SharedLogStorage};
use futures::channel::oneshot;
use futures::executor::block_on;
use logstream_storage::{InMemoryLogStorage, LogStorage};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Builder for a [`LogStream`].
pub struct LogStreamBuilder {
    name: String,
    config: LogStreamConfig,
    storage: Box<dyn LogStorage>,
    snapshot_store: Box<dyn SnapshotStore>,
    snapshot_policy: Option<Box<dyn SnapshotPolicy>>,
    commit: CommitPositionHandle,
}

impl LogStreamBuilder {
    /// Creates a builder for a stream named `name`, backed by in-memory
    /// storage and snapshots until configured otherwise.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: LogStreamConfig::default(),
            storage: Box::new(InMemoryLogStorage::new()),
            snapshot_store: Box::new(InMemorySnapshotStore::new()),
            snapshot_policy: None,
            commit: CommitPositionHandle::default(),
        }
    }

    /// Sets the log storage backend.
    #[must_use]
    pub fn storage(mut self, storage: Box<dyn LogStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the snapshot store for the block index.
    #[must_use]
    pub fn snapshot_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.snapshot_store = store;
        self
    }

    /// Replaces the position-interval snapshot policy.
    #[must_use]
    pub fn snapshot_policy(mut self, policy: Box<dyn SnapshotPolicy>) -> Self {
        self.snapshot_policy = Some(policy);
        self
    }

    /// Sets the stream configuration.
    #[must_use]
    pub fn config(mut self, config: LogStreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an externally owned commit position with the stream.
    #[must_use]
    pub fn commit_position(mut self, commit: CommitPositionHandle) -> Self {
        self.commit = commit;
        self
    }

    /// Builds the stream and spawns its worker thread.
    ///
    /// Both state machines start closed; [`LogStream::open`] brings the
    /// stream into service.
    #[must_use]
    pub fn build(self) -> LogStream {
        let storage: SharedLogStorage = Arc::new(Mutex::new(self.storage));
        let index: SharedBlockIndex = Arc::new(RwLock::new(BlockIndex::new()));
        let writer = QueueWriteBuffer::new();
        let listeners = FailureListeners::new();
        let failed = Arc::new(AtomicBool::new(false));
        let appender_commands = CommandQueue::new();
        let indexer_commands = CommandQueue::new();

        let appender = Appender::new(
            self.name.clone(),
            Arc::clone(&storage),
            Box::new(writer.clone()),
            listeners.clone(),
            appender_commands.clone(),
            self.config.max_append_block_size,
            Arc::clone(&failed),
        );
        let policy = self.snapshot_policy.unwrap_or_else(|| {
            Box::new(PositionSnapshotPolicy::new(self.config.snapshot_interval))
        });
        let indexer = Indexer::new(
            self.name.clone(),
            Arc::clone(&storage),
            Arc::clone(&index),
            self.snapshot_store,
            policy,
            self.commit.clone(),
            indexer_commands.clone(),
            self.config.read_buffer_size,
            self.config.block_fill_threshold(),
        );

        let actors: Vec<Box<dyn Actor>> = vec![Box::new(appender), Box::new(indexer)];
        let runner = AgentRunner::spawn(&format!("logstream-{}", self.name), actors);

        LogStream {
            name: self.name,
            config: self.config,
            storage,
            index,
            commit: self.commit,
            writer,
            listeners,
            appender_commands,
            indexer_commands,
            failed,
            opened: Arc::new(AtomicBool::new(false)),
            runner: Some(runner),
        }
    }
}

/// An append-only log stream with a sparse block index.
pub struct LogStream {
    name: String,
    config: LogStreamConfig,
    storage: SharedLogStorage,
    index: SharedBlockIndex,
    commit: CommitPositionHandle,
    writer: QueueWriteBuffer,
    listeners: FailureListeners,
    appender_commands: CommandQueue<AppenderCommand>,
    indexer_commands: CommandQueue<IndexerCommand>,
    failed: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    runner: Option<AgentRunner>,
}

impl LogStream {
    /// Creates a builder for a stream named `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> LogStreamBuilder {
        LogStreamBuilder::new(name)
    }

    /// The stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens both state machines.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or the stream is
    /// already open.
    pub fn open(&self) -> CoreResult<()> {
        block_on(self.open_async())
    }

    /// Requests both state machines to open and returns a future completing
    /// once the stream is in service.
    pub fn open_async(&self) -> impl Future<Output = CoreResult<()>> {
        let (appender_ack, appender_done) = oneshot::channel();
        let (indexer_ack, indexer_done) = oneshot::channel();
        self.appender_commands.push(AppenderCommand::Open(appender_ack));
        self.indexer_commands.push(IndexerCommand::Open(indexer_ack));
        let opened = Arc::clone(&self.opened);
        async move {
            appender_done.await.map_err(|_| CoreError::Shutdown)??;
            indexer_done.await.map_err(|_| CoreError::Shutdown)??;
            opened.store(true, Ordering::Release);
            Ok(())
        }
    }

    /// Closes both state machines and the underlying storage.
    ///
    /// Buffered records are appended before the appender closes, unless the
    /// stream has failed.
    pub fn close(&self) {
        block_on(self.close_async());
    }

    /// Requests a close and returns a future completing once storage is
    /// closed. The worker thread stays alive until the stream is dropped,
    /// so a closed stream can be reopened.
    pub fn close_async(&self) -> impl Future<Output = ()> {
        let (appender_ack, appender_done) = oneshot::channel();
        let (indexer_ack, indexer_done) = oneshot::channel();
        self.appender_commands.push(AppenderCommand::Close(appender_ack));
        self.indexer_commands.push(IndexerCommand::Close(indexer_ack));
        let opened = Arc::clone(&self.opened);
        let storage = Arc::clone(&self.storage);
        async move {
            let _ = appender_done.await;
            let _ = indexer_done.await;
            storage.lock().close();
            opened.store(false, Ordering::Release);
        }
    }

    /// Requests truncation of the log suffix starting at `position` and
    /// returns a future with the outcome.
    ///
    /// Truncation is rejected at or below the commit position and when no
    /// frame with a position at or above `position` exists.
    pub fn truncate(&self, position: Position) -> impl Future<Output = CoreResult<()>> {
        let (ack, done) = oneshot::channel();
        self.indexer_commands
            .push(IndexerCommand::Truncate { position, ack });
        async move { done.await.map_err(|_| CoreError::Shutdown)? }
    }

    /// Requests the appender to leave the failed state and resume.
    ///
    /// Registered listeners observe the recovery before new blocks are
    /// appended. Ignored when the stream has not failed.
    pub fn recover(&self) {
        self.appender_commands.push(AppenderCommand::Recover);
    }

    /// Frames `record` and publishes it to the stream's write buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be framed.
    pub fn publish(&self, record: &LoggedRecord) -> CoreResult<()> {
        self.writer.publish(record)
    }

    /// Returns a producer handle onto the stream's write buffer.
    #[must_use]
    pub fn writer(&self) -> QueueWriteBuffer {
        self.writer.clone()
    }

    /// Returns the shared commit position handle.
    #[must_use]
    pub fn commit_position(&self) -> CommitPositionHandle {
        self.commit.clone()
    }

    /// Registers a failure listener.
    pub fn register_failure_listener(&self, listener: Arc<dyn FailureListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    /// Removes a previously registered failure listener.
    pub fn remove_failure_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Whether the stream completed an open and has not been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Whether the stream is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Whether the appender is in the failed state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// The configured target block size in bytes.
    #[must_use]
    pub fn index_block_size(&self) -> usize {
        self.config.index_block_size
    }

    /// Resolves `position` to the address of the block to start reading
    /// from: the indexed block with the greatest first position at or below
    /// `position`, or the first block of the log when nothing is indexed
    /// below it.
    #[must_use]
    pub fn lookup_block_address(&self, position: Position) -> BlockAddress {
        self.index
            .read()
            .lookup(position)
            .unwrap_or_else(|| self.storage.lock().first_block_address())
    }

    /// Number of blocks currently indexed.
    #[must_use]
    pub fn indexed_block_count(&self) -> usize {
        self.index.read().len()
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if self.opened.load(Ordering::Acquire) {
            block_on(self.close_async());
        }
        // Joins the worker thread.
        self.runner.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn record(position: Position) -> LoggedRecord {
        LoggedRecord::new(1, 1, position).with_value(vec![0xEE; 32])
    }

    fn small_block_stream(name: &str) -> LogStream {
        let frame_len = record(1).encode().unwrap().len();
        LogStream::builder(name)
            .config(
                LogStreamConfig::new()
                    .index_block_size(frame_len * 2)
                    .deviation(0.0)
                    .snapshot_interval(1),
            )
            .build()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met within 5s");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn open_close_lifecycle() {
        let stream = small_block_stream("lifecycle");
        assert!(!stream.is_open());

        stream.open().unwrap();
        assert!(stream.is_open());
        assert!(!stream.is_failed());

        stream.close();
        assert!(!stream.is_open());
    }

    #[test]
    fn double_open_is_rejected() {
        let stream = small_block_stream("double-open");
        stream.open().unwrap();
        assert!(matches!(
            stream.open(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn reopen_after_close() {
        let stream = small_block_stream("reopen");
        stream.open().unwrap();
        stream.close();
        stream.open().unwrap();
        assert!(stream.is_open());
    }

    #[test]
    fn committed_records_become_indexed() {
        let stream = small_block_stream("indexing");
        stream.open().unwrap();

        for position in 1..=4 {
            stream.publish(&record(position)).unwrap();
        }
        stream.commit_position().advance_to(4);

        wait_until(|| stream.indexed_block_count() == 2);
        let first_block = stream.lookup_block_address(1);
        let second_block = stream.lookup_block_address(3);
        assert!(second_block > first_block);
        assert_eq!(stream.lookup_block_address(4), second_block);
    }

    #[test]
    fn lookup_falls_back_to_the_first_block() {
        let stream = small_block_stream("lookup-floor");
        stream.open().unwrap();
        assert_eq!(stream.lookup_block_address(42), 0);
    }

    #[test]
    fn truncate_rejected_at_commit_position() {
        let stream = small_block_stream("truncate-reject");
        stream.open().unwrap();

        stream.publish(&record(1)).unwrap();
        stream.commit_position().advance_to(1);

        let result = block_on(stream.truncate(1));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn truncate_discards_uncommitted_suffix() {
        let stream = small_block_stream("truncate");
        stream.open().unwrap();

        for position in 1..=4 {
            stream.publish(&record(position)).unwrap();
        }
        stream.commit_position().advance_to(2);
        wait_until(|| stream.indexed_block_count() == 1);
        // Wait for the appender to drain everything to storage.
        let writer = stream.writer();
        wait_until(|| writer.is_empty());

        block_on(stream.truncate(3)).unwrap();

        stream.commit_position().advance_to(4);
        std::thread::sleep(Duration::from_millis(20));
        // Positions 3 and 4 are gone; nothing above block one is indexed.
        assert_eq!(stream.indexed_block_count(), 1);
    }

    #[test]
    fn close_drains_published_records() {
        let stream = small_block_stream("close-drain");
        stream.open().unwrap();

        let writer = stream.writer();
        for position in 1..=3 {
            stream.publish(&record(position)).unwrap();
        }
        stream.close();
        assert!(writer.is_empty());
    }
}
