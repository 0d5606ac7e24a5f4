//! Indexer state machine.
//!
//! Scans committed frames out of log storage, accumulates them into blocks
//! and appends one index entry per block. Runs behind the appender: the
//! commit position gates how far it reads, so the index never references an
//! uncommitted record. Periodically the in-memory index is snapshotted so a
//! restart only rescans the log tail.

use crate::actor::{Actor, CommandQueue};
use crate::error::{CoreError, CoreResult};
use crate::frame::{
    aligned_frame_length, frame_length, frame_position, CommittedFramesFilter,
    CompleteFramesFilter, FilterVerdict, MIN_FRAME_LENGTH,
};
use crate::index::BlockIndex;
use crate::snapshot::{SnapshotPolicy, SnapshotStore};
use crate::types::{BlockAddress, CommitPositionHandle, Position, SharedLogStorage};
use futures::channel::oneshot;
use logstream_storage::LogStorage;
use parking_lot::RwLock;
use std::sync::Arc;

/// Block index shared between the indexer (writes) and stream readers.
pub(crate) type SharedBlockIndex = Arc<RwLock<BlockIndex>>;

/// Lifecycle requests handled by the indexer.
pub(crate) enum IndexerCommand {
    /// Open storage, recover the latest snapshot and start scanning.
    Open(oneshot::Sender<CoreResult<()>>),
    /// Write a final snapshot and stop.
    Close(oneshot::Sender<()>),
    /// Discard the log suffix starting at the frame with this position.
    Truncate {
        position: Position,
        ack: oneshot::Sender<CoreResult<()>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Opening,
    Open,
    /// Committed frames were read; index entries are being created.
    Creating,
    Snapshotting,
    Truncating,
    Closing,
}

/// The block currently being accumulated.
#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    address: BlockAddress,
    first_position: Position,
    accumulated: usize,
}

pub(crate) struct Indexer {
    name: String,
    state: State,
    storage: SharedLogStorage,
    index: SharedBlockIndex,
    snapshot_store: Box<dyn SnapshotStore>,
    snapshot_policy: Box<dyn SnapshotPolicy>,
    commit: CommitPositionHandle,
    filter: CommittedFramesFilter,
    read_buffer: Vec<u8>,
    /// Storage address of the next unscanned byte.
    next_address: BlockAddress,
    /// Usable byte count of the most recent read, set when entering Creating.
    pending_bytes: usize,
    block: Option<OpenBlock>,
    /// Position of the last frame that completed an indexed block.
    last_indexed_position: Option<Position>,
    block_fill_threshold: usize,
    /// Whether entries were appended since the last committed snapshot.
    dirty: bool,
    commands: CommandQueue<IndexerCommand>,
    pending_open: Option<oneshot::Sender<CoreResult<()>>>,
    pending_close: Option<oneshot::Sender<()>>,
    pending_truncate: Option<(Position, oneshot::Sender<CoreResult<()>>)>,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        storage: SharedLogStorage,
        index: SharedBlockIndex,
        snapshot_store: Box<dyn SnapshotStore>,
        snapshot_policy: Box<dyn SnapshotPolicy>,
        commit: CommitPositionHandle,
        commands: CommandQueue<IndexerCommand>,
        read_buffer_size: usize,
        block_fill_threshold: usize,
    ) -> Self {
        let capacity = read_buffer_size.max(aligned_frame_length(MIN_FRAME_LENGTH));
        Self {
            name,
            state: State::Closed,
            storage,
            index,
            snapshot_store,
            snapshot_policy,
            commit,
            filter: CommittedFramesFilter::new(),
            read_buffer: vec![0; capacity],
            next_address: 0,
            pending_bytes: 0,
            block: None,
            last_indexed_position: None,
            block_fill_threshold,
            dirty: false,
            commands,
            pending_open: None,
            pending_close: None,
            pending_truncate: None,
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut work = 0;
        while let Some(command) = self.commands.pop() {
            work += 1;
            match command {
                IndexerCommand::Open(ack) => match self.state {
                    State::Closed => {
                        self.state = State::Opening;
                        self.pending_open = Some(ack);
                    }
                    _ => {
                        let _ = ack.send(Err(CoreError::invalid_operation(
                            "indexer is already open",
                        )));
                    }
                },
                IndexerCommand::Close(ack) => match self.state {
                    State::Closed => {
                        let _ = ack.send(());
                    }
                    _ => {
                        if let Some((_, truncate_ack)) = self.pending_truncate.take() {
                            let _ = truncate_ack.send(Err(CoreError::Shutdown));
                        }
                        self.state = State::Closing;
                        self.pending_close = Some(ack);
                    }
                },
                IndexerCommand::Truncate { position, ack } => match self.state {
                    State::Open => {
                        self.state = State::Truncating;
                        self.pending_truncate = Some((position, ack));
                    }
                    _ => {
                        let _ = ack.send(Err(CoreError::invalid_operation(
                            "truncation requires an open, idle indexer",
                        )));
                    }
                },
            }
        }
        work
    }

    fn open(&mut self) -> usize {
        let open_result = {
            let mut storage = self.storage.lock();
            if storage.is_open() {
                Ok(())
            } else {
                storage.open()
            }
        };
        self.filter = CommittedFramesFilter::new();
        self.block = None;
        self.pending_bytes = 0;
        self.dirty = false;
        match open_result {
            Ok(()) => self.recover(),
            Err(err) => {
                // A peer may still open the shared storage; scan the whole
                // log instead of refusing to start.
                tracing::warn!(stream = %self.name, %err, "storage open failed, rescanning from the first block");
                self.rescan_from_first_block();
            }
        }

        self.state = State::Open;
        if let Some(ack) = self.pending_open.take() {
            let _ = ack.send(Ok(()));
        }
        1
    }

    /// Restores the index from the latest snapshot, falling back to a full
    /// rescan from the first block when no usable snapshot exists.
    fn recover(&mut self) {
        let first_address = self.storage.lock().first_block_address();
        let recovered = match self.snapshot_store.latest(&self.name) {
            Ok(Some(reader)) => {
                let mut index = BlockIndex::new();
                match reader.recover_into(&mut index) {
                    Ok(()) => Some((index, reader.position())),
                    Err(err) => {
                        tracing::warn!(stream = %self.name, %err, "snapshot unreadable, rescanning from the first block");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(stream = %self.name, %err, "snapshot store unavailable, rescanning from the first block");
                None
            }
        };

        match recovered {
            Some((index, position)) => {
                // Rescanning starts at the last indexed block; its entry
                // already exists and is skipped when the block refills.
                self.next_address = index
                    .entries()
                    .last()
                    .map_or(first_address, |entry| entry.block_address);
                self.last_indexed_position = Some(position);
                tracing::info!(
                    stream = %self.name,
                    entries = index.len(),
                    snapshot_position = position,
                    "block index recovered from snapshot"
                );
                *self.index.write() = index;
            }
            None => self.rescan_from_first_block(),
        }
    }

    /// Discards any recovered state and restarts the scan at the log's
    /// first block.
    fn rescan_from_first_block(&mut self) {
        self.next_address = self.storage.lock().first_block_address();
        self.last_indexed_position = None;
        *self.index.write() = BlockIndex::new();
    }

    /// Reads the next chunk of committed frames from storage.
    fn poll_storage(&mut self) -> usize {
        let bytes_read = {
            let storage = self.storage.lock();
            match storage.read(self.next_address, &mut self.read_buffer) {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(stream = %self.name, address = self.next_address, %err, "log read failed");
                    return 0;
                }
            }
        };
        if bytes_read == 0 {
            return 0;
        }

        let capacity = self.read_buffer.len();
        let commit = self.commit.get();
        match self
            .filter
            .apply(&self.read_buffer, bytes_read, capacity, commit)
        {
            Ok(FilterVerdict::Available(0)) => 0,
            Ok(FilterVerdict::Available(n)) => {
                self.pending_bytes = n;
                self.state = State::Creating;
                1
            }
            Ok(FilterVerdict::InsufficientCapacity) => {
                let grown = capacity * 2;
                tracing::debug!(stream = %self.name, capacity = grown, "growing indexer read buffer");
                self.read_buffer.resize(grown, 0);
                1
            }
            Err(err) => {
                tracing::error!(stream = %self.name, address = self.next_address, %err, "corrupted frame in the log");
                0
            }
        }
    }

    /// Walks the scanned frames and appends index entries for filled blocks.
    fn create_entries(&mut self) -> usize {
        let mut offset = 0;
        let mut snapshot_due = false;
        while offset < self.pending_bytes {
            // Infallible: the filter already validated these headers.
            let Ok(length) = frame_length(&self.read_buffer, offset) else {
                break;
            };
            let Ok(position) = frame_position(&self.read_buffer, offset) else {
                break;
            };
            let aligned = aligned_frame_length(length);

            let block = self.block.get_or_insert(OpenBlock {
                address: self.next_address + offset as u64,
                first_position: position,
                accumulated: 0,
            });
            block.accumulated += aligned;

            if block.accumulated >= self.block_fill_threshold {
                let (first_position, address) = (block.first_position, block.address);
                self.block = None;
                self.append_entry(first_position, address);
                self.last_indexed_position = Some(position);
                if self.snapshot_policy.should_snapshot(position) {
                    snapshot_due = true;
                }
            }
            offset += aligned;
        }

        self.next_address += self.pending_bytes as u64;
        self.pending_bytes = 0;
        self.state = if snapshot_due && self.dirty {
            State::Snapshotting
        } else {
            State::Open
        };
        1
    }

    /// Appends an index entry unless the block was already indexed before
    /// the snapshot this indexer recovered from.
    fn append_entry(&mut self, first_position: Position, address: BlockAddress) {
        let mut index = self.index.write();
        let already_indexed = index
            .entries()
            .last()
            .is_some_and(|entry| entry.first_record_position >= first_position);
        if already_indexed {
            return;
        }
        index.append(first_position, address);
        drop(index);
        self.dirty = true;
        tracing::trace!(
            stream = %self.name,
            first_position,
            address,
            "block indexed"
        );
    }

    fn take_snapshot(&mut self) -> usize {
        self.write_snapshot();
        self.state = State::Open;
        1
    }

    /// Writes a snapshot of the current index. Best effort: a failure is
    /// logged and the indexer keeps running on the in-memory index.
    fn write_snapshot(&mut self) {
        let Some(position) = self.last_indexed_position else {
            return;
        };
        // The log bytes an entry points into must be durable before the
        // snapshot carrying the entry.
        if let Err(err) = self.storage.lock().flush() {
            tracing::warn!(stream = %self.name, position, %err, "log flush failed, skipping snapshot");
            return;
        }
        let index = self.index.read().clone();
        let result = self
            .snapshot_store
            .create(&self.name, position)
            .and_then(|mut writer| match writer.write(&index) {
                Ok(()) => writer.commit(),
                Err(err) => {
                    writer.abort();
                    Err(err)
                }
            });
        match result {
            Ok(()) => {
                self.dirty = false;
                tracing::debug!(stream = %self.name, position, entries = index.len(), "block index snapshot committed");
            }
            Err(err) => {
                tracing::warn!(stream = %self.name, position, %err, "block index snapshot failed");
            }
        }
    }

    fn truncate(&mut self) -> usize {
        let Some((position, ack)) = self.pending_truncate.take() else {
            self.state = State::Open;
            return 1;
        };
        let result = self.truncate_at(position);
        if let Err(err) = &result {
            tracing::warn!(stream = %self.name, position, %err, "truncation failed");
        }
        let _ = ack.send(result);
        self.state = State::Open;
        1
    }

    fn truncate_at(&mut self, position: Position) -> CoreResult<()> {
        let commit = self.commit.get();
        if position <= commit {
            return Err(CoreError::invalid_operation(format!(
                "cannot truncate at position {position}, commit position is {commit}"
            )));
        }

        let start = {
            let index = self.index.read();
            index
                .lookup(position)
                .unwrap_or_else(|| self.storage.lock().first_block_address())
        };
        let address = self.locate_frame(start, position)?.ok_or_else(|| {
            CoreError::invalid_operation(format!("no frame at or above position {position}"))
        })?;

        self.storage.lock().truncate(address)?;
        self.index.write().truncate(position);
        if address < self.next_address {
            // The scan ran past the truncation point; restart behind it.
            self.next_address = address;
            self.block = None;
            self.filter = CommittedFramesFilter::new();
        }
        tracing::info!(stream = %self.name, position, address, "log truncated");
        Ok(())
    }

    /// Scans forward from `start` for the first frame with a position at or
    /// above `position` and returns its address.
    fn locate_frame(
        &mut self,
        start: BlockAddress,
        position: Position,
    ) -> CoreResult<Option<BlockAddress>> {
        let mut filter = CompleteFramesFilter::new();
        let mut address = start;
        loop {
            let bytes_read = self.storage.lock().read(address, &mut self.read_buffer)?;
            let capacity = self.read_buffer.len();
            match filter.apply(&self.read_buffer, bytes_read, capacity)? {
                FilterVerdict::InsufficientCapacity => {
                    self.read_buffer.resize(capacity * 2, 0);
                }
                // End of the log, possibly with a torn frame tail.
                FilterVerdict::Available(0) => return Ok(None),
                FilterVerdict::Available(usable) => {
                    let mut offset = 0;
                    while offset < usable {
                        if frame_position(&self.read_buffer, offset)? >= position {
                            return Ok(Some(address + offset as u64));
                        }
                        offset += aligned_frame_length(frame_length(&self.read_buffer, offset)?);
                    }
                    address += usable as u64;
                }
            }
        }
    }

    fn close(&mut self) -> usize {
        if self.dirty {
            self.write_snapshot();
        }
        self.block = None;
        self.pending_bytes = 0;
        tracing::debug!(stream = %self.name, "indexer closed");
        self.state = State::Closed;
        if let Some(ack) = self.pending_open.take() {
            let _ = ack.send(Err(CoreError::Shutdown));
        }
        if let Some(ack) = self.pending_close.take() {
            let _ = ack.send(());
        }
        1
    }

    #[cfg(test)]
    fn next_address(&self) -> BlockAddress {
        self.next_address
    }
}

impl Actor for Indexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_work(&mut self) -> usize {
        let work = self.drain_commands();
        work + match self.state {
            State::Closed => 0,
            State::Opening => self.open(),
            State::Open => self.poll_storage(),
            State::Creating => self.create_entries(),
            State::Snapshotting => self.take_snapshot(),
            State::Truncating => self.truncate(),
            State::Closing => self.close(),
        }
    }
}
