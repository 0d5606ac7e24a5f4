//! # logstream core
//!
//! Append-only log stream engine with a sparse block index.
//!
//! A [`LogStream`] is built from two cooperating state machines hosted on
//! one worker thread:
//!
//! - the **appender** drains framed records from a write buffer and appends
//!   them to log storage in contiguous blocks; an append failure fail-stops
//!   the stream until an explicit [`LogStream::recover`]
//! - the **indexer** scans committed frames back out of storage and
//!   maintains a position-to-address [block index](BlockIndex) so readers
//!   can seek near a position without scanning the whole log
//!
//! The commit position is a shared, monotonic marker advanced by an
//! external collaborator (e.g. a replication layer); the indexer never
//! indexes a record above it. The index is periodically snapshotted so a
//! restart only rescans the log tail.
//!
//! ## Example
//!
//! ```rust
//! use logstream_core::{LogStream, LogStreamConfig, LoggedRecord};
//!
//! let stream = LogStream::builder("orders").build();
//! stream.open().unwrap();
//!
//! stream
//!     .publish(&LoggedRecord::new(1, 1, 1).with_value(b"created".to_vec()))
//!     .unwrap();
//! stream.commit_position().advance_to(1);
//!
//! stream.close();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod actor;
mod appender;
mod buffer;
mod config;
mod error;
mod frame;
mod index;
mod indexer;
mod listener;
mod snapshot;
mod stream;
mod types;

pub use actor::{Actor, AgentRunner, CommandQueue};
pub use buffer::{PeekedBlock, QueueWriteBuffer, WriteBuffer};
pub use config::LogStreamConfig;
pub use error::{CoreError, CoreResult};
pub use frame::{
    aligned_frame_length, CommittedFramesFilter, CompleteFramesFilter, FilterVerdict,
    LoggedRecord, RecordKey, FRAME_ALIGNMENT, FRAME_CODEC_VERSION, KEY_TYPE_BYTES, KEY_TYPE_U64,
    MAX_FRAME_LENGTH, MIN_FRAME_LENGTH,
};
pub use index::{BlockIndex, BlockIndexEntry, INDEX_MAGIC, INDEX_VERSION};
pub use listener::{FailureListener, ListenerId};
pub use snapshot::{
    FileSnapshotStore, InMemorySnapshotStore, PositionSnapshotPolicy, SnapshotPolicy,
    SnapshotReader, SnapshotStore, SnapshotWriter,
};
pub use stream::{LogStream, LogStreamBuilder};
pub use types::{
    BlockAddress, CommitPositionHandle, Position, SharedLogStorage, NO_SOURCE_RECORD_POSITION,
    NO_SOURCE_STREAM_ID,
};
