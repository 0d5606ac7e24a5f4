//! Write buffer interface.
//!
//! Producers frame records and publish them into a write buffer; the
//! appender peeks contiguous blocks of framed bytes from it and moves them
//! to log storage. The buffer itself is an external collaborator - this
//! module defines the narrow interface the appender consumes plus a simple
//! in-memory queue implementation.

use crate::error::{CoreError, CoreResult};
use crate::frame::LoggedRecord;
use crate::types::Position;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A contiguous block of framed bytes peeked from a write buffer.
#[derive(Debug, Clone)]
pub struct PeekedBlock {
    /// The raw framed bytes of the block.
    pub data: Bytes,
    /// Position of the first record in the block.
    pub first_position: Position,
}

/// The append-side view of a multi-producer write buffer.
///
/// `peek_block` does not consume; the peeked block stays at the front of the
/// buffer until the appender marks it completed (durably appended) or failed
/// (discarded). Peeking again before a mark returns the same block.
pub trait WriteBuffer: Send {
    /// Peeks a contiguous block of up to `max_bytes` framed bytes.
    ///
    /// Returns `None` when no data is available. A single frame larger than
    /// `max_bytes` is returned alone rather than split.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer contents are corrupted.
    fn peek_block(&mut self, max_bytes: usize) -> CoreResult<Option<PeekedBlock>>;

    /// Consumes the peeked block, advancing the read cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if no block is currently peeked.
    fn mark_completed(&mut self) -> CoreResult<()>;

    /// Discards the peeked block.
    ///
    /// # Errors
    ///
    /// Returns an error if no block is currently peeked.
    fn mark_failed(&mut self) -> CoreResult<()>;

    /// Position of the next record to be consumed, `None` if the buffer is
    /// empty.
    fn current_position(&self) -> Option<Position>;
}

/// In-memory write buffer backed by a frame queue.
///
/// Clones share the same queue: producers keep one handle and publish
/// records while the appender drains another. Suitable for tests and
/// single-process streams.
#[derive(Debug, Clone, Default)]
pub struct QueueWriteBuffer {
    inner: Arc<Mutex<QueueInner>>,
}

#[derive(Debug, Default)]
struct QueueInner {
    entries: VecDeque<(Position, Bytes)>,
    peeked: usize,
}

impl QueueWriteBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames `record` and publishes it into the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be framed.
    pub fn publish(&self, record: &LoggedRecord) -> CoreResult<()> {
        let frame = record.encode()?;
        self.publish_frame(record.position, Bytes::from(frame));
        Ok(())
    }

    /// Publishes an already framed record.
    pub fn publish_frame(&self, position: Position, frame: Bytes) {
        self.inner.lock().entries.push_back((position, frame));
    }

    /// Returns the number of unconsumed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns whether the buffer holds no unconsumed records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl WriteBuffer for QueueWriteBuffer {
    fn peek_block(&mut self, max_bytes: usize) -> CoreResult<Option<PeekedBlock>> {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return Ok(None);
        }

        let first_position = inner.entries[0].0;
        let mut data = Vec::new();
        let mut count = 0;
        for (_, frame) in &inner.entries {
            // Always take at least one frame so oversized frames make progress.
            if count > 0 && data.len() + frame.len() > max_bytes {
                break;
            }
            data.extend_from_slice(frame);
            count += 1;
        }
        inner.peeked = count;
        Ok(Some(PeekedBlock {
            data: Bytes::from(data),
            first_position,
        }))
    }

    fn mark_completed(&mut self) -> CoreResult<()> {
        self.consume("completed")
    }

    fn mark_failed(&mut self) -> CoreResult<()> {
        self.consume("failed")
    }

    fn current_position(&self) -> Option<Position> {
        self.inner.lock().entries.front().map(|(position, _)| *position)
    }
}

impl QueueWriteBuffer {
    fn consume(&mut self, kind: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.peeked == 0 {
            return Err(CoreError::invalid_operation(format!(
                "no peeked block to mark {kind}"
            )));
        }
        let peeked = inner.peeked;
        inner.entries.drain(..peeked);
        inner.peeked = 0;
        Ok(())
    }
}
