//! Log storage trait definition.

use crate::error::StorageResult;

/// A byte-addressable, append-only store for framed log blocks.
///
/// Log storage implementations are **opaque byte stores**. They hand out
/// block addresses on append and read raw bytes back; the frame format,
/// block boundaries, and index structures are owned entirely by
/// `logstream_core`.
///
/// # Invariants
///
/// - `append` returns the address where the block starts
/// - `read` returns exactly the bytes previously appended at that address
///   (a short read at the tail of the log is not an error)
/// - `flush` makes all previously appended data durable
/// - a failed `append` never leaves a partial block visible to readers
/// - implementations must be `Send` so a stream can hand the storage to its
///   worker thread; concurrent access is serialized by the caller
///
/// # Implementors
///
/// - [`super::InMemoryLogStorage`] - for tests and ephemeral streams
/// - [`super::FileLogStorage`] - for persistent streams
pub trait LogStorage: Send {
    /// Opens the storage for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::AlreadyOpen`] if the storage is open,
    /// or an I/O error if the underlying resource cannot be acquired.
    fn open(&mut self) -> StorageResult<()>;

    /// Closes the storage. Closing a closed storage is a no-op.
    fn close(&mut self);

    /// Returns whether the storage is open.
    fn is_open(&self) -> bool;

    /// Appends a block of framed bytes and returns its address.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not open or an I/O error occurs.
    /// On error nothing of the block is observable at the tail.
    fn append(&mut self, block: &[u8]) -> StorageResult<u64>;

    /// Reads up to `buf.len()` bytes starting at `address` into `buf`.
    ///
    /// Returns the number of bytes read. Reading at the current tail
    /// returns `0`; reading close to the tail returns the available prefix.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidAddress`] if `address` lies
    /// beyond the tail, or an error if the storage is not open or an I/O
    /// error occurs.
    fn read(&self, address: u64, buf: &mut [u8]) -> StorageResult<usize>;

    /// Flushes all appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not open or the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Truncates the log, discarding everything at and after `address`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidAddress`] if `address` lies
    /// beyond the tail, or an error if the storage is not open or the
    /// truncation fails.
    fn truncate(&mut self, address: u64) -> StorageResult<()>;

    /// Returns the address of the first block in the log.
    fn first_block_address(&self) -> u64;

    /// Returns the current size of the log in bytes.
    ///
    /// This is the address where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not open.
    fn size(&self) -> StorageResult<u64>;
}
