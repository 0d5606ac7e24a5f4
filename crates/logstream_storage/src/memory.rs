//! In-memory log storage for testing.

use crate::error::{StorageError, StorageResult};
use crate::storage::LogStorage;
use parking_lot::RwLock;

/// An in-memory log storage.
///
/// Stores the whole log in a byte vector. Suitable for:
/// - Unit and integration tests
/// - Ephemeral streams that do not need persistence
///
/// # Example
///
/// ```rust
/// use logstream_storage::{LogStorage, InMemoryLogStorage};
///
/// let mut storage = InMemoryLogStorage::new();
/// storage.open().unwrap();
/// let address = storage.append(b"framed bytes").unwrap();
/// assert_eq!(address, 0);
/// assert_eq!(storage.size().unwrap(), 12);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLogStorage {
    data: RwLock<Vec<u8>>,
    open: bool,
}

impl InMemoryLogStorage {
    /// Creates a new empty in-memory storage. The storage starts closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory storage pre-filled with log bytes.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            open: false,
        }
    }

    /// Returns a copy of the full log contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LogStorage for InMemoryLogStorage {
    fn open(&mut self) -> StorageResult<()> {
        if self.open {
            return Err(StorageError::AlreadyOpen);
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn append(&mut self, block: &[u8]) -> StorageResult<u64> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        let mut data = self.data.write();
        let address = data.len() as u64;
        data.extend_from_slice(block);
        Ok(address)
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> StorageResult<usize> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        let data = self.data.read();
        let size = data.len() as u64;
        if address > size {
            return Err(StorageError::InvalidAddress { address, size });
        }
        let start = address as usize;
        let available = data.len() - start;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        Ok(())
    }

    fn truncate(&mut self, address: u64) -> StorageResult<()> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        let mut data = self.data.write();
        let size = data.len() as u64;
        if address > size {
            return Err(StorageError::InvalidAddress { address, size });
        }
        data.truncate(address as usize);
        Ok(())
    }

    fn first_block_address(&self) -> u64 {
        0
    }

    fn size(&self) -> StorageResult<u64> {
        if !self.open {
            return Err(StorageError::NotOpen);
        }
        Ok(self.data.read().len() as u64)
    }
}
