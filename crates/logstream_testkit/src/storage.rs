//! Fault-injecting log storage.

use logstream_storage::{InMemoryLogStorage, LogStorage, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Remote control for a [`FailingStorage`] that moved into a stream.
#[derive(Debug, Clone)]
pub struct FailureControl {
    fail_appends: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl FailureControl {
    /// Makes every subsequent append fail until called again with `false`.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Release);
    }

    /// Makes every subsequent read fail until called again with `false`.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }
}

/// In-memory log storage whose appends and reads can be failed on demand.
///
/// Truncation and lifecycle calls always succeed; appends and reads are
/// gated separately, matching the failure modes the appender and indexer
/// have to survive.
#[derive(Debug)]
pub struct FailingStorage {
    inner: InMemoryLogStorage,
    fail_appends: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl FailingStorage {
    /// Creates a storage together with its failure control.
    #[must_use]
    pub fn controlled() -> (Self, FailureControl) {
        let fail_appends = Arc::new(AtomicBool::new(false));
        let fail_reads = Arc::new(AtomicBool::new(false));
        let storage = Self {
            inner: InMemoryLogStorage::new(),
            fail_appends: Arc::clone(&fail_appends),
            fail_reads: Arc::clone(&fail_reads),
        };
        (
            storage,
            FailureControl {
                fail_appends,
                fail_reads,
            },
        )
    }
}

impl LogStorage for FailingStorage {
    fn open(&mut self) -> StorageResult<()> {
        self.inner.open()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn append(&mut self, block: &[u8]) -> StorageResult<u64> {
        if self.fail_appends.load(Ordering::Acquire) {
            return Err(std::io::Error::other("injected append failure").into());
        }
        self.inner.append(block)
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> StorageResult<usize> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(std::io::Error::other("injected read failure").into());
        }
        self.inner.read(address, buf)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn truncate(&mut self, address: u64) -> StorageResult<()> {
        self.inner.truncate(address)
    }

    fn first_block_address(&self) -> u64 {
        self.inner.first_block_address()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }
}
