//! File-based log storage for persistent streams.

use crate::error::{StorageError, StorageResult};
use crate::storage::LogStorage;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-backed log storage.
///
/// The log lives in a single append-only file. Data survives process
/// restarts; `flush()` pushes appended bytes down to the OS and syncs them
/// to disk so that a flushed prefix is crash-durable.
///
/// The file handle is only held while the storage is open; `open()` after
/// `close()` re-attaches to the existing log.
///
/// # Example
///
/// ```no_run
/// use logstream_storage::{LogStorage, FileLogStorage};
/// use std::path::Path;
///
/// let mut storage = FileLogStorage::new(Path::new("stream.log"));
/// storage.open().unwrap();
/// let address = storage.append(b"framed bytes").unwrap();
/// storage.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileLogStorage {
    path: PathBuf,
    file: Option<RwLock<File>>,
    size: u64,
}

impl FileLogStorage {
    /// Creates a file log storage for the given path. The storage starts
    /// closed; the file is created on first `open()` if missing.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            size: 0,
        }
    }

    /// Returns the path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> StorageResult<&RwLock<File>> {
        self.file.as_ref().ok_or(StorageError::NotOpen)
    }
}

impl LogStorage for FileLogStorage {
    fn open(&mut self) -> StorageResult<()> {
        if self.file.is_some() {
            return Err(StorageError::AlreadyOpen);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(RwLock::new(file));
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn append(&mut self, block: &[u8]) -> StorageResult<u64> {
        let address = self.size;
        {
            let file = self.file()?;
            let mut file = file.write();
            file.seek(SeekFrom::Start(address))?;
            if let Err(err) = file.write_all(block) {
                // Roll back a torn write so no partial block stays visible.
                let _ = file.set_len(address);
                return Err(err.into());
            }
        }
        self.size += block.len() as u64;
        Ok(address)
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let file = self.file()?;
        if address > self.size {
            return Err(StorageError::InvalidAddress {
                address,
                size: self.size,
            });
        }
        let available = (self.size - address) as usize;
        let n = available.min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        let mut file = file.write();
        file.seek(SeekFrom::Start(address))?;
        file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let file = self.file()?;
        let mut file = file.write();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, address: u64) -> StorageResult<()> {
        if address > self.size {
            return Err(StorageError::InvalidAddress {
                address,
                size: self.size,
            });
        }
        {
            let file = self.file()?;
            let file = file.write();
            file.set_len(address)?;
            file.sync_all()?;
        }
        self.size = address;
        Ok(())
    }

    fn first_block_address(&self) -> u64 {
        0
    }

    fn size(&self) -> StorageResult<u64> {
        self.file()?;
        Ok(self.size)
    }
}
