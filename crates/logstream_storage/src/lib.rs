//! # logstream storage
//!
//! Append-only log storage trait and implementations for logstream.
//!
//! This crate provides the lowest-level storage abstraction of the engine.
//! Log storages are **opaque byte stores** - they hand out block addresses
//! on append and read raw bytes back, without interpreting frames, blocks,
//! or indexes.
//!
//! ## Design Principles
//!
//! - Storages are simple byte stores (append, read, flush, truncate)
//! - No knowledge of the frame format or the block index
//! - A failed append never leaves a partial block visible
//! - `logstream_core` owns all format interpretation
//!
//! ## Available Storages
//!
//! - [`InMemoryLogStorage`] - for testing and ephemeral streams
//! - [`FileLogStorage`] - for persistent streams using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use logstream_storage::{LogStorage, InMemoryLogStorage};
//!
//! let mut storage = InMemoryLogStorage::new();
//! storage.open().unwrap();
//! let address = storage.append(b"framed bytes").unwrap();
//! let mut buf = [0u8; 12];
//! let n = storage.read(address, &mut buf).unwrap();
//! assert_eq!(&buf[..n], b"framed bytes");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod storage;

pub use error::{StorageError, StorageResult};
pub use file::FileLogStorage;
pub use memory::InMemoryLogStorage;
pub use storage::LogStorage;
