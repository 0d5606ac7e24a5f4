//! # logstream Testkit
//!
//! Test utilities for logstream.
//!
//! This crate provides:
//! - Stream fixtures with automatic cleanup
//! - Fault-injecting log storage
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use logstream_testkit::prelude::*;
//!
//! #[test]
//! fn indexes_after_commit() {
//!     let stream = TestStream::memory("test", 2);
//!     stream.open().unwrap();
//!     stream.publish_all(1..=4);
//!     stream.commit_position().advance_to(4);
//!     stream.wait_for_indexed_blocks(2);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::storage::*;
}

pub use fixtures::*;
pub use generators::*;
pub use storage::*;
