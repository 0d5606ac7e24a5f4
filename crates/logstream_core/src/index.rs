//! Sparse block index.
//!
//! Maps record positions to block addresses so a reader can seek close to a
//! position without scanning the whole log.

use crate::error::{CoreError, CoreResult};
use crate::types::{BlockAddress, Position};

/// Magic bytes identifying a serialized block index.
pub const INDEX_MAGIC: [u8; 4] = *b"LSIX";

/// Current block index serialization version.
pub const INDEX_VERSION: u16 = 1;

/// Header size of a serialized index: magic (4) + version (2) + count (4).
const HEADER_SIZE: usize = 10;

/// CRC size.
const CRC_SIZE: usize = 4;

/// One block index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    /// Position of the first record in the block.
    pub first_record_position: Position,
    /// Address of the block in log storage.
    pub block_address: BlockAddress,
}

/// Sorted position-to-address index over the blocks of one log stream.
///
/// Entries are strictly increasing in both position and address. The index
/// is append-only except for [`BlockIndex::truncate`], which removes a
/// contiguous suffix; no entry is ever inserted out of order or rewritten in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
}

impl BlockIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of indexed blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the indexed entries in order.
    #[must_use]
    pub fn entries(&self) -> &[BlockIndexEntry] {
        &self.entries
    }

    /// Returns the address of the block with the greatest indexed
    /// `first_record_position <= position`, or `None` if no entry qualifies.
    ///
    /// Callers substitute the log's first block address for `None`, giving
    /// the floor semantics of the stream API.
    #[must_use]
    pub fn lookup(&self, position: Position) -> Option<BlockAddress> {
        let idx = self
            .entries
            .partition_point(|entry| entry.first_record_position <= position);
        idx.checked_sub(1).map(|i| self.entries[i].block_address)
    }

    /// Appends an entry for the block at `address` starting at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position` or `address` is not strictly greater than the
    /// last entry. An out-of-order append is a programming error in the
    /// indexer, not a recoverable condition.
    pub fn append(&mut self, position: Position, address: BlockAddress) {
        if let Some(last) = self.entries.last() {
            assert!(
                position > last.first_record_position && address > last.block_address,
                "out-of-order block index append: ({position}, {address}) after ({}, {})",
                last.first_record_position,
                last.block_address,
            );
        }
        self.entries.push(BlockIndexEntry {
            first_record_position: position,
            block_address: address,
        });
    }

    /// Removes all entries with `first_record_position >= position`.
    pub fn truncate(&mut self, position: Position) {
        let keep = self
            .entries
            .partition_point(|entry| entry.first_record_position < position);
        self.entries.truncate(keep);
    }

    /// Serializes the full entry sequence.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.entries.len() * 16 + CRC_SIZE);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.first_record_position.to_le_bytes());
            buf.extend_from_slice(&entry.block_address.to_le_bytes());
        }
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserializes an index previously produced by [`BlockIndex::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SnapshotCorruption`] if magic, version, entry
    /// count, ordering, or checksum do not validate.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(CoreError::snapshot_corruption("serialized index too short"));
        }
        if data[0..4] != INDEX_MAGIC {
            return Err(CoreError::snapshot_corruption("invalid index magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > INDEX_VERSION {
            return Err(CoreError::snapshot_corruption(format!(
                "unsupported index version {version}"
            )));
        }
        let count = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let expected_len = HEADER_SIZE + count * 16 + CRC_SIZE;
        if data.len() != expected_len {
            return Err(CoreError::snapshot_corruption(format!(
                "serialized index of {} bytes does not match entry count {count}",
                data.len()
            )));
        }

        let crc_offset = data.len() - CRC_SIZE;
        let stored_crc = u32::from_le_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);
        let computed_crc = compute_crc32(&data[..crc_offset]);
        if stored_crc != computed_crc {
            return Err(CoreError::snapshot_corruption(format!(
                "index checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
            )));
        }

        let mut index = Self::new();
        let mut cursor = HEADER_SIZE;
        for _ in 0..count {
            let position = u64::from_le_bytes(
                data[cursor..cursor + 8]
                    .try_into()
                    .map_err(|_| CoreError::snapshot_corruption("invalid entry position"))?,
            );
            let address = u64::from_le_bytes(
                data[cursor + 8..cursor + 16]
                    .try_into()
                    .map_err(|_| CoreError::snapshot_corruption("invalid entry address"))?,
            );
            cursor += 16;
            if let Some(last) = index.entries.last() {
                if position <= last.first_record_position || address <= last.block_address {
                    return Err(CoreError::snapshot_corruption(format!(
                        "out-of-order entry ({position}, {address}) in serialized index"
                    )));
                }
            }
            index.entries.push(BlockIndexEntry {
                first_record_position: position,
                block_address: address,
            });
        }
        Ok(index)
    }
}

/// Computes a CRC32 checksum (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
