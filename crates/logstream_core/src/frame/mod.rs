//! Record frame codec.
//!
//! Defines the canonical wire layout of one logged record (a "frame") and a
//! bounds-checked codec over it. All multi-byte fields are little-endian:
//!
//! ```text
//! [type:u16][version:u16][stream_id:u32][length:u32]
//! [position:u64][source_stream_id:u32][source_record_position:i64]
//! [producer_id:u32][key_type:u16][key_length:u16][key:bytes]
//! [metadata_length:u16][metadata:bytes][value:bytes]
//! ```
//!
//! `length` is the exact, unpadded frame length. On storage every frame
//! occupies [`aligned_frame_length`]`(length)` bytes, zero padded, so frame
//! slots always start on a word boundary. The `version` field is the
//! extension point for evolving the layout.

mod filter;
mod record;

pub use filter::{CommittedFramesFilter, CompleteFramesFilter, FilterVerdict};
pub use record::{LoggedRecord, RecordKey, FRAME_CODEC_VERSION, KEY_TYPE_BYTES, KEY_TYPE_U64};

use crate::error::{CoreError, CoreResult};
use crate::types::Position;

/// Word alignment of frame slots on storage.
pub const FRAME_ALIGNMENT: usize = 8;

/// Byte offset of the `length` field within a frame.
pub(crate) const LENGTH_OFFSET: usize = 8;

/// Byte offset of the `position` field within a frame.
pub(crate) const POSITION_OFFSET: usize = 12;

/// Fixed prefix of every frame, up to and including `key_length`.
pub(crate) const FIXED_HEADER_LEN: usize = 40;

/// Smallest possible `length` value: fixed header plus `metadata_length`.
pub const MIN_FRAME_LENGTH: usize = FIXED_HEADER_LEN + 2;

/// Largest `length` value a frame may declare.
///
/// A header declaring more is treated as corruption rather than a request
/// to grow read buffers, which bounds buffer growth on a damaged log.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Number of leading bytes needed to peek `length` and `position`.
pub(crate) const PEEK_LEN: usize = POSITION_OFFSET + 8;

/// Rounds a frame length up to the storage slot size.
#[must_use]
pub const fn aligned_frame_length(length: usize) -> usize {
    (length + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}

/// Reads the `length` field of the frame starting at `offset` in `buf`.
///
/// # Errors
///
/// Returns a corruption error if the header does not fit in `buf` or the
/// declared length falls outside
/// [`MIN_FRAME_LENGTH`]`..=`[`MAX_FRAME_LENGTH`].
pub(crate) fn frame_length(buf: &[u8], offset: usize) -> CoreResult<usize> {
    let end = offset + LENGTH_OFFSET + 4;
    if end > buf.len() {
        return Err(CoreError::frame_corruption(format!(
            "frame header at offset {offset} extends past the buffer"
        )));
    }
    let start = offset + LENGTH_OFFSET;
    let length =
        u32::from_le_bytes([buf[start], buf[start + 1], buf[start + 2], buf[start + 3]]) as usize;
    if length < MIN_FRAME_LENGTH {
        return Err(CoreError::frame_corruption(format!(
            "frame at offset {offset} declares length {length}, below the minimum {MIN_FRAME_LENGTH}"
        )));
    }
    if length > MAX_FRAME_LENGTH {
        return Err(CoreError::frame_corruption(format!(
            "frame at offset {offset} declares length {length}, above the maximum {MAX_FRAME_LENGTH}"
        )));
    }
    Ok(length)
}

/// Reads the `position` field of the frame starting at `offset` in `buf`.
pub(crate) fn frame_position(buf: &[u8], offset: usize) -> CoreResult<Position> {
    let start = offset + POSITION_OFFSET;
    let end = start + 8;
    if end > buf.len() {
        return Err(CoreError::frame_corruption(format!(
            "frame header at offset {offset} extends past the buffer"
        )));
    }
    let bytes: [u8; 8] = buf[start..end]
        .try_into()
        .map_err(|_| CoreError::frame_corruption("invalid position field"))?;
    Ok(Position::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up_to_words() {
        assert_eq!(aligned_frame_length(42), 48);
        assert_eq!(aligned_frame_length(48), 48);
        assert_eq!(aligned_frame_length(49), 56);
        assert_eq!(aligned_frame_length(1), 8);
    }

    #[test]
    fn peeks_reject_short_buffers() {
        let buf = [0u8; 10];
        assert!(frame_length(&buf, 0).is_err());
        assert!(frame_position(&buf, 0).is_err());
    }

    #[test]
    fn length_peek_rejects_out_of_range_values() {
        let mut buf = [0u8; 16];
        buf[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&4u32.to_le_bytes());
        assert!(frame_length(&buf, 0).is_err());
        buf[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(frame_length(&buf, 0).is_err());
    }

    #[test]
    fn peeks_read_encoded_fields() {
        let record = LoggedRecord::new(1, 1, 77).with_value(vec![1, 2, 3]);
        let frame = record.encode().unwrap();
        assert_eq!(frame_position(&frame, 0).unwrap(), 77);
        let length = frame_length(&frame, 0).unwrap();
        assert_eq!(aligned_frame_length(length), frame.len());
    }
}
