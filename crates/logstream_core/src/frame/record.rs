//! Logged record type and frame (de)serialization.

use super::{aligned_frame_length, FIXED_HEADER_LEN, MAX_FRAME_LENGTH, MIN_FRAME_LENGTH};
use crate::error::{CoreError, CoreResult};
use crate::types::{Position, NO_SOURCE_RECORD_POSITION, NO_SOURCE_STREAM_ID};

/// Current frame codec version, written into every frame.
pub const FRAME_CODEC_VERSION: u16 = 1;

/// Key type tag for a fixed-width 64-bit integer key.
pub const KEY_TYPE_U64: u16 = 1;

/// Key type tag for a variable-length byte key.
pub const KEY_TYPE_BYTES: u16 = 2;

/// The typed key of a logged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    /// A fixed-width 64-bit integer key.
    U64(u64),
    /// A variable-length byte key.
    Bytes(Vec<u8>),
}

impl RecordKey {
    fn type_tag(&self) -> u16 {
        match self {
            Self::U64(_) => KEY_TYPE_U64,
            Self::Bytes(_) => KEY_TYPE_BYTES,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::U64(_) => 8,
            Self::Bytes(bytes) => bytes.len(),
        }
    }
}

impl Default for RecordKey {
    fn default() -> Self {
        Self::U64(0)
    }
}

/// One length-delimited, positioned entry in the log.
///
/// A record is immutable once appended; its `position` strictly increases
/// within a stream. Metadata and value are opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRecord {
    /// Application-defined record type.
    pub record_type: u16,
    /// Frame codec version.
    pub version: u16,
    /// Id of the owning stream.
    pub stream_id: u32,
    /// Global monotonically increasing position within the stream.
    pub position: Position,
    /// Stream id of the causal back-reference, [`NO_SOURCE_STREAM_ID`] if none.
    pub source_stream_id: u32,
    /// Position of the causal back-reference,
    /// [`NO_SOURCE_RECORD_POSITION`] if none.
    pub source_record_position: i64,
    /// Id of the producer that published the record.
    pub producer_id: u32,
    /// Typed record key.
    pub key: RecordKey,
    /// Opaque metadata blob.
    pub metadata: Vec<u8>,
    /// Opaque value payload.
    pub value: Vec<u8>,
}

impl LoggedRecord {
    /// Creates a record with empty key, metadata, and value.
    #[must_use]
    pub fn new(record_type: u16, stream_id: u32, position: Position) -> Self {
        Self {
            record_type,
            version: FRAME_CODEC_VERSION,
            stream_id,
            position,
            source_stream_id: NO_SOURCE_STREAM_ID,
            source_record_position: NO_SOURCE_RECORD_POSITION,
            producer_id: 0,
            key: RecordKey::default(),
            metadata: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Sets the record key.
    #[must_use]
    pub fn with_key(mut self, key: RecordKey) -> Self {
        self.key = key;
        self
    }

    /// Sets the opaque metadata blob.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the opaque value payload.
    #[must_use]
    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = value;
        self
    }

    /// Sets the producer id.
    #[must_use]
    pub fn with_producer(mut self, producer_id: u32) -> Self {
        self.producer_id = producer_id;
        self
    }

    /// Sets the causal back-reference.
    #[must_use]
    pub fn with_source(mut self, stream_id: u32, position: i64) -> Self {
        self.source_stream_id = stream_id;
        self.source_record_position = position;
        self
    }

    /// Returns the unpadded frame length of this record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] if key or metadata exceed their
    /// 16-bit length fields or the total exceeds [`MAX_FRAME_LENGTH`].
    pub fn frame_length(&self) -> CoreResult<usize> {
        let key_len = self.key.len();
        if key_len > usize::from(u16::MAX) {
            return Err(CoreError::record_too_large(format!(
                "key is {key_len} bytes, limit is {}",
                u16::MAX
            )));
        }
        if self.metadata.len() > usize::from(u16::MAX) {
            return Err(CoreError::record_too_large(format!(
                "metadata is {} bytes, limit is {}",
                self.metadata.len(),
                u16::MAX
            )));
        }
        let length = MIN_FRAME_LENGTH + key_len + self.metadata.len() + self.value.len();
        if length > MAX_FRAME_LENGTH {
            return Err(CoreError::record_too_large(format!(
                "frame is {length} bytes, limit is {MAX_FRAME_LENGTH}"
            )));
        }
        Ok(length)
    }

    /// Encodes the record into one word-aligned, zero-padded frame.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] if a length field would
    /// overflow.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let length = self.frame_length()?;
        let key_len = self.key.len() as u16;
        let metadata_len = self.metadata.len() as u16;

        let mut buf = Vec::with_capacity(aligned_frame_length(length));
        buf.extend_from_slice(&self.record_type.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.stream_id.to_le_bytes());
        buf.extend_from_slice(&(length as u32).to_le_bytes());
        buf.extend_from_slice(&self.position.to_le_bytes());
        buf.extend_from_slice(&self.source_stream_id.to_le_bytes());
        buf.extend_from_slice(&self.source_record_position.to_le_bytes());
        buf.extend_from_slice(&self.producer_id.to_le_bytes());
        buf.extend_from_slice(&self.key.type_tag().to_le_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        match &self.key {
            RecordKey::U64(key) => buf.extend_from_slice(&key.to_le_bytes()),
            RecordKey::Bytes(bytes) => buf.extend_from_slice(bytes),
        }
        buf.extend_from_slice(&metadata_len.to_le_bytes());
        buf.extend_from_slice(&self.metadata);
        buf.extend_from_slice(&self.value);
        debug_assert_eq!(buf.len(), length);

        buf.resize(aligned_frame_length(length), 0);
        Ok(buf)
    }

    /// Decodes the frame starting at the beginning of `buf`.
    ///
    /// `buf` must contain at least the frame's declared length; trailing
    /// alignment padding and subsequent frames are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FrameCorruption`] if any length or offset does
    /// not validate, the codec version is unsupported, or the key type is
    /// unknown. No byte outside `buf` is ever read.
    pub fn decode(buf: &[u8]) -> CoreResult<Self> {
        let length = super::frame_length(buf, 0)?;
        if length > buf.len() {
            return Err(CoreError::frame_corruption(format!(
                "frame declares length {length} but only {} bytes are available",
                buf.len()
            )));
        }

        let read_u16 = |offset: usize| u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        let read_u32 = |offset: usize| {
            u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
        };

        let record_type = read_u16(0);
        let version = read_u16(2);
        if version > FRAME_CODEC_VERSION {
            return Err(CoreError::frame_corruption(format!(
                "unsupported frame codec version {version}"
            )));
        }
        let stream_id = read_u32(4);
        let position = super::frame_position(buf, 0)?;
        let source_stream_id = read_u32(20);
        let source_record_position = i64::from_le_bytes(
            buf[24..32]
                .try_into()
                .map_err(|_| CoreError::frame_corruption("invalid source position field"))?,
        );
        let producer_id = read_u32(32);
        let key_type = read_u16(36);
        let key_len = usize::from(read_u16(38));

        let metadata_len_offset = FIXED_HEADER_LEN + key_len;
        if metadata_len_offset + 2 > length {
            return Err(CoreError::frame_corruption(format!(
                "key of {key_len} bytes does not fit in frame of length {length}"
            )));
        }
        let key = match key_type {
            KEY_TYPE_U64 => {
                if key_len != 8 {
                    return Err(CoreError::frame_corruption(format!(
                        "u64 key must be 8 bytes, got {key_len}"
                    )));
                }
                let bytes: [u8; 8] = buf[FIXED_HEADER_LEN..FIXED_HEADER_LEN + 8]
                    .try_into()
                    .map_err(|_| CoreError::frame_corruption("invalid u64 key"))?;
                RecordKey::U64(u64::from_le_bytes(bytes))
            }
            KEY_TYPE_BYTES => {
                RecordKey::Bytes(buf[FIXED_HEADER_LEN..FIXED_HEADER_LEN + key_len].to_vec())
            }
            other => {
                return Err(CoreError::frame_corruption(format!(
                    "unknown key type {other}"
                )));
            }
        };

        let metadata_len = usize::from(read_u16(metadata_len_offset));
        let metadata_offset = metadata_len_offset + 2;
        if metadata_offset + metadata_len > length {
            return Err(CoreError::frame_corruption(format!(
                "metadata of {metadata_len} bytes does not fit in frame of length {length}"
            )));
        }
        let metadata = buf[metadata_offset..metadata_offset + metadata_len].to_vec();
        let value = buf[metadata_offset + metadata_len..length].to_vec();

        Ok(Self {
            record_type,
            version,
            stream_id,
            position,
            source_stream_id,
            source_record_position,
            producer_id,
            key,
            metadata,
            value,
        })
    }
}
