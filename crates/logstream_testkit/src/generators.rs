//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and record runs that maintain
//! the stream's ordering invariants.

use logstream_core::{LoggedRecord, Position, RecordKey};
use proptest::prelude::*;

/// Strategy for generating a strictly increasing run of positions.
pub fn position_run_strategy(max_len: usize) -> impl Strategy<Value = Vec<Position>> {
    (
        1u64..1000,
        prop::collection::vec(1u64..50, 1..max_len.max(2)),
    )
        .prop_map(|(start, gaps)| {
            gaps.into_iter()
                .scan(start, |position, gap| {
                    let current = *position;
                    *position += gap;
                    Some(current)
                })
                .collect()
        })
}

/// Strategy for generating record keys of both kinds.
pub fn record_key_strategy() -> impl Strategy<Value = RecordKey> {
    prop_oneof![
        any::<u64>().prop_map(RecordKey::U64),
        prop::collection::vec(any::<u8>(), 1..64).prop_map(RecordKey::Bytes),
    ]
}

/// Strategy for generating a record at `position` with random contents.
pub fn record_strategy(position: Position) -> impl Strategy<Value = LoggedRecord> {
    (
        1u16..100,
        1u32..16,
        record_key_strategy(),
        prop::collection::vec(any::<u8>(), 0..128),
        prop::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(move |(record_type, stream_id, key, metadata, value)| {
            LoggedRecord::new(record_type, stream_id, position)
                .with_key(key)
                .with_metadata(metadata)
                .with_value(value)
        })
}

/// Strategy for generating an ordered batch of random records.
pub fn record_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<LoggedRecord>> {
    position_run_strategy(max_len).prop_flat_map(|positions| {
        positions
            .into_iter()
            .map(record_strategy)
            .collect::<Vec<_>>()
    })
}
