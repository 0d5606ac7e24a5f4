//! Property tests over randomly generated record batches.

use logstream_core::{
    CommittedFramesFilter, FilterVerdict, LogStream, LogStreamConfig, LoggedRecord,
};
use logstream_testkit::prelude::*;
use proptest::prelude::*;

fn encode_batch(records: &[LoggedRecord]) -> Vec<u8> {
    records
        .iter()
        .flat_map(|record| record.encode().expect("generated record encodes"))
        .collect()
}

proptest! {
    /// The committed filter passes exactly the prefix of frames at or below
    /// the commit position, regardless of record shapes.
    #[test]
    fn committed_filter_passes_exactly_the_committed_prefix(
        records in record_batch_strategy(12),
        commit_offset in 0u64..100,
    ) {
        let buf = encode_batch(&records);
        let commit = records[0].position.saturating_add(commit_offset);

        // Encoded frames are already padded to their storage slot size.
        let expected: usize = records
            .iter()
            .take_while(|record| record.position <= commit)
            .map(|record| record.encode().unwrap().len())
            .sum();

        let mut filter = CommittedFramesFilter::new();
        let verdict = filter.apply(&buf, buf.len(), buf.len(), commit).unwrap();
        prop_assert_eq!(verdict, FilterVerdict::Available(expected));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Every committed record of a random batch ends up indexed, and block
    /// address lookups are monotone in position.
    #[test]
    fn every_committed_record_is_indexed(records in record_batch_strategy(8)) {
        let stream = LogStream::builder("property")
            .config(LogStreamConfig::new().index_block_size(1).deviation(0.0))
            .build();
        stream.open().unwrap();

        for record in &records {
            stream.publish(record).unwrap();
        }
        let last = records.last().unwrap().position;
        stream.commit_position().advance_to(last);

        wait_until(|| stream.indexed_block_count() == records.len());

        let mut previous = None;
        for record in &records {
            let address = stream.lookup_block_address(record.position);
            if let Some(previous) = previous {
                prop_assert!(address > previous);
            }
            previous = Some(address);
        }

        stream.close();
    }
}
