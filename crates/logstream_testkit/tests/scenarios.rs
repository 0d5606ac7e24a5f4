//! End-to-end stream scenarios exercising the appender and indexer
//! together through the public facade.

use logstream_core::{CoreError, LogStream};
use logstream_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn committed_records_are_appended_and_indexed() {
    let stream = TestStream::memory("happy-path", 2);
    stream.open().unwrap();

    stream.publish_all(1..=6);
    stream.commit_position().advance_to(6);
    stream.wait_for_indexed_blocks(3);

    // Block addresses resolve in position order.
    let first = stream.lookup_block_address(1);
    let middle = stream.lookup_block_address(3);
    let last = stream.lookup_block_address(6);
    assert!(first < middle);
    assert!(middle < last);
    // A position inside a block resolves to that block's address.
    assert_eq!(stream.lookup_block_address(2), first);
    assert_eq!(stream.lookup_block_address(4), middle);

    stream.close();
}

#[test]
fn uncommitted_records_are_never_indexed() {
    let stream = TestStream::memory("commit-gate", 2);
    stream.open().unwrap();

    stream.publish_all(1..=4);
    stream.wait_for_drain();
    assert_eq!(stream.indexed_block_count(), 0);

    // Partial commit indexes only the covered prefix.
    stream.commit_position().advance_to(2);
    stream.wait_for_indexed_blocks(1);

    stream.commit_position().advance_to(4);
    stream.wait_for_indexed_blocks(2);
}

#[test]
fn append_failure_notifies_listeners_and_recovery_resumes() {
    let (storage, control) = FailingStorage::controlled();
    let stream = LogStream::builder("failing")
        .config(test_config(1))
        .storage(Box::new(storage))
        .build();
    let listener = Arc::new(RecordingListener::new());
    stream.register_failure_listener(listener.clone());
    stream.open().unwrap();

    // A healthy prefix lands on storage.
    stream.publish(&test_record(1)).unwrap();
    stream.publish(&test_record(2)).unwrap();
    let writer = stream.writer();
    wait_until(|| writer.is_empty());
    assert!(!stream.is_failed());

    // The next block fails; listeners learn its first position.
    control.fail_appends(true);
    stream.publish(&test_record(3)).unwrap();
    stream.publish(&test_record(4)).unwrap();
    wait_until(|| stream.is_failed());
    wait_until(|| !listener.failed_positions().is_empty());
    assert_eq!(listener.failed_positions(), vec![3]);

    // While failed, published records are discarded, not retried.
    stream.publish(&test_record(5)).unwrap();
    wait_until(|| writer.is_empty());

    control.fail_appends(false);
    stream.recover();
    wait_until(|| !stream.is_failed());
    assert_eq!(listener.recovered_count(), 1);
    assert_eq!(listener.failed_positions().len(), 1);

    // Appending resumes; the discarded positions leave a gap.
    stream.publish(&test_record(6)).unwrap();
    stream.commit_position().advance_to(6);
    wait_until(|| stream.indexed_block_count() == 3);

    stream.close();
}

#[test]
fn removed_listener_misses_later_failures() {
    let (storage, control) = FailingStorage::controlled();
    let stream = LogStream::builder("listener-removal")
        .config(test_config(1))
        .storage(Box::new(storage))
        .build();
    let listener = Arc::new(RecordingListener::new());
    let id = stream.register_failure_listener(listener.clone());
    stream.open().unwrap();

    assert!(stream.remove_failure_listener(id));
    control.fail_appends(true);
    stream.publish(&test_record(1)).unwrap();
    wait_until(|| stream.is_failed());

    assert!(listener.failed_positions().is_empty());
}

#[test]
fn transient_read_failures_pause_indexing_until_reads_heal() {
    let (storage, control) = FailingStorage::controlled();
    let stream = LogStream::builder("flaky-reads")
        .config(test_config(1))
        .storage(Box::new(storage))
        .build();
    stream.open().unwrap();

    stream.publish(&test_record(1)).unwrap();
    stream.commit_position().advance_to(1);
    wait_until(|| stream.indexed_block_count() == 1);

    // With reads failing, committed records land on storage but stay
    // out of the index.
    control.fail_reads(true);
    stream.publish(&test_record(2)).unwrap();
    stream.commit_position().advance_to(2);
    let writer = stream.writer();
    wait_until(|| writer.is_empty());
    assert_eq!(stream.indexed_block_count(), 1);

    // Once reads heal the indexer catches up on its own.
    control.fail_reads(false);
    wait_until(|| stream.indexed_block_count() == 2);

    stream.close();
}

#[test]
fn truncated_suffix_can_be_rewritten() {
    let stream = TestStream::memory("truncate-rewrite", 2);
    stream.open().unwrap();

    stream.publish_all(1..=4);
    stream.commit_position().advance_to(2);
    stream.wait_for_drain();
    stream.wait_for_indexed_blocks(1);

    futures::executor::block_on(stream.truncate(3)).unwrap();

    // The truncated region is rewritten with different records.
    stream.publish_all([7, 8]);
    stream.commit_position().advance_to(8);
    stream.wait_for_indexed_blocks(2);

    let first = stream.lookup_block_address(1);
    assert_eq!(stream.lookup_block_address(2), first);
    assert!(stream.lookup_block_address(7) > first);
}

#[test]
fn truncation_below_the_commit_position_is_rejected() {
    let stream = TestStream::memory("truncate-guard", 2);
    stream.open().unwrap();

    stream.publish_all(1..=2);
    stream.commit_position().advance_to(2);
    stream.wait_for_drain();

    let result = futures::executor::block_on(stream.truncate(2));
    assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
}

#[test]
fn restart_recovers_the_index_from_a_snapshot() {
    let stream = TestStream::file("restart", 2);
    stream.open().unwrap();

    stream.publish_all(1..=4);
    stream.commit_position().advance_to(4);
    stream.wait_for_indexed_blocks(2);
    stream.close();

    let restarted = stream.reopen_file("restart", 2);
    restarted.open().unwrap();
    // The index is available before any new commit, straight from the
    // snapshot.
    assert_eq!(restarted.indexed_block_count(), 2);
    let recovered_first = restarted.lookup_block_address(1);
    assert!(restarted.lookup_block_address(3) > recovered_first);

    // The stream keeps growing after the restart.
    restarted.publish_all([5, 6]);
    restarted.commit_position().advance_to(6);
    restarted.wait_for_indexed_blocks(3);

    restarted.close();
}

#[test]
fn restart_without_snapshots_rescans_the_log() {
    let stream = TestStream::file("rescan", 2);
    stream.open().unwrap();

    stream.publish_all(1..=4);
    stream.commit_position().advance_to(4);
    stream.wait_for_drain();
    stream.close();

    // Wipe the snapshots, keeping the log.
    let temp_dir = stream.temp_dir.as_ref().expect("file-backed stream");
    std::fs::remove_dir_all(temp_dir.path().join("snapshots")).ok();

    let restarted = stream.reopen_file("rescan", 2);
    restarted.open().unwrap();
    assert_eq!(restarted.indexed_block_count(), 0);

    restarted.commit_position().advance_to(4);
    restarted.wait_for_indexed_blocks(2);
    restarted.close();
}
