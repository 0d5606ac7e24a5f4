//! Read-result filters.
//!
//! A storage read returns an arbitrary byte count that may end in the middle
//! of a frame. The filters trim such a read down to a prefix that is an
//! exact multiple of whole frame slots, so a frame length is never split
//! across reads. They are pure and retryable; the only state they keep are
//! their own small cursors.

use super::{aligned_frame_length, frame_length, frame_position, MIN_FRAME_LENGTH, PEEK_LEN};
use crate::error::CoreResult;
use crate::types::Position;

/// Outcome of applying a filter to one storage read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The first `usize` bytes of the read are usable whole frames.
    ///
    /// `Available(0)` means no whole (or no committed) frame is present yet;
    /// the caller retries on its next scheduling turn.
    Available(usize),

    /// A single frame is larger than the whole read buffer; the caller must
    /// grow the buffer and retry.
    InsufficientCapacity,
}

/// Trims a read to complete frames only.
///
/// Used by scans that may run ahead of the commit position, e.g. locating
/// a truncation point.
#[derive(Debug, Default)]
pub struct CompleteFramesFilter {
    last_frame_position: Option<Position>,
}

impl CompleteFramesFilter {
    /// Creates a filter with an empty cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the last complete frame seen across all applications.
    #[must_use]
    pub fn last_frame_position(&self) -> Option<Position> {
        self.last_frame_position
    }

    /// Trims `buf[..bytes_read]` to whole frames.
    ///
    /// `capacity` is the total size of the read buffer; it decides whether a
    /// frame that does not fit is merely incomplete (retry the read) or can
    /// never fit (grow the buffer).
    ///
    /// # Errors
    ///
    /// Returns a corruption error if a frame header declares an impossible
    /// length.
    pub fn apply(
        &mut self,
        buf: &[u8],
        bytes_read: usize,
        capacity: usize,
    ) -> CoreResult<FilterVerdict> {
        scan_frames(buf, bytes_read, capacity, None, &mut self.last_frame_position)
            .map(|outcome| outcome.verdict)
    }
}

/// Trims a read to complete frames at or below a commit position.
///
/// Identical to [`CompleteFramesFilter`] but additionally stops before the
/// first frame whose position exceeds the supplied commit position, even if
/// more complete frames follow in the buffer. Used by the indexer, which
/// never indexes uncommitted records.
#[derive(Debug, Default)]
pub struct CommittedFramesFilter {
    last_frame_position: Option<Position>,
    lowest_pending_position: Option<Position>,
}

impl CommittedFramesFilter {
    /// Creates a filter with empty cursors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the last committed frame seen across all applications.
    #[must_use]
    pub fn last_frame_position(&self) -> Option<Position> {
        self.last_frame_position
    }

    /// Position of the first frame held back by the commit gate during the
    /// most recent application, used for retry scheduling.
    #[must_use]
    pub fn lowest_pending_position(&self) -> Option<Position> {
        self.lowest_pending_position
    }

    /// Trims `buf[..bytes_read]` to whole frames with positions at or below
    /// `commit_position`.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if a frame header declares an impossible
    /// length.
    pub fn apply(
        &mut self,
        buf: &[u8],
        bytes_read: usize,
        capacity: usize,
        commit_position: Position,
    ) -> CoreResult<FilterVerdict> {
        let outcome = scan_frames(
            buf,
            bytes_read,
            capacity,
            Some(commit_position),
            &mut self.last_frame_position,
        )?;
        self.lowest_pending_position = outcome.pending_position;
        Ok(outcome.verdict)
    }
}

struct ScanOutcome {
    verdict: FilterVerdict,
    pending_position: Option<Position>,
}

fn scan_frames(
    buf: &[u8],
    bytes_read: usize,
    capacity: usize,
    commit_position: Option<Position>,
    last_frame_position: &mut Option<Position>,
) -> CoreResult<ScanOutcome> {
    if capacity < aligned_frame_length(MIN_FRAME_LENGTH) {
        return Ok(ScanOutcome {
            verdict: FilterVerdict::InsufficientCapacity,
            pending_position: None,
        });
    }

    let mut offset = 0;
    let mut pending_position = None;
    while offset < bytes_read {
        if bytes_read - offset < PEEK_LEN {
            // Not even the header made it into this read.
            break;
        }
        let length = frame_length(buf, offset)?;
        let aligned = aligned_frame_length(length);
        if aligned > capacity {
            return Ok(ScanOutcome {
                verdict: FilterVerdict::InsufficientCapacity,
                pending_position: None,
            });
        }
        if offset + aligned > bytes_read {
            break;
        }
        let position = frame_position(buf, offset)?;
        if let Some(commit) = commit_position {
            if position > commit {
                pending_position = Some(position);
                break;
            }
        }
        *last_frame_position = Some(position);
        offset += aligned;
    }

    Ok(ScanOutcome {
        verdict: FilterVerdict::Available(offset),
        pending_position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LoggedRecord;
    use proptest::prelude::*;

    fn frames(positions: &[Position]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &position in positions {
            let record = LoggedRecord::new(1, 1, position).with_value(vec![0xAB; 10]);
            buf.extend_from_slice(&record.encode().unwrap());
        }
        buf
    }

    #[test]
    fn trims_nothing_for_whole_frames() {
        let buf = frames(&[1, 2, 3]);
        let mut filter = CompleteFramesFilter::new();
        let verdict = filter.apply(&buf, buf.len(), buf.len()).unwrap();
        assert_eq!(verdict, FilterVerdict::Available(buf.len()));
        assert_eq!(filter.last_frame_position(), Some(3));
    }

    #[test]
    fn trims_partial_tail_frame() {
        let whole = frames(&[1, 2]);
        let frame_len = whole.len() / 2;
        let mut buf = whole.clone();
        buf.truncate(whole.len() - 4);

        let mut filter = CompleteFramesFilter::new();
        let capacity = whole.len();
        let verdict = filter.apply(&buf, buf.len(), capacity).unwrap();
        assert_eq!(verdict, FilterVerdict::Available(frame_len));
        assert_eq!(filter.last_frame_position(), Some(1));
    }

    #[test]
    fn empty_read_yields_zero() {
        let mut filter = CompleteFramesFilter::new();
        let verdict = filter.apply(&[], 0, 1024).unwrap();
        assert_eq!(verdict, FilterVerdict::Available(0));
        assert_eq!(filter.last_frame_position(), None);
    }

    #[test]
    fn oversized_frame_signals_insufficient_capacity() {
        let record = LoggedRecord::new(1, 1, 1).with_value(vec![0; 500]);
        let buf = record.encode().unwrap();

        let mut filter = CompleteFramesFilter::new();
        // Only the header of the big frame fits into a 64-byte buffer.
        let verdict = filter.apply(&buf[..64], 64, 64).unwrap();
        assert_eq!(verdict, FilterVerdict::InsufficientCapacity);
    }

    #[test]
    fn oversized_frame_behind_complete_ones_signals_capacity() {
        let mut buf = frames(&[1]);
        let small_len = buf.len();
        let big = LoggedRecord::new(1, 1, 2)
            .with_value(vec![0; 4096])
            .encode()
            .unwrap();
        buf.extend_from_slice(&big);

        let capacity = small_len + 256;
        let mut filter = CompleteFramesFilter::new();
        let verdict = filter.apply(&buf[..capacity], capacity, capacity).unwrap();
        assert_eq!(verdict, FilterVerdict::InsufficientCapacity);
    }

    #[test]
    fn tiny_capacity_signals_insufficient_capacity() {
        let mut filter = CompleteFramesFilter::new();
        let verdict = filter.apply(&[0u8; 16], 16, 16).unwrap();
        assert_eq!(verdict, FilterVerdict::InsufficientCapacity);
    }

    #[test]
    fn corrupt_length_field_is_an_error() {
        let mut buf = frames(&[1]);
        // Declare a length below the minimum frame length.
        buf[8..12].copy_from_slice(&4u32.to_le_bytes());
        let mut filter = CompleteFramesFilter::new();
        assert!(filter.apply(&buf, buf.len(), buf.len()).is_err());
    }

    #[test]
    fn absurd_length_field_is_corruption_not_capacity() {
        let mut buf = frames(&[1]);
        // A torn or corrupted header must not drive buffer growth.
        buf[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut filter = CompleteFramesFilter::new();
        assert!(filter.apply(&buf, buf.len(), buf.len()).is_err());
    }

    #[test]
    fn committed_filter_stops_at_commit_position() {
        let buf = frames(&[1, 2, 3]);
        let frame_len = buf.len() / 3;

        let mut filter = CommittedFramesFilter::new();
        let verdict = filter.apply(&buf, buf.len(), buf.len(), 1).unwrap();
        assert_eq!(verdict, FilterVerdict::Available(frame_len));
        assert_eq!(filter.last_frame_position(), Some(1));
        assert_eq!(filter.lowest_pending_position(), Some(2));
    }

    #[test]
    fn committed_filter_passes_fully_committed_reads() {
        let buf = frames(&[1, 2, 3]);
        let mut filter = CommittedFramesFilter::new();
        let verdict = filter.apply(&buf, buf.len(), buf.len(), 10).unwrap();
        assert_eq!(verdict, FilterVerdict::Available(buf.len()));
        assert_eq!(filter.lowest_pending_position(), None);
    }

    #[test]
    fn committed_filter_clears_pending_cursor_between_reads() {
        let buf = frames(&[1, 2]);
        let mut filter = CommittedFramesFilter::new();
        filter.apply(&buf, buf.len(), buf.len(), 1).unwrap();
        assert_eq!(filter.lowest_pending_position(), Some(2));

        filter.apply(&buf, buf.len(), buf.len(), 5).unwrap();
        assert_eq!(filter.lowest_pending_position(), None);
        assert_eq!(filter.last_frame_position(), Some(2));
    }

    proptest! {
        #[test]
        fn filtered_length_is_frame_aligned(
            count in 1usize..20,
            cut in 0usize..200,
            commit in 0u64..30,
        ) {
            let positions: Vec<Position> = (1..=count as u64).collect();
            let buf = frames(&positions);
            let bytes_read = buf.len().saturating_sub(cut).min(buf.len());

            let mut complete = CompleteFramesFilter::new();
            let capacity = buf.len().max(64);
            if let FilterVerdict::Available(n) =
                complete.apply(&buf, bytes_read, capacity).unwrap()
            {
                prop_assert!(n <= bytes_read);
                prop_assert_eq!(n % crate::frame::FRAME_ALIGNMENT, 0);
            }

            let mut committed = CommittedFramesFilter::new();
            if let FilterVerdict::Available(n) =
                committed.apply(&buf, bytes_read, capacity, commit).unwrap()
            {
                prop_assert!(n <= bytes_read);
                prop_assert_eq!(n % crate::frame::FRAME_ALIGNMENT, 0);
                if let Some(last) = committed.last_frame_position() {
                    prop_assert!(last <= commit);
                }
            }
        }
    }
}
