//! Failure listener registry.

use crate::types::Position;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer of appender failures and recoveries.
///
/// Listeners are invoked from the stream's worker thread. A panicking
/// listener is caught and logged; it never poisons the appender.
pub trait FailureListener: Send + Sync {
    /// Called once per append failure with the position of the first record
    /// in the failed block.
    fn on_failed(&self, first_failed_position: Position);

    /// Called when the stream is explicitly recovered.
    fn on_recovered(&self);
}

/// Handle for removing a registered failure listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Shared set of failure listeners.
///
/// Registration may happen from any thread; notification happens from the
/// appender's thread.
#[derive(Clone, Default)]
pub(crate) struct FailureListeners {
    inner: Arc<Mutex<Vec<(ListenerId, Arc<dyn FailureListener>)>>>,
    next_id: Arc<AtomicU64>,
}

impl FailureListeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, listener: Arc<dyn FailureListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub(crate) fn notify_failed(&self, first_failed_position: Position) {
        for listener in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_failed(first_failed_position)))
                .is_err()
            {
                tracing::warn!(first_failed_position, "failure listener panicked in on_failed");
            }
        }
    }

    pub(crate) fn notify_recovered(&self) {
        for listener in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_recovered())).is_err() {
                tracing::warn!("failure listener panicked in on_recovered");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn FailureListener>> {
        self.inner
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recording {
        failed: Mutex<Vec<Position>>,
        recovered: AtomicUsize,
    }

    impl FailureListener for Recording {
        fn on_failed(&self, first_failed_position: Position) {
            self.failed.lock().push(first_failed_position);
        }

        fn on_recovered(&self) {
            self.recovered.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Panicking;

    impl FailureListener for Panicking {
        fn on_failed(&self, _: Position) {
            panic!("listener bug");
        }

        fn on_recovered(&self) {
            panic!("listener bug");
        }
    }

    #[test]
    fn notifies_all_listeners() {
        let listeners = FailureListeners::new();
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());
        listeners.register(first.clone());
        listeners.register(second.clone());

        listeners.notify_failed(42);
        listeners.notify_recovered();

        assert_eq!(*first.failed.lock(), vec![42]);
        assert_eq!(*second.failed.lock(), vec![42]);
        assert_eq!(first.recovered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let listeners = FailureListeners::new();
        let listener = Arc::new(Recording::default());
        let id = listeners.register(listener.clone());

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));

        listeners.notify_failed(1);
        assert!(listener.failed.lock().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let listeners = FailureListeners::new();
        let recording = Arc::new(Recording::default());
        listeners.register(Arc::new(Panicking));
        listeners.register(recording.clone());

        listeners.notify_failed(7);
        listeners.notify_recovered();

        assert_eq!(*recording.failed.lock(), vec![7]);
        assert_eq!(recording.recovered.load(Ordering::Relaxed), 1);
    }
}
