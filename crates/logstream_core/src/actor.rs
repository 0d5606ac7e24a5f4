//! Cooperative scheduling shell for the appender and indexer.
//!
//! Each state machine is an [`Actor`] exposing one non-blocking unit of
//! work. Lifecycle requests from other threads are pushed onto the actor's
//! [`CommandQueue`] and drained at the start of its own work cycle, so every
//! state transition happens on the actor's thread. An [`AgentRunner`] hosts
//! a set of actors on one worker thread, polling them round-robin and
//! parking briefly when all of them are idle.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A cooperatively scheduled state machine.
pub trait Actor: Send {
    /// Name used in worker thread names and trace events.
    fn name(&self) -> &str;

    /// Performs one non-blocking unit of work.
    ///
    /// Returns the amount of work done; `0` means there was nothing to do
    /// and the scheduler may idle. Implementations must never block.
    fn do_work(&mut self) -> usize;
}

/// Single-consumer command queue feeding an actor.
///
/// Commands may be pushed from any thread; only the owning actor drains
/// them.
#[derive(Debug)]
pub struct CommandQueue<C> {
    inner: Arc<Mutex<VecDeque<C>>>,
}

impl<C> Clone for CommandQueue<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for CommandQueue<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<C> CommandQueue<C> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a command for the owning actor.
    pub fn push(&self, command: C) {
        self.inner.lock().push_back(command);
    }

    /// Removes and returns the oldest pending command.
    pub fn pop(&self) -> Option<C> {
        self.inner.lock().pop_front()
    }

    /// Returns whether commands are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Idle back-off applied when no hosted actor has work.
const IDLE_PARK: Duration = Duration::from_micros(100);

/// Hosts a set of actors on one worker thread.
///
/// The runner polls each actor's `do_work` in turn. Actors stay registered
/// for the lifetime of the runner; shutting down joins the thread.
#[derive(Debug)]
pub struct AgentRunner {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AgentRunner {
    /// Spawns a worker thread polling `actors` until shutdown.
    #[must_use]
    pub fn spawn(thread_name: &str, mut actors: Vec<Box<dyn Actor>>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while !shutdown_flag.load(Ordering::Acquire) {
                    let mut work = 0;
                    for actor in &mut actors {
                        work += actor.do_work();
                    }
                    if work == 0 {
                        std::thread::park_timeout(IDLE_PARK);
                    }
                }
            })
            .unwrap_or_else(|err| panic!("failed to spawn worker thread: {err}"));
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops the worker thread and waits for it to finish.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingActor {
        ticks: Arc<AtomicUsize>,
        budget: usize,
    }

    impl Actor for CountingActor {
        fn name(&self) -> &str {
            "counting"
        }

        fn do_work(&mut self) -> usize {
            if self.ticks.load(Ordering::Relaxed) < self.budget {
                self.ticks.fetch_add(1, Ordering::Relaxed);
                1
            } else {
                0
            }
        }
    }

    #[test]
    fn command_queue_is_fifo() {
        let queue = CommandQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn command_queue_clones_share_commands() {
        let queue = CommandQueue::new();
        let producer = queue.clone();
        producer.push("cmd");
        assert_eq!(queue.pop(), Some("cmd"));
    }

    #[test]
    fn runner_polls_actors_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let actor = CountingActor {
            ticks: Arc::clone(&ticks),
            budget: 10,
        };

        let mut runner = AgentRunner::spawn("test-runner", vec![Box::new(actor)]);
        while ticks.load(Ordering::Relaxed) < 10 {
            std::thread::yield_now();
        }
        runner.shutdown();
        assert_eq!(ticks.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let actor = CountingActor { ticks, budget: 1 };
        let mut runner = AgentRunner::spawn("test-runner", vec![Box::new(actor)]);
        runner.shutdown();
        runner.shutdown();
    }
}
