//! Appender state machine.
//!
//! Drains the write buffer and appends contiguous blocks of framed bytes to
//! log storage. On an append failure the appender fails stop: it notifies
//! every registered failure listener once with the position of the first
//! record in the failed block, then keeps discarding peeked blocks until an
//! explicit recover request arrives. No blind retries are attempted; the
//! caller decides whether to replay.

use crate::actor::{Actor, CommandQueue};
use crate::buffer::WriteBuffer;
use crate::error::CoreResult;
use crate::listener::FailureListeners;
use crate::types::{Position, SharedLogStorage};
use futures::channel::oneshot;
use logstream_storage::LogStorage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle requests handled by the appender.
pub(crate) enum AppenderCommand {
    /// Open storage and start draining the write buffer.
    Open(oneshot::Sender<CoreResult<()>>),
    /// Stop at the next safe point, draining available blocks first.
    Close(oneshot::Sender<()>),
    /// Leave the failed state and resume appending.
    Recover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Opening,
    Open,
    /// An append failed; listeners have not been notified yet.
    Failing {
        first_failed_position: Position,
    },
    Failed,
    /// Recovery requested; listeners have not been notified yet.
    Recovered,
    Closing {
        /// Whether remaining buffered blocks are appended before closing.
        drain: bool,
    },
}

pub(crate) struct Appender {
    name: String,
    state: State,
    storage: SharedLogStorage,
    buffer: Box<dyn WriteBuffer>,
    listeners: FailureListeners,
    commands: CommandQueue<AppenderCommand>,
    max_append_block_size: usize,
    /// Position of the first record of the block currently in flight.
    in_flight: Option<Position>,
    failed_flag: Arc<AtomicBool>,
    pending_open: Option<oneshot::Sender<CoreResult<()>>>,
    pending_close: Option<oneshot::Sender<()>>,
}

impl Appender {
    pub(crate) fn new(
        name: String,
        storage: SharedLogStorage,
        buffer: Box<dyn WriteBuffer>,
        listeners: FailureListeners,
        commands: CommandQueue<AppenderCommand>,
        max_append_block_size: usize,
        failed_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name,
            state: State::Closed,
            storage,
            buffer,
            listeners,
            commands,
            max_append_block_size,
            in_flight: None,
            failed_flag,
            pending_open: None,
            pending_close: None,
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut work = 0;
        while let Some(command) = self.commands.pop() {
            work += 1;
            match command {
                AppenderCommand::Open(ack) => match self.state {
                    State::Closed => {
                        self.state = State::Opening;
                        self.pending_open = Some(ack);
                    }
                    _ => {
                        let _ = ack.send(Err(crate::error::CoreError::invalid_operation(
                            "appender is already open",
                        )));
                    }
                },
                AppenderCommand::Close(ack) => match self.state {
                    State::Closed => {
                        let _ = ack.send(());
                    }
                    State::Open => {
                        self.state = State::Closing { drain: true };
                        self.pending_close = Some(ack);
                    }
                    // From a failed or in-between state nothing may be
                    // appended anymore; close without draining.
                    _ => {
                        self.state = State::Closing { drain: false };
                        self.pending_close = Some(ack);
                    }
                },
                AppenderCommand::Recover => {
                    if self.state == State::Failed {
                        self.state = State::Recovered;
                    } else {
                        tracing::debug!(stream = %self.name, "ignoring recover request outside failed state");
                    }
                }
            }
        }
        work
    }

    fn open_storage(&mut self) -> usize {
        let result = {
            let mut storage = self.storage.lock();
            if storage.is_open() {
                Ok(())
            } else {
                storage.open().map_err(Into::into)
            }
        };
        match result {
            Ok(()) => {
                tracing::debug!(stream = %self.name, "appender open");
                self.state = State::Open;
                if let Some(ack) = self.pending_open.take() {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(err) => {
                self.state = State::Closed;
                if let Some(ack) = self.pending_open.take() {
                    let _ = ack.send(Err(err));
                }
            }
        }
        1
    }

    fn append_next_block(&mut self) -> usize {
        let block = match self.buffer.peek_block(self.max_append_block_size) {
            Ok(Some(block)) => block,
            Ok(None) => return 0,
            Err(err) => {
                let position = self.buffer.current_position().unwrap_or_default();
                tracing::error!(stream = %self.name, %err, "write buffer corrupted");
                self.state = State::Failing {
                    first_failed_position: position,
                };
                self.failed_flag.store(true, Ordering::Release);
                return 1;
            }
        };

        self.in_flight = Some(block.first_position);
        let result = self.storage.lock().append(&block.data);
        match result {
            Ok(address) => {
                self.in_flight = None;
                if let Err(err) = self.buffer.mark_completed() {
                    tracing::warn!(stream = %self.name, %err, "marking appended block completed failed");
                }
                tracing::trace!(
                    stream = %self.name,
                    address,
                    first_position = block.first_position,
                    bytes = block.data.len(),
                    "block appended"
                );
            }
            Err(err) => {
                self.in_flight = None;
                tracing::warn!(
                    stream = %self.name,
                    %err,
                    first_position = block.first_position,
                    "append failed, failing the stream"
                );
                if let Err(err) = self.buffer.mark_failed() {
                    tracing::warn!(stream = %self.name, %err, "marking failed block failed");
                }
                self.state = State::Failing {
                    first_failed_position: block.first_position,
                };
                self.failed_flag.store(true, Ordering::Release);
            }
        }
        1
    }

    fn notify_failure(&mut self, first_failed_position: Position) -> usize {
        self.listeners.notify_failed(first_failed_position);
        // A failure during a close drain still completes the close.
        self.state = if self.pending_close.is_some() {
            State::Closing { drain: false }
        } else {
            State::Failed
        };
        1
    }

    fn discard_next_block(&mut self) -> usize {
        match self.buffer.peek_block(self.max_append_block_size) {
            Ok(Some(_)) => {
                if let Err(err) = self.buffer.mark_failed() {
                    tracing::warn!(stream = %self.name, %err, "discarding block failed");
                }
                1
            }
            Ok(None) => 0,
            Err(err) => {
                tracing::warn!(stream = %self.name, %err, "write buffer error while failed");
                1
            }
        }
    }

    fn notify_recovery(&mut self) -> usize {
        self.listeners.notify_recovered();
        self.failed_flag.store(false, Ordering::Release);
        tracing::info!(stream = %self.name, "appender recovered");
        self.state = State::Open;
        1
    }

    fn close(&mut self, drain: bool) -> usize {
        if drain && self.append_next_block() > 0 {
            // Still in Open-equivalent work; stay in Closing unless the
            // drain append failed the stream.
            if matches!(self.state, State::Failing { .. }) {
                return 1;
            }
            self.state = State::Closing { drain };
            return 1;
        }
        tracing::debug!(stream = %self.name, "appender closed");
        self.state = State::Closed;
        if let Some(ack) = self.pending_open.take() {
            let _ = ack.send(Err(crate::error::CoreError::Shutdown));
        }
        if let Some(ack) = self.pending_close.take() {
            let _ = ack.send(());
        }
        1
    }
}

impl Actor for Appender {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_work(&mut self) -> usize {
        let work = self.drain_commands();
        work + match self.state {
            State::Closed => 0,
            State::Opening => self.open_storage(),
            State::Open => self.append_next_block(),
            State::Failing {
                first_failed_position,
            } => self.notify_failure(first_failed_position),
            State::Failed => self.discard_next_block(),
            State::Recovered => self.notify_recovery(),
            State::Closing { drain } => self.close(drain),
        }
    }
}
