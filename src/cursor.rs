// src/cursor.rs

//! Cursors: client handles iterating multi-batch result streams.
//!
//! A cursor and its connection are two actors exchanging messages: the
//! driver pushes batches over the cursor's update channel, and the
//! cursor requests continuations over the driver's command channel.
//! The back-reference is a weak sender, an address and never
//! ownership.

use crate::connection::driver::DriverCommand;
use crate::core::OpalDBError;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A batch or terminal error pushed to a cursor by the driver.
#[derive(Debug)]
pub(crate) enum CursorUpdate {
    Batch { items: Vec<Value>, done: bool },
    Error(OpalDBError),
}

/// Messages emitted in push mode (see [`Cursor::activate`]).
#[derive(Debug, Clone, PartialEq)]
pub enum CursorEvent {
    /// One batch of results, in arrival order.
    Batch(Vec<Value>),
    /// The stream completed; no further messages follow.
    Done,
    /// The stream failed; no further messages follow.
    Error(OpalDBError),
}

#[derive(Debug)]
enum CursorState {
    /// More batches are expected on the wire.
    Open,
    /// The terminal batch has been received.
    Drained,
    /// The stream failed; the error is replayed to later calls.
    Errored(OpalDBError),
    /// Closed locally by the consumer.
    Closed,
}

/// A handle over one token's result stream.
#[derive(Debug)]
pub struct Cursor {
    token: u64,
    commands: mpsc::WeakSender<DriverCommand>,
    updates: mpsc::UnboundedReceiver<CursorUpdate>,
    buffered: VecDeque<Vec<Value>>,
    state: CursorState,
}

impl Cursor {
    /// Builds a streaming cursor seeded with the first partial batch.
    /// Returns the update sender the driver keeps in the receiver
    /// table.
    pub(crate) fn streaming(
        commands: mpsc::WeakSender<DriverCommand>,
        token: u64,
        first_batch: Vec<Value>,
    ) -> (Self, mpsc::UnboundedSender<CursorUpdate>) {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let cursor = Self {
            token,
            commands,
            updates,
            buffered: VecDeque::from([first_batch]),
            state: CursorState::Open,
        };
        (cursor, update_tx)
    }

    /// Builds an already-drained cursor around a terminal sequence.
    pub(crate) fn terminal(
        commands: mpsc::WeakSender<DriverCommand>,
        token: u64,
        batch: Vec<Value>,
    ) -> Self {
        let (_, updates) = mpsc::unbounded_channel();
        Self {
            token,
            commands,
            updates,
            buffered: VecDeque::from([batch]),
            state: CursorState::Drained,
        }
    }

    /// The wire token this cursor consumes.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Pulls the next batch, requesting a continuation from the server
    /// when the buffered data is exhausted and the stream is still
    /// open. Returns `None` once the stream has ended.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, OpalDBError> {
        if let Some(batch) = self.buffered.pop_front() {
            return Ok(Some(batch));
        }
        match &self.state {
            CursorState::Drained | CursorState::Closed => Ok(None),
            CursorState::Errored(e) => Err(e.clone()),
            CursorState::Open => {
                self.request_continuation().await?;
                match self.updates.recv().await {
                    Some(CursorUpdate::Batch { items, done }) => {
                        if done {
                            self.state = CursorState::Drained;
                        }
                        Ok(Some(items))
                    }
                    Some(CursorUpdate::Error(e)) => {
                        self.state = CursorState::Errored(e.clone());
                        Err(e)
                    }
                    // The driver is gone; nothing further can arrive.
                    None => {
                        self.state = CursorState::Errored(OpalDBError::Closed);
                        Err(OpalDBError::Closed)
                    }
                }
            }
        }
    }

    /// Pulls until the stream is drained; returns all results
    /// concatenated in arrival order.
    pub async fn all(mut self) -> Result<Vec<Value>, OpalDBError> {
        let mut results = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            results.extend(batch);
        }
        Ok(results)
    }

    /// Switches to push mode: every batch is forwarded to `sink` as
    /// [`CursorEvent::Batch`], followed by exactly one terminal
    /// [`CursorEvent::Done`] or [`CursorEvent::Error`].
    pub fn activate(mut self, sink: mpsc::Sender<CursorEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.next_batch().await {
                    Ok(Some(batch)) => {
                        if sink.send(CursorEvent::Batch(batch)).await.is_err() {
                            debug!("cursor sink dropped; abandoning token {}", self.token);
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = sink.send(CursorEvent::Done).await;
                        break;
                    }
                    Err(e) => {
                        let _ = sink.send(CursorEvent::Error(e)).await;
                        break;
                    }
                }
            }
        })
    }

    /// Closes the cursor, telling the server to drop the token if the
    /// stream is still open.
    pub async fn close(&mut self) {
        if matches!(self.state, CursorState::Open) {
            if let Some(commands) = self.commands.upgrade() {
                let _ = commands
                    .send(DriverCommand::StopCursor { token: self.token })
                    .await;
            }
            self.state = CursorState::Closed;
        }
    }

    async fn request_continuation(&mut self) -> Result<(), OpalDBError> {
        let Some(commands) = self.commands.upgrade() else {
            self.state = CursorState::Errored(OpalDBError::DriverGone);
            return Err(OpalDBError::DriverGone);
        };
        commands
            .send(DriverCommand::ContinueCursor { token: self.token })
            .await
            .map_err(|_| OpalDBError::DriverGone)
    }
}

impl Drop for Cursor {
    /// Best-effort server-side cleanup for a cursor dropped while
    /// still open.
    fn drop(&mut self) {
        if matches!(self.state, CursorState::Open) {
            if let Some(commands) = self.commands.upgrade() {
                let _ = commands.try_send(DriverCommand::StopCursor { token: self.token });
            }
        }
    }
}
