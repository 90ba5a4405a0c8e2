// src/connection/driver.rs

//! The query multiplexer: a single task owning the framed stream, the
//! token counter, and the receiver table.
//!
//! All connection state is mutated here and only here. Callers talk to
//! the driver over the command channel; responses travel back over the
//! per-request reply channels; timers are spawned sleeps reporting into
//! a private event channel.

use crate::connection::handle::Reply;
use crate::connection::receiver::{PendingTimer, Receiver, TokenCounter};
use crate::core::protocol::{query, QueryFrame, QueryFrameCodec, ResponseFrame, WireResponse};
use crate::core::{OpalDBError, ResponseType};
use crate::cursor::{Cursor, CursorUpdate};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Deadline applied when the caller does not supply one.
pub(crate) const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A submitted query builder, invoked on the driver task.
pub(crate) type QueryBuilderFn = Box<dyn FnOnce() -> Result<Bytes, OpalDBError> + Send>;

/// Commands accepted by the driver task.
pub(crate) enum DriverCommand {
    /// Frame and send a query payload assembled from `parts`; the
    /// length field is the sum of part lengths.
    Submit {
        parts: Vec<Bytes>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Reply, OpalDBError>>,
    },
    /// Like `Submit`, but the payload is produced by a caller-supplied
    /// builder invoked here on the driver task.
    SubmitWith {
        build: QueryBuilderFn,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Reply, OpalDBError>>,
    },
    /// Request the next batch for an open cursor's token.
    ContinueCursor { token: u64 },
    /// Tell the server to drop an open cursor's token.
    StopCursor { token: u64 },
    /// Close the transport and fail all outstanding receivers.
    Close { done: oneshot::Sender<()> },
}

/// A fired per-request timer. Tags are compared against the receiver's
/// armed timer; a mismatch means the token was already reused.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerFired {
    token: u64,
    tag: u64,
}

/// The driver task state. Constructed after the handshake, consumed by
/// [`ConnectionDriver::run`].
pub(crate) struct ConnectionDriver {
    framed: Framed<TcpStream, QueryFrameCodec>,
    commands: mpsc::Receiver<DriverCommand>,
    /// Back-reference handed to cursors so they can issue
    /// continuations. Weak: cursors address the driver, never own it.
    commands_weak: mpsc::WeakSender<DriverCommand>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    tokens: TokenCounter,
    receivers: HashMap<u64, Receiver>,
    next_timer_tag: u64,
}

impl ConnectionDriver {
    pub(crate) fn new(
        framed: Framed<TcpStream, QueryFrameCodec>,
        commands: mpsc::Receiver<DriverCommand>,
        commands_weak: mpsc::WeakSender<DriverCommand>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            framed,
            commands,
            commands_weak,
            timer_tx,
            timer_rx,
            tokens: TokenCounter::new(),
            receivers: HashMap::new(),
            next_timer_tag: 0,
        }
    }

    /// The driver main loop. Suspends on inbound frames, timer fires,
    /// and caller commands; exits on transport failure, `Close`, or all
    /// command senders dropping.
    pub(crate) async fn run(mut self) {
        let (reason, done) = loop {
            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => self.dispatch(frame),
                    Some(Err(e)) => {
                        warn!("connection stream error: {e}");
                        break (e, None);
                    }
                    None => {
                        debug!("connection closed by peer");
                        break (OpalDBError::Closed, None);
                    }
                },
                Some(fired) = self.timer_rx.recv() => self.handle_timer(fired),
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Close { done }) => break (OpalDBError::Closed, Some(done)),
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            break (e, None);
                        }
                    }
                    // Every handle and cursor is gone; nobody can
                    // submit or receive anything further.
                    None => break (OpalDBError::Closed, None),
                },
            }
        };

        self.shutdown(reason).await;
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// A command-level error return is terminal for the connection;
    /// request-local failures are reported on the request's channel and
    /// return `Ok`.
    async fn handle_command(&mut self, command: DriverCommand) -> Result<(), OpalDBError> {
        match command {
            DriverCommand::Submit {
                parts,
                timeout,
                reply,
            } => self.submit(parts, timeout, reply).await,
            DriverCommand::SubmitWith {
                build,
                timeout,
                reply,
            } => match build() {
                Ok(payload) => self.submit(vec![payload], timeout, reply).await,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Ok(())
                }
            },
            DriverCommand::ContinueCursor { token } => self.continue_cursor(token).await,
            DriverCommand::StopCursor { token } => self.stop_cursor(token).await,
            // Intercepted by the main loop.
            DriverCommand::Close { done } => {
                let _ = done.send(());
                Ok(())
            }
        }
    }

    /// Allocates a token, frames and sends the payload, registers a
    /// `Run` receiver and arms its timer.
    async fn submit(
        &mut self,
        parts: Vec<Bytes>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Reply, OpalDBError>>,
    ) -> Result<(), OpalDBError> {
        let token = self.tokens.next();
        let timeout = timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT);
        let frame = QueryFrame::from_parts(token, parts);
        debug!(
            "submitting query on token {token} ({} payload bytes)",
            frame.payload_len()
        );

        if let Err(e) = self.framed.send(frame).await {
            return match e {
                // An oversized payload never reaches the wire; the
                // connection is unaffected.
                OpalDBError::FrameTooLarge { .. } => {
                    let _ = reply.send(Err(e));
                    Ok(())
                }
                other => {
                    let _ = reply.send(Err(other.clone()));
                    Err(other)
                }
            };
        }

        let timer = self.arm_timer(token, timeout);
        self.receivers.insert(
            token,
            Receiver::Run {
                reply,
                timeout,
                timer: Some(timer),
            },
        );
        Ok(())
    }

    /// Sends a CONTINUE frame on an existing token and re-arms the
    /// cursor receiver's timer. No new token is allocated.
    async fn continue_cursor(&mut self, token: u64) -> Result<(), OpalDBError> {
        let Some(receiver) = self.receivers.get(&token) else {
            debug!("dropping continuation for unknown token {token}");
            return Ok(());
        };
        let timeout = receiver.timeout();

        self.framed
            .send(QueryFrame::new(token, query::continue_()))
            .await?;

        let timer = self.arm_timer(token, timeout);
        if let Some(receiver) = self.receivers.get_mut(&token) {
            receiver.cancel_timer();
            receiver.set_timer(timer);
        }
        Ok(())
    }

    /// Sends a STOP frame on an existing token. The server's terminal
    /// response drains the receiver entry through the normal dispatch
    /// path.
    async fn stop_cursor(&mut self, token: u64) -> Result<(), OpalDBError> {
        let Some(receiver) = self.receivers.get(&token) else {
            debug!("dropping stop for unknown token {token}");
            return Ok(());
        };
        let timeout = receiver.timeout();

        self.framed
            .send(QueryFrame::new(token, query::stop()))
            .await?;

        let timer = self.arm_timer(token, timeout);
        if let Some(receiver) = self.receivers.get_mut(&token) {
            receiver.cancel_timer();
            receiver.set_timer(timer);
        }
        Ok(())
    }

    /// Routes a completed frame to the receiver registered for its
    /// token. Frames without a receiver are stale (the request timed
    /// out or the connection is closing) and are dropped.
    fn dispatch(&mut self, frame: ResponseFrame) {
        let ResponseFrame { token, payload } = frame;
        let Some(mut receiver) = self.receivers.remove(&token) else {
            debug!("dropping frame for unknown token {token}");
            return;
        };
        receiver.cancel_timer();

        let response = match WireResponse::parse(&payload) {
            Ok(response) => response,
            Err(e) => {
                // A malformed payload is local to this receiver; the
                // framing layer is intact and the connection continues.
                warn!("malformed response on token {token}: {e}");
                receiver.fail(e);
                return;
            }
        };

        match receiver {
            Receiver::Run { reply, timeout, .. } => {
                self.finish_run(token, reply, timeout, response)
            }
            Receiver::Cursor {
                updates, timeout, ..
            } => self.finish_cursor(token, updates, timeout, response),
        }
    }

    fn finish_run(
        &mut self,
        token: u64,
        reply: oneshot::Sender<Result<Reply, OpalDBError>>,
        timeout: Duration,
        response: WireResponse,
    ) {
        use ResponseType::*;
        let result = match response.response_type {
            SuccessAtom | ServerInfo => Ok(Reply::Atom(response.first())),
            WaitComplete => Ok(Reply::Done),
            SuccessSequence => Ok(Reply::Cursor(Cursor::terminal(
                self.commands_weak.clone(),
                token,
                response.results,
            ))),
            SuccessPartial => {
                // The receiver entry stays live so continuation
                // responses on this token can find the cursor.
                let (cursor, updates) =
                    Cursor::streaming(self.commands_weak.clone(), token, response.results);
                self.receivers.insert(
                    token,
                    Receiver::Cursor {
                        updates,
                        timeout,
                        timer: None,
                    },
                );
                Ok(Reply::Cursor(cursor))
            }
            kind @ (ClientError | CompileError | RuntimeError) => Err(OpalDBError::Query {
                kind,
                payload: response.first(),
            }),
        };
        let _ = reply.send(result);
    }

    fn finish_cursor(
        &mut self,
        token: u64,
        updates: mpsc::UnboundedSender<CursorUpdate>,
        timeout: Duration,
        response: WireResponse,
    ) {
        use ResponseType::*;
        match response.response_type {
            SuccessPartial => {
                let _ = updates.send(CursorUpdate::Batch {
                    items: response.results,
                    done: false,
                });
                self.receivers.insert(
                    token,
                    Receiver::Cursor {
                        updates,
                        timeout,
                        timer: None,
                    },
                );
            }
            SuccessSequence => {
                let _ = updates.send(CursorUpdate::Batch {
                    items: response.results,
                    done: true,
                });
            }
            WaitComplete => {
                let _ = updates.send(CursorUpdate::Batch {
                    items: Vec::new(),
                    done: true,
                });
            }
            kind @ (ClientError | CompileError | RuntimeError) => {
                let _ = updates.send(CursorUpdate::Error(OpalDBError::Query {
                    kind,
                    payload: response.first(),
                }));
            }
            SuccessAtom | ServerInfo => {
                let _ = updates.send(CursorUpdate::Error(OpalDBError::Protocol(
                    "atom-shaped response on a cursor token".to_string(),
                )));
            }
        }
    }

    /// Times out the receiver a fired timer still belongs to. A tag
    /// mismatch means the receiver was replaced after the timer was
    /// armed; the fire is stale and ignored.
    fn handle_timer(&mut self, fired: TimerFired) {
        let armed_tag = self
            .receivers
            .get(&fired.token)
            .and_then(Receiver::timer_tag);
        if armed_tag != Some(fired.tag) {
            debug!("ignoring stale timer for token {}", fired.token);
            return;
        }
        if let Some(receiver) = self.receivers.remove(&fired.token) {
            debug!("request on token {} timed out", fired.token);
            receiver.fail(OpalDBError::Timeout);
        }
    }

    fn arm_timer(&mut self, token: u64, timeout: Duration) -> PendingTimer {
        let tag = self.next_timer_tag;
        self.next_timer_tag += 1;
        let timers = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timers.send(TimerFired { token, tag });
        });
        PendingTimer::new(tag, handle)
    }

    /// Fails every outstanding receiver with the terminal reason and
    /// shuts the transport down. The receiver table is empty afterwards.
    async fn shutdown(&mut self, reason: OpalDBError) {
        debug!(
            "driver stopping ({reason}); failing {} outstanding receiver(s)",
            self.receivers.len()
        );
        for (_, receiver) in self.receivers.drain() {
            receiver.fail(reason.clone());
        }
        let _ = SinkExt::<QueryFrame>::close(&mut self.framed).await;
    }
}
