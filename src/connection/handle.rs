// src/connection/handle.rs

//! The public connection handle: connect sequence and the submit API.
//!
//! A `Connection` is a cheap clone wrapping the command channel to the
//! driver task spawned by [`Connection::connect`]. Dropping every
//! handle (and every open cursor) stops the driver.

use crate::config::ConnectOptions;
use crate::connection::driver::{ConnectionDriver, DriverCommand};
use crate::connection::{handshake, transport::Transport};
use crate::core::protocol::query;
use crate::core::OpalDBError;
use crate::cursor::Cursor;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

// Bounds how long a caller waits on the driver task itself, over and
// above any per-query timeout the driver enforces.
const DRIVER_CALL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const COMMAND_QUEUE_DEPTH: usize = 64;

/// The reply to a submitted query.
#[derive(Debug)]
pub enum Reply {
    /// A single document (`success_atom`, `server_info`).
    Atom(Value),
    /// A multi-row result, streaming or already complete.
    Cursor(Cursor),
    /// Acknowledgement carrying no result (`wait_complete`).
    Done,
}

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    /// Global optargs attached to the query document (for example
    /// `db`).
    pub opts: Map<String, Value>,
    /// Per-query deadline. `None` selects the driver default of five
    /// seconds.
    pub timeout: Option<Duration>,
}

impl RunOpts {
    /// Sets the per-query deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A handle to one authenticated connection.
#[derive(Debug, Clone)]
pub struct Connection {
    commands: mpsc::Sender<DriverCommand>,
}

impl Connection {
    /// Connects, authenticates, and spawns the driver task.
    ///
    /// Any handshake failure closes the transport and is returned to
    /// the caller; the driver is only spawned for a fully
    /// authenticated stream.
    pub async fn connect(options: ConnectOptions) -> Result<Self, OpalDBError> {
        let mut transport = Transport::connect(&options).await?;
        if let Err(e) = handshake::authenticate(&mut transport, &options).await {
            transport.close().await;
            return Err(e);
        }
        info!(
            "connected to {}:{} as '{}'",
            options.host, options.port, options.user
        );

        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let driver = ConnectionDriver::new(transport.into_framed(), command_rx, commands.downgrade());
        tokio::spawn(driver.run());
        Ok(Self { commands })
    }

    /// Runs a query term.
    pub async fn run(&self, term: Value, opts: RunOpts) -> Result<Reply, OpalDBError> {
        let payload = query::start(&term, &opts.opts);
        self.submit(vec![payload], opts.timeout).await
    }

    /// Runs a pre-encoded query document.
    pub async fn run_raw(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Reply, OpalDBError> {
        self.submit(vec![payload.into()], timeout).await
    }

    /// Runs a query produced by a caller-supplied builder. The builder
    /// is invoked on the driver task just before framing.
    pub async fn run_with<F>(
        &self,
        build: F,
        timeout: Option<Duration>,
    ) -> Result<Reply, OpalDBError>
    where
        F: FnOnce() -> Result<Bytes, OpalDBError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send_command(DriverCommand::SubmitWith {
            build: Box::new(build),
            timeout,
            reply: tx,
        })
        .await?;
        Self::await_reply(rx).await
    }

    /// Inserts a pre-encoded JSON document into `db`.`table` without
    /// re-parsing it: the document bytes are spliced into the query
    /// wrapper and the frame length is the sum of the part lengths.
    pub async fn insert_raw(
        &self,
        db: &str,
        table: &str,
        document: impl Into<Bytes>,
        opts: RunOpts,
    ) -> Result<Reply, OpalDBError> {
        let (prefix, suffix) = query::insert_raw_wrapper(db, table, &opts.opts);
        self.submit(vec![prefix, document.into(), suffix], opts.timeout)
            .await
    }

    /// Waits until the server has processed every outstanding noreply
    /// write on this connection.
    pub async fn noreply_wait(&self, timeout: Option<Duration>) -> Result<(), OpalDBError> {
        match self.submit(vec![query::noreply_wait()], timeout).await? {
            Reply::Done => Ok(()),
            other => Err(OpalDBError::Protocol(format!(
                "unexpected reply to noreply_wait: {other:?}"
            ))),
        }
    }

    /// Fetches the server's description document.
    pub async fn server_info(&self, timeout: Option<Duration>) -> Result<Value, OpalDBError> {
        match self.submit(vec![query::server_info()], timeout).await? {
            Reply::Atom(info) => Ok(info),
            other => Err(OpalDBError::Protocol(format!(
                "unexpected reply to server_info: {other:?}"
            ))),
        }
    }

    /// Closes the connection. Every outstanding caller receives a
    /// `Closed` error; completes once the driver has shut down.
    pub async fn close(&self) -> Result<(), OpalDBError> {
        let (tx, rx) = oneshot::channel();
        // A send failure means the driver is already gone, which is
        // what close asks for.
        if self
            .commands
            .send(DriverCommand::Close { done: tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    async fn submit(
        &self,
        parts: Vec<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Reply, OpalDBError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(DriverCommand::Submit {
            parts,
            timeout,
            reply: tx,
        })
        .await?;
        Self::await_reply(rx).await
    }

    async fn send_command(&self, command: DriverCommand) -> Result<(), OpalDBError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OpalDBError::DriverGone)
    }

    async fn await_reply(
        rx: oneshot::Receiver<Result<Reply, OpalDBError>>,
    ) -> Result<Reply, OpalDBError> {
        match tokio::time::timeout(DRIVER_CALL_TIMEOUT, rx).await {
            Err(_) => Err(OpalDBError::Timeout),
            // The driver dropped the reply channel while shutting down.
            Ok(Err(_)) => Err(OpalDBError::Closed),
            Ok(Ok(result)) => result,
        }
    }
}
