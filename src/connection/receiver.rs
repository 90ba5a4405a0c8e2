// src/connection/receiver.rs

//! The per-token receiver registry: who is waiting for what, and the
//! timers bounding their waits.

use crate::connection::handle::Reply;
use crate::core::OpalDBError;
use crate::cursor::CursorUpdate;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Allocates request tokens: post-increment from 1, wrapping to 0
/// after the maximum. Uniqueness among in-flight requests holds for
/// any workload short of 2⁶⁴ outstanding allocations per wrap cycle.
#[derive(Debug)]
pub(crate) struct TokenCounter {
    next: u64,
}

impl TokenCounter {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next(&mut self) -> u64 {
        let token = self.next;
        self.next = self.next.wrapping_add(1);
        token
    }
}

/// An armed per-request timer. The tag is fresh for every armed timer:
/// tokens are reused once an exchange terminates, so a stale fire must
/// never be attributed to a successor receiver on the same token.
#[derive(Debug)]
pub(crate) struct PendingTimer {
    pub(crate) tag: u64,
    handle: JoinHandle<()>,
}

impl PendingTimer {
    pub(crate) fn new(tag: u64, handle: JoinHandle<()>) -> Self {
        Self { tag, handle }
    }

    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

/// A caller awaiting traffic on one token.
#[derive(Debug)]
pub(crate) enum Receiver {
    /// A one-shot caller awaiting a single response.
    Run {
        reply: oneshot::Sender<Result<Reply, OpalDBError>>,
        timeout: Duration,
        timer: Option<PendingTimer>,
    },
    /// A cursor consumer receiving successive batches.
    Cursor {
        updates: mpsc::UnboundedSender<CursorUpdate>,
        timeout: Duration,
        timer: Option<PendingTimer>,
    },
}

impl Receiver {
    /// Cancels the armed timer, if any.
    pub(crate) fn cancel_timer(&mut self) {
        let timer = match self {
            Receiver::Run { timer, .. } => timer.take(),
            Receiver::Cursor { timer, .. } => timer.take(),
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    /// Arms a fresh timer on this receiver.
    pub(crate) fn set_timer(&mut self, new_timer: PendingTimer) {
        match self {
            Receiver::Run { timer, .. } | Receiver::Cursor { timer, .. } => {
                *timer = Some(new_timer);
            }
        }
    }

    /// The tag of the currently armed timer.
    pub(crate) fn timer_tag(&self) -> Option<u64> {
        match self {
            Receiver::Run { timer, .. } | Receiver::Cursor { timer, .. } => {
                timer.as_ref().map(|t| t.tag)
            }
        }
    }

    /// The per-request timeout recorded at submission.
    pub(crate) fn timeout(&self) -> Duration {
        match self {
            Receiver::Run { timeout, .. } | Receiver::Cursor { timeout, .. } => *timeout,
        }
    }

    /// Terminates this receiver with an error, canceling its timer.
    pub(crate) fn fail(mut self, error: OpalDBError) {
        self.cancel_timer();
        match self {
            Receiver::Run { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Receiver::Cursor { updates, .. } => {
                let _ = updates.send(CursorUpdate::Error(error));
            }
        }
    }
}
