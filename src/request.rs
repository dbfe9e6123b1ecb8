//! Shared request handles.
//!
//! A [`Request`] is created for every dispatched command. The caller keeps
//! one handle, the engine keeps another (on its pending FIFO for the
//! asynchronous modes) and fills the slot exactly once.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::command::Command;
use crate::error::{RedustError, Result};
use crate::resp::types::Response;

/// Dispatch policy for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    /// Queued on the write-only connection; nothing is awaited.
    WriteOnly,
    /// Written on the write-only (or a supplied blocked) connection and
    /// awaited until flushed; the reply is never read.
    WriteOnlyBlocked,
    /// Written and read on an exclusive connection before returning.
    Syncron,
    /// Queued on the shared connection; the reply arrives later.
    Asyncron,
    /// Buffered until [`Engine::execute_pipeline`](crate::Engine::execute_pipeline).
    PipeLine,
}

impl ExecMode {
    /// Modes whose request completes with a reply.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Self::Syncron | Self::Asyncron | Self::PipeLine)
    }
}

/// `Ok(None)` is a completed write for which no reply is read.
type Outcome = Result<Option<Response>>;

struct RequestInner {
    command: Command,
    mode: ExecMode,
    slot: Mutex<Option<Outcome>>,
    done: Notify,
}

/// Handle to one dispatched command. Cheap to clone.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    pub(crate) fn new(command: Command, mode: ExecMode) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                command,
                mode,
                slot: Mutex::new(None),
                done: Notify::new(),
            }),
        }
    }

    /// A request that is complete from the start.
    pub(crate) fn completed(command: Command, mode: ExecMode, outcome: Outcome) -> Self {
        let req = Self::new(command, mode);
        req.complete(outcome);
        req
    }

    pub(crate) fn failed(command: Command, mode: ExecMode, err: RedustError) -> Self {
        Self::completed(command, mode, Err(err))
    }

    /// Fill the slot. Only the first completion counts.
    pub(crate) fn complete(&self, outcome: Outcome) -> bool {
        {
            let mut slot = self.inner.slot.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.inner.done.notify_waiters();
        true
    }

    pub(crate) fn respond(&self, response: Response) -> bool {
        self.complete(Ok(Some(response)))
    }

    pub(crate) fn fail(&self, err: RedustError) -> bool {
        self.complete(Err(err))
    }

    pub fn command(&self) -> &Command {
        &self.inner.command
    }

    pub fn mode(&self) -> ExecMode {
        self.inner.mode
    }

    pub fn is_complete(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    /// The reply, once one has been attached.
    pub fn response(&self) -> Option<Response> {
        match &*self.inner.slot.lock() {
            Some(Ok(resp)) => resp.clone(),
            _ => None,
        }
    }

    /// The fault, once one has been attached.
    pub fn error(&self) -> Option<RedustError> {
        match &*self.inner.slot.lock() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Wait until the request completes, then report whether it failed.
    pub async fn wait(&self) -> Result<()> {
        self.outcome().await.map(|_| ())
    }

    /// Wait for the reply.
    ///
    /// Requests dispatched in a write-only mode complete without one and
    /// yield [`RedustError::NoReply`].
    pub async fn reply(&self) -> Result<Response> {
        self.outcome()
            .await?
            .ok_or_else(|| RedustError::NoReply(self.inner.command.name_lossy()))
    }

    async fn outcome(&self) -> Outcome {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            // Register before checking the slot so a completion between the
            // check and the await is not missed.
            notified.as_mut().enable();
            if let Some(outcome) = self.inner.slot.lock().clone() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.inner.command.name_lossy())
            .field("mode", &self.inner.mode)
            .field("complete", &self.is_complete())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
