//! Request execution engine.
//!
//! Routes each command to a connection according to its [`ExecMode`] and
//! attaches the decoded reply to the returned [`Request`]. Replies on the
//! shared read-write connection are matched to requests purely by order:
//! the pending FIFO push and the writer-queue push happen under one lock.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::command::Command;
use crate::config::ServerConfig;
use crate::connection::pool::{BlockedConnection, ConnectionPool, ConnectionRole, ReplySink};
use crate::error::{RedustError, Result};
use crate::request::{ExecMode, Request};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;
use crate::resp::writer::{encode_command, encode_command_into};

/// Client-side engine for one server. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine handle.
#[derive(Debug, Clone, Default)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

struct EngineInner {
    pool: ConnectionPool,
    /// Requests written on the read-write connection, oldest first.
    pending: Mutex<VecDeque<Request>>,
    pipeline: Mutex<PipelineBuffer>,
}

#[derive(Default)]
struct PipelineBuffer {
    payload: BytesMut,
    requests: Vec<Request>,
}

impl Engine {
    /// Engine that connects lazily on first use of each role.
    pub fn new(config: ServerConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let sink: Weak<dyn ReplySink> = weak.clone();
            EngineInner {
                pool: ConnectionPool::with_reply_sink(config, sink),
                pending: Mutex::new(VecDeque::new()),
                pipeline: Mutex::new(PipelineBuffer::default()),
            }
        });
        Self { inner }
    }

    /// Engine with the connections named by the config's pre-warm settings
    /// already open.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let (read_write, write_only, blocked) = (
            config.read_write_prewarm,
            config.write_only_prewarm,
            config.blocked_prewarm,
        );
        let engine = Self::new(config);
        engine.inner.pool.prewarm(read_write, write_only, blocked).await?;
        tracing::debug!(addr = %engine.inner.pool.config().addr(), "engine connected");
        Ok(engine)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Requests waiting for a reply on the read-write connection.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Requests buffered for the next [`execute_pipeline`](Self::execute_pipeline).
    pub fn pipeline_len(&self) -> usize {
        self.inner.pipeline.lock().requests.len()
    }

    /// Dispatch `cmd` according to `mode`.
    ///
    /// Faults are attached to the returned request, never returned directly.
    pub async fn execute(&self, cmd: Command, mode: ExecMode) -> Request {
        match mode {
            ExecMode::WriteOnly | ExecMode::WriteOnlyBlocked => self.write_only(cmd, mode).await,
            ExecMode::Syncron => match self.inner.pool.acquire_blocked().await {
                Ok(mut conn) => self.execute_on(cmd, mode, &mut conn).await,
                Err(e) => Request::failed(cmd, mode, no_connection(ConnectionRole::Blocked, e)),
            },
            ExecMode::Asyncron => self.asyncron(cmd).await,
            ExecMode::PipeLine => self.buffer_pipelined(cmd),
        }
    }

    /// [`execute`](Self::execute) for callers outside an async context.
    ///
    /// Runs on a process-wide runtime created on first use. Panics if
    /// called from inside a tokio runtime.
    pub fn execute_blocking(&self, cmd: Command, mode: ExecMode) -> Request {
        match blocking_runtime() {
            Ok(rt) => rt.block_on(self.execute(cmd, mode)),
            Err(e) => Request::failed(cmd, mode, e),
        }
    }

    /// Run `cmd` on an exclusive connection the caller already holds.
    ///
    /// Only `Syncron` and `WriteOnlyBlocked` make sense here. A
    /// `WriteOnlyBlocked` command leaves its reply unread on `conn`.
    pub async fn execute_on(
        &self,
        cmd: Command,
        mode: ExecMode,
        conn: &mut BlockedConnection,
    ) -> Request {
        match mode {
            ExecMode::Syncron => {
                let outcome = match conn.execute(&cmd).await {
                    Ok(value) => cmd.normalize(value),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(resp) => Request::completed(cmd, mode, Ok(Some(resp))),
                    Err(e) => {
                        if e.poisons_connection() {
                            conn.mark_broken();
                        }
                        Request::failed(cmd, mode, e)
                    }
                }
            }
            ExecMode::WriteOnlyBlocked => match conn.send(&cmd).await {
                Ok(()) => Request::completed(cmd, mode, Ok(None)),
                Err(e) => Request::failed(cmd, mode, e),
            },
            other => Request::failed(
                cmd,
                other,
                RedustError::Argument(format!("{other:?} cannot run on a held connection")),
            ),
        }
    }

    /// Flush every buffered `PipeLine` request in one write. Returns the
    /// number of requests flushed.
    pub async fn execute_pipeline(&self) -> Result<usize> {
        let (payload, requests) = {
            let mut buffered = self.inner.pipeline.lock();
            if buffered.requests.is_empty() {
                return Ok(0);
            }
            (
                buffered.payload.split().freeze(),
                std::mem::take(&mut buffered.requests),
            )
        };

        let writer = match self.inner.pool.read_write().await {
            Ok(writer) => writer,
            Err(e) => {
                let err = no_connection(ConnectionRole::ReadWrite, e);
                fail_each(&requests, &err);
                return Err(err);
            }
        };

        let count = requests.len();
        {
            let mut pending = self.inner.pending.lock();
            if let Err(e) = writer.queue(payload) {
                drop(pending);
                fail_each(&requests, &e);
                return Err(e);
            }
            pending.extend(requests);
        }
        tracing::debug!(count, "pipeline flushed");
        Ok(count)
    }

    /// Attach every complete reply in `buf` to the oldest pending request.
    ///
    /// Invoked by the read-write connection's reader task; partial trailing
    /// data stays in `buf` for the next call.
    pub fn drain(&self, buf: &mut BytesMut) -> Result<usize> {
        self.inner.drain(buf)
    }

    async fn write_only(&self, cmd: Command, mode: ExecMode) -> Request {
        let writer = match self.inner.pool.write_only().await {
            Ok(writer) => writer,
            Err(e) => {
                return Request::failed(cmd, mode, no_connection(ConnectionRole::WriteOnly, e));
            }
        };
        let payload = encode_command(&cmd);
        let written = if mode == ExecMode::WriteOnlyBlocked {
            writer.write(payload).await
        } else {
            writer.queue(payload)
        };
        match written {
            Ok(()) => Request::completed(cmd, mode, Ok(None)),
            Err(e) => Request::failed(cmd, mode, e),
        }
    }

    async fn asyncron(&self, cmd: Command) -> Request {
        let mode = ExecMode::Asyncron;
        let writer = match self.inner.pool.read_write().await {
            Ok(writer) => writer,
            Err(e) => {
                return Request::failed(cmd, mode, no_connection(ConnectionRole::ReadWrite, e));
            }
        };
        let payload = encode_command(&cmd);
        let req = Request::new(cmd, mode);
        {
            let mut pending = self.inner.pending.lock();
            if let Err(e) = writer.queue(payload) {
                drop(pending);
                req.fail(e);
                return req;
            }
            pending.push_back(req.clone());
        }
        req
    }

    fn buffer_pipelined(&self, cmd: Command) -> Request {
        let mut buffered = self.inner.pipeline.lock();
        encode_command_into(&cmd, &mut buffered.payload);
        let req = Request::new(cmd, ExecMode::PipeLine);
        buffered.requests.push(req.clone());
        req
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.inner.pool)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl EngineInner {
    /// Hand one decoded reply to the oldest pending request.
    fn deliver(&self, value: RespValue) -> Result<()> {
        let Some(req) = self.pending.lock().pop_front() else {
            let violation = RedustError::Ordering(format!(
                "{} reply received with no pending request",
                value.type_name()
            ));
            tracing::error!(error = %violation, "reply discarded");
            return Ok(());
        };
        match req.command().normalize(value) {
            Ok(resp) => {
                req.respond(resp);
                Ok(())
            }
            Err(e) => {
                req.fail(e.clone());
                Err(e)
            }
        }
    }
}

impl ReplySink for EngineInner {
    fn drain(&self, buf: &mut BytesMut) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let snapshot = buf.split().freeze();
        let mut offset = 0;
        let mut delivered = 0;
        let result = loop {
            if offset == snapshot.len() {
                break Ok(());
            }
            match parse(&snapshot.slice(offset..)) {
                Ok((value, consumed)) => {
                    offset += consumed;
                    delivered += 1;
                    if let Err(e) = self.deliver(value) {
                        break Err(e);
                    }
                }
                Err(RedustError::Incomplete) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        if offset < snapshot.len() {
            buf.extend_from_slice(&snapshot[offset..]);
        }
        result.map(|()| delivered)
    }

    fn fail_all(&self, err: RedustError) {
        let drained: Vec<Request> = self.pending.lock().drain(..).collect();
        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), error = %err, "failing pending requests");
        }
        fail_each(&drained, &err);
    }
}

/// Runtime behind [`Engine::execute_blocking`]. Connections opened through
/// it keep their reader and writer tasks on it.
fn blocking_runtime() -> Result<&'static Runtime> {
    static RUNTIME: OnceLock<std::io::Result<Runtime>> = OnceLock::new();
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("redust-blocking")
                .build()
        })
        .as_ref()
        .map_err(|e| RedustError::Closed(format!("blocking runtime unavailable: {e}")))
}

fn no_connection(role: ConnectionRole, err: RedustError) -> RedustError {
    tracing::warn!(role = role.as_str(), error = %err, "no connection");
    RedustError::no_connection(role.as_str(), err)
}

fn fail_each(requests: &[Request], err: &RedustError) {
    for req in requests {
        req.fail(err.clone());
    }
}

// ── Tests ──────────────────────────────────────────────────────────
