//! Role-based connection pool.
//!
//! Three kinds of sockets are handed out:
//! - one write-only connection whose replies are read and dropped;
//! - one shared read-write connection, split into a writer task and a
//!   reader task that feeds a [`ReplySink`];
//! - any number of exclusive blocked connections kept on a free-list.
//!
//! The free-list uses `parking_lot::Mutex` (sync, held very briefly) so
//! blocked connections can be returned in `Drop` without needing async.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::command::Command;
use crate::config::ServerConfig;
use crate::connection::tcp::{closed_by_server, reserve_read_buf, RedisConnection};
use crate::error::{RedustError, Result};
use crate::resp::types::RespValue;

/// What a connection is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Fire-and-forget writes; replies are never delivered.
    WriteOnly,
    /// Shared, pipelined request/reply in strict FIFO order.
    ReadWrite,
    /// Exclusive checkout, one holder at a time.
    Blocked,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteOnly => "write-only",
            Self::ReadWrite => "read-write",
            Self::Blocked => "blocked",
        }
    }
}

/// Consumer of the reply stream of the shared read-write connection.
pub trait ReplySink: Send + Sync {
    /// Consume every complete reply at the front of `buf`, leaving partial
    /// trailing data in place. Returns the number of replies consumed.
    fn drain(&self, buf: &mut BytesMut) -> Result<usize>;

    /// The connection died; fail everything still waiting on it.
    fn fail_all(&self, err: RedustError);
}

struct WriteJob {
    payload: Bytes,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Handle to the write side of a shared (write-only or read-write)
/// connection. Writes are performed in submission order by one task.
#[derive(Clone)]
pub struct SharedWriter {
    role: ConnectionRole,
    tx: mpsc::UnboundedSender<WriteJob>,
    broken: Arc<AtomicBool>,
}

impl SharedWriter {
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Queue `payload` without waiting for it to reach the socket.
    pub fn queue(&self, payload: Bytes) -> Result<()> {
        self.submit(WriteJob { payload, ack: None })
    }

    /// Queue `payload` and wait until it has been written.
    pub async fn write(&self, payload: Bytes) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.submit(WriteJob {
            payload,
            ack: Some(ack),
        })?;
        done.await
            .map_err(|_| RedustError::Write("writer task stopped before flushing".into()))?
    }

    fn submit(&self, job: WriteJob) -> Result<()> {
        if self.is_broken() {
            return Err(RedustError::Write(format!(
                "{} connection is broken",
                self.role.as_str()
            )));
        }
        self.tx
            .send(job)
            .map_err(|_| RedustError::Write("writer task has stopped".into()))
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter")
            .field("role", &self.role)
            .field("broken", &self.is_broken())
            .finish()
    }
}

/// A cached singleton: its writer handle plus the reader task to stop
/// when the slot is replaced or the pool goes away.
struct SharedSlot {
    writer: SharedWriter,
    reader: JoinHandle<()>,
}

impl Drop for SharedSlot {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// A connection handed out by [`ConnectionPool::acquire`].
#[derive(Debug)]
pub enum Connection {
    Shared(SharedWriter),
    Blocked(BlockedConnection),
}

impl Connection {
    pub fn role(&self) -> ConnectionRole {
        match self {
            Self::Shared(w) => w.role(),
            Self::Blocked(_) => ConnectionRole::Blocked,
        }
    }
}

/// Owns and classifies every socket to one server. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: ServerConfig,
    /// Idle blocked connections (LIFO).
    free: SyncMutex<Vec<RedisConnection>>,
    write_only: AsyncMutex<Option<SharedSlot>>,
    read_write: AsyncMutex<Option<SharedSlot>>,
    sink: Option<Weak<dyn ReplySink>>,
}

impl ConnectionPool {
    /// Pool whose read-write replies are read and dropped.
    pub fn new(config: ServerConfig) -> Self {
        Self::build(config, None)
    }

    /// Pool whose read-write replies are handed to `sink`.
    pub fn with_reply_sink(config: ServerConfig, sink: Weak<dyn ReplySink>) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: ServerConfig, sink: Option<Weak<dyn ReplySink>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                free: SyncMutex::new(Vec::new()),
                write_only: AsyncMutex::new(None),
                read_write: AsyncMutex::new(None),
                sink,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a connection for `role`.
    ///
    /// Shared roles return the cached singleton, connecting it on first use
    /// or after it broke. `Blocked` pops the free-list or connects a new one.
    pub async fn acquire(&self, role: ConnectionRole) -> Result<Connection> {
        match role {
            ConnectionRole::Blocked => self.acquire_blocked().await.map(Connection::Blocked),
            shared => self.shared(shared).await.map(Connection::Shared),
        }
    }

    /// Give a connection back. Only blocked connections are pooled; shared
    /// handles are simply dropped.
    pub fn release(&self, conn: Connection) {
        if let Connection::Blocked(conn) = conn {
            conn.release();
        }
    }

    /// Check out an exclusive connection.
    pub async fn acquire_blocked(&self) -> Result<BlockedConnection> {
        let idle = self.inner.free.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.connect().await?,
        };
        tracing::trace!(id = conn.id(), "blocked connection checked out");
        Ok(BlockedConnection {
            id: conn.id(),
            conn: Some(conn),
            pool: Arc::downgrade(&self.inner),
        })
    }

    pub async fn write_only(&self) -> Result<SharedWriter> {
        self.shared(ConnectionRole::WriteOnly).await
    }

    pub async fn read_write(&self) -> Result<SharedWriter> {
        self.shared(ConnectionRole::ReadWrite).await
    }

    async fn shared(&self, role: ConnectionRole) -> Result<SharedWriter> {
        let (slot, sink) = match role {
            ConnectionRole::WriteOnly => (&self.inner.write_only, None),
            _ => (&self.inner.read_write, self.inner.sink.clone()),
        };
        let mut slot = slot.lock().await;
        if let Some(current) = slot.as_ref() {
            if !current.writer.is_broken() {
                return Ok(current.writer.clone());
            }
            tracing::debug!(role = role.as_str(), "replacing broken connection");
        }

        let conn = self.connect().await?;
        let fresh = spawn_shared(role, conn, sink, self.inner.config.max_buffer_size);
        let writer = fresh.writer.clone();
        *slot = Some(fresh);
        Ok(writer)
    }

    /// Open connections up front so connect faults surface at startup.
    pub async fn prewarm(&self, read_write: bool, write_only: bool, blocked: usize) -> Result<()> {
        if read_write {
            self.read_write().await?;
        }
        if write_only {
            self.write_only().await?;
        }
        for _ in 0..blocked {
            let conn = self.connect().await?;
            self.inner.free.lock().push(conn);
        }
        tracing::debug!(read_write, write_only, blocked, "pool pre-warmed");
        Ok(())
    }

    /// Number of blocked connections waiting on the free-list.
    pub fn idle_blocked(&self) -> usize {
        self.inner.free.lock().len()
    }

    async fn connect(&self) -> Result<RedisConnection> {
        let config = &self.inner.config;
        RedisConnection::connect_timeout(
            &config.addr(),
            config.connect_timeout(),
            config.max_buffer_size,
        )
        .await
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addr", &self.inner.config.addr())
            .field("idle_blocked", &self.idle_blocked())
            .finish()
    }
}

fn spawn_shared(
    role: ConnectionRole,
    conn: RedisConnection,
    sink: Option<Weak<dyn ReplySink>>,
    max_buf_size: usize,
) -> SharedSlot {
    let id = conn.id();
    let (rd, wr, buf) = conn.into_split();
    let broken = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(role, wr, rx, broken.clone(), sink.clone()));
    let reader = tokio::spawn(read_loop(role, rd, buf, max_buf_size, broken.clone(), sink));
    tracing::debug!(id, role = role.as_str(), "shared connection started");

    SharedSlot {
        writer: SharedWriter { role, tx, broken },
        reader,
    }
}

fn mark_broken(broken: &AtomicBool, sink: &Option<Weak<dyn ReplySink>>, err: RedustError) {
    if broken.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(sink) = sink.as_ref().and_then(Weak::upgrade) {
        sink.fail_all(err);
    }
}

async fn write_loop(
    role: ConnectionRole,
    mut wr: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    broken: Arc<AtomicBool>,
    sink: Option<Weak<dyn ReplySink>>,
) {
    while let Some(job) = rx.recv().await {
        let result = if broken.load(Ordering::SeqCst) {
            Err(RedustError::Write(format!("{} connection is broken", role.as_str())))
        } else {
            match wr.write_all(&job.payload).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::warn!(role = role.as_str(), error = %e, "write failed");
                    let err = RedustError::Write(e.to_string());
                    mark_broken(&broken, &sink, err.clone());
                    Err(err)
                }
            }
        };
        if let Some(ack) = job.ack {
            let _ = ack.send(result);
        }
    }
}

async fn read_loop(
    role: ConnectionRole,
    mut rd: OwnedReadHalf,
    mut buf: BytesMut,
    max_buf_size: usize,
    broken: Arc<AtomicBool>,
    sink: Option<Weak<dyn ReplySink>>,
) {
    loop {
        let read = match reserve_read_buf(&mut buf, max_buf_size) {
            Ok(()) => rd.read_buf(&mut buf).await.map_err(RedustError::from),
            Err(e) => Err(e),
        };
        match read {
            Ok(0) => {
                tracing::debug!(role = role.as_str(), "connection closed by server");
                mark_broken(&broken, &sink, closed_by_server());
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(role = role.as_str(), error = %e, "read failed");
                mark_broken(&broken, &sink, e);
                return;
            }
        }
        if broken.load(Ordering::SeqCst) {
            return;
        }

        let Some(weak) = sink.as_ref() else {
            tracing::trace!(role = role.as_str(), bytes = buf.len(), "discarding replies");
            buf.clear();
            continue;
        };
        let Some(target) = weak.upgrade() else {
            return;
        };
        if let Err(e) = target.drain(&mut buf) {
            tracing::error!(role = role.as_str(), error = %e, "reply stream corrupted");
            mark_broken(&broken, &sink, e);
            return;
        }
    }
}

/// RAII guard for an exclusive connection.
///
/// Dropping the guard returns the connection to the free-list, unless it
/// still owes a reply or its stream failed; then it is closed instead.
pub struct BlockedConnection {
    id: u64,
    conn: Option<RedisConnection>,
    pool: Weak<PoolInner>,
}

impl BlockedConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn conn_mut(&mut self) -> Result<&mut RedisConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| RedustError::Closed("blocked connection was taken".into()))
    }

    pub async fn send(&mut self, cmd: &Command) -> Result<()> {
        self.conn_mut()?.send(cmd).await
    }

    pub async fn read_response(&mut self) -> Result<RespValue> {
        self.conn_mut()?.read_response().await
    }

    pub async fn execute(&mut self, cmd: &Command) -> Result<RespValue> {
        self.conn_mut()?.execute(cmd).await
    }

    pub fn pending_replies(&self) -> usize {
        self.conn.as_ref().map_or(0, RedisConnection::pending_replies)
    }

    pub fn is_reusable(&self) -> bool {
        self.conn.as_ref().is_some_and(RedisConnection::is_reusable)
    }

    /// Close instead of reusing once the guard is dropped.
    pub fn mark_broken(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.mark_broken();
        }
    }

    /// Return the connection to the free-list (same as dropping the guard).
    pub fn release(self) {}

    /// Close the connection instead of returning it.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(id = conn.id(), "blocked connection discarded");
        }
    }

    /// Take the connection out of the pool's custody.
    pub fn into_inner(mut self) -> Option<RedisConnection> {
        self.conn.take()
    }
}

impl Drop for BlockedConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_reusable() {
            tracing::debug!(
                id = conn.id(),
                pending = conn.pending_replies(),
                broken = conn.is_broken(),
                "blocked connection not reusable, closing"
            );
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.free.lock().push(conn);
        }
    }
}

impl std::fmt::Debug for BlockedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockedConnection")
            .field("id", &self.id)
            .field("conn", &self.conn)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
