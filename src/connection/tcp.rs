//! Async TCP connection to a Redis server.
//!
//! Wraps a `tokio::net::TcpStream` with an integrated read buffer and
//! RESP parser for streaming request/response I/O. The connection counts
//! replies it still owes the caller so the pool can tell whether the byte
//! stream is clean enough to hand to the next holder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::command::Command;
use crate::error::{RedustError, Result};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command;

/// Default initial read buffer capacity (64 KB).
pub(crate) const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A single async connection to a Redis server.
pub struct RedisConnection {
    id: u64,
    stream: TcpStream,
    /// Data read from the socket but not yet consumed by the parser.
    buf: BytesMut,
    max_buf_size: usize,
    /// Replies written for but not read yet.
    pending_replies: usize,
    /// Set once an I/O or protocol fault left the stream untrustworthy.
    broken: bool,
}

impl RedisConnection {
    /// Connect to `addr` (e.g. "127.0.0.1:6379").
    pub async fn connect(addr: &str, max_buf_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, addr, "connected");
        Ok(Self {
            id,
            stream,
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            max_buf_size,
            pending_replies: 0,
            broken: false,
        })
    }

    /// Connect with a timeout.
    pub async fn connect_timeout(
        addr: &str,
        timeout: Duration,
        max_buf_size: usize,
    ) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::connect(addr, max_buf_size)).await {
            Ok(result) => result,
            Err(_) => Err(RedustError::Timeout(format!(
                "connection to {addr} timed out after {timeout:?}"
            ))),
        }
    }

    /// Process-unique identifier, stable for the lifetime of the socket.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pending_replies(&self) -> usize {
        self.pending_replies
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Flag the stream as untrustworthy, e.g. after a reply of the wrong
    /// shape.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Clean enough to be handed to another holder.
    pub fn is_reusable(&self) -> bool {
        !self.broken && self.pending_replies == 0
    }

    /// Write already-encoded bytes that will produce `replies` replies.
    pub async fn send_raw(&mut self, data: &[u8], replies: usize) -> Result<()> {
        // Counted before the write so a cancelled write still taints the stream.
        self.pending_replies += replies;
        if let Err(e) = self.stream.write_all(data).await {
            self.broken = true;
            return Err(RedustError::Write(e.to_string()));
        }
        Ok(())
    }

    /// Encode and write one command.
    pub async fn send(&mut self, cmd: &Command) -> Result<()> {
        let payload = encode_command(cmd);
        self.send_raw(&payload, 1).await
    }

    /// Read and parse one complete RESP value from the server.
    ///
    /// Freezes the read buffer to `Bytes` before parsing, enabling
    /// zero-copy `slice()` for bulk strings.
    pub async fn read_response(&mut self) -> Result<RespValue> {
        match self.read_value().await {
            Ok(value) => {
                self.pending_replies = self.pending_replies.saturating_sub(1);
                Ok(value)
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    async fn read_value(&mut self) -> Result<RespValue> {
        loop {
            if !self.buf.is_empty() {
                let snapshot = self.buf.split().freeze();
                match parse(&snapshot) {
                    Ok((value, consumed)) => {
                        if consumed < snapshot.len() {
                            self.buf.extend_from_slice(&snapshot[consumed..]);
                        }
                        return Ok(value);
                    }
                    Err(RedustError::Incomplete) => {
                        // Still waiting for more data
                        self.buf.extend_from_slice(&snapshot);
                    }
                    Err(e) => {
                        self.buf.extend_from_slice(&snapshot);
                        return Err(e);
                    }
                }
            }

            reserve_read_buf(&mut self.buf, self.max_buf_size)?;
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(closed_by_server());
            }
        }
    }

    /// Send a command and read its reply.
    pub async fn execute(&mut self, cmd: &Command) -> Result<RespValue> {
        self.send(cmd).await?;
        self.read_response().await
    }

    /// Split into owned halves for the reader/writer tasks of a shared
    /// connection. Buffered but unparsed bytes are handed over too.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf, BytesMut) {
        let (rd, wr) = self.stream.into_split();
        (rd, wr, self.buf)
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("id", &self.id)
            .field("pending_replies", &self.pending_replies)
            .field("broken", &self.broken)
            .finish()
    }
}

/// Make room for the next socket read, refusing to grow past `max`.
pub(crate) fn reserve_read_buf(buf: &mut BytesMut, max: usize) -> Result<()> {
    if buf.capacity() - buf.len() >= 4096 {
        return Ok(());
    }
    let new_cap = (buf.capacity() * 2).max(DEFAULT_BUF_CAPACITY);
    if new_cap > max {
        if buf.capacity() >= max {
            return Err(RedustError::Protocol(format!(
                "RESP message too large: buffer would exceed {max} bytes"
            )));
        }
        buf.reserve(max - buf.len());
    } else {
        buf.reserve(new_cap - buf.len());
    }
    Ok(())
}

pub(crate) fn closed_by_server() -> RedustError {
    RedustError::from(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed by server",
    ))
}

// ── Tests ──────────────────────────────────────────────────────────
