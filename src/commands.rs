//! Typed helpers for the supported command subset.
//!
//! Every helper builds a [`Command`] and dispatches it with
//! [`Engine::execute`], so each one accepts any [`ExecMode`].

use bytes::Bytes;

use crate::command::Command;
use crate::connection::pool::BlockedConnection;
use crate::engine::Engine;
use crate::error::{RedustError, Result};
use crate::request::{ExecMode, Request};

/// Which end of a list a blocking pop takes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopDirection {
    Left,
    Right,
}

impl PopDirection {
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Left => "BLPOP",
            Self::Right => "BRPOP",
        }
    }
}

/// `BLPOP`/`BRPOP key [key ...] timeout`; `timeout_secs == 0` blocks forever.
pub fn blocking_pop<I>(direction: PopDirection, keys: I, timeout_secs: u64) -> Command
where
    I: IntoIterator,
    I::Item: Into<Bytes>,
{
    Command::new(direction.command_name())
        .args_from(keys)
        .int_arg(timeout_secs)
}

/// Optional `MATCH` and `COUNT` arguments of the scan family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub pattern: Option<Bytes>,
    pub count: Option<u64>,
}

impl ScanOptions {
    pub fn pattern(mut self, pattern: impl Into<Bytes>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    fn apply(&self, mut cmd: Command) -> Command {
        if let Some(pattern) = &self.pattern {
            cmd = cmd.arg("MATCH").arg(pattern.clone());
        }
        if let Some(count) = self.count {
            cmd = cmd.arg("COUNT").int_arg(count);
        }
        cmd
    }
}

impl Engine {
    pub async fn ping(&self, mode: ExecMode) -> Request {
        self.execute(Command::new("PING"), mode).await
    }

    /// `PING payload`; the server echoes `payload` back as a bulk string.
    pub async fn ping_with(&self, payload: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("PING").arg(payload), mode).await
    }

    pub async fn del<I>(&self, keys: I, mode: ExecMode) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        self.execute(Command::new("DEL").args_from(keys), mode).await
    }

    pub async fn exists(&self, key: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("EXISTS").arg(key), mode).await
    }

    pub async fn keys(&self, pattern: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("KEYS").arg(pattern), mode).await
    }

    // ── Lists ──

    pub async fn lpush<I>(&self, key: impl Into<Bytes>, values: I, mode: ExecMode) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let cmd = Command::new("LPUSH").arg(key).args_from(values);
        self.execute(cmd, mode).await
    }

    pub async fn rpush<I>(&self, key: impl Into<Bytes>, values: I, mode: ExecMode) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let cmd = Command::new("RPUSH").arg(key).args_from(values);
        self.execute(cmd, mode).await
    }

    /// `BLPOP` on a connection the caller holds exclusively.
    pub async fn blpop<I>(
        &self,
        conn: &mut BlockedConnection,
        keys: I,
        timeout_secs: u64,
        mode: ExecMode,
    ) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let cmd = blocking_pop(PopDirection::Left, keys, timeout_secs);
        self.execute_on(cmd, mode, conn).await
    }

    /// `BRPOP` on a connection the caller holds exclusively.
    pub async fn brpop<I>(
        &self,
        conn: &mut BlockedConnection,
        keys: I,
        timeout_secs: u64,
        mode: ExecMode,
    ) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let cmd = blocking_pop(PopDirection::Right, keys, timeout_secs);
        self.execute_on(cmd, mode, conn).await
    }

    pub async fn llen(&self, key: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("LLEN").arg(key), mode).await
    }

    // ── Hashes ──

    pub async fn hlen(&self, key: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("HLEN").arg(key), mode).await
    }

    pub async fn hset(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
        mode: ExecMode,
    ) -> Request {
        let cmd = Command::new("HSET").arg(key).arg(field).arg(value);
        self.execute(cmd, mode).await
    }

    pub async fn hsetnx(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
        mode: ExecMode,
    ) -> Request {
        let cmd = Command::new("HSETNX").arg(key).arg(field).arg(value);
        self.execute(cmd, mode).await
    }

    /// `HMSET key f1 v1 f2 v2 ...`.
    ///
    /// Mismatched field/value counts fail the request without touching the
    /// network.
    pub async fn hmset<F, V>(
        &self,
        key: impl Into<Bytes>,
        fields: F,
        values: V,
        mode: ExecMode,
    ) -> Request
    where
        F: IntoIterator,
        F::Item: Into<Bytes>,
        V: IntoIterator,
        V::Item: Into<Bytes>,
    {
        let fields: Vec<Bytes> = fields.into_iter().map(Into::into).collect();
        let values: Vec<Bytes> = values.into_iter().map(Into::into).collect();
        let mut cmd = Command::new("HMSET").arg(key);
        if fields.len() != values.len() {
            return Request::failed(
                cmd,
                mode,
                RedustError::Argument(format!(
                    "HMSET got {} fields but {} values",
                    fields.len(),
                    values.len()
                )),
            );
        }
        for (field, value) in fields.into_iter().zip(values) {
            cmd = cmd.arg(field).arg(value);
        }
        self.execute(cmd, mode).await
    }

    pub async fn hexists(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        mode: ExecMode,
    ) -> Request {
        self.execute(Command::new("HEXISTS").arg(key).arg(field), mode).await
    }

    pub async fn hdel<I>(&self, key: impl Into<Bytes>, fields: I, mode: ExecMode) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let cmd = Command::new("HDEL").arg(key).args_from(fields);
        self.execute(cmd, mode).await
    }

    pub async fn hget(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        mode: ExecMode,
    ) -> Request {
        self.execute(Command::new("HGET").arg(key).arg(field), mode).await
    }

    pub async fn hmget<I>(&self, key: impl Into<Bytes>, fields: I, mode: ExecMode) -> Request
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let cmd = Command::new("HMGET").arg(key).args_from(fields);
        self.execute(cmd, mode).await
    }

    pub async fn hgetall(&self, key: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("HGETALL").arg(key), mode).await
    }

    pub async fn hstrlen(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        mode: ExecMode,
    ) -> Request {
        self.execute(Command::new("HSTRLEN").arg(key).arg(field), mode).await
    }

    pub async fn hkeys(&self, key: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("HKEYS").arg(key), mode).await
    }

    pub async fn hvals(&self, key: impl Into<Bytes>, mode: ExecMode) -> Request {
        self.execute(Command::new("HVALS").arg(key), mode).await
    }

    /// Byte length of a hash field's value, 0 when absent.
    ///
    /// Uses `HSTRLEN`, falling back to `HGET` on servers that do not know it.
    pub async fn field_len(&self, key: impl Into<Bytes>, field: impl Into<Bytes>) -> Result<usize> {
        let (key, field) = (key.into(), field.into());
        let reply = self
            .hstrlen(key.clone(), field.clone(), ExecMode::Syncron)
            .await
            .reply()
            .await?;
        match reply.into_result() {
            Ok(resp) => resp
                .integer()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    RedustError::Protocol(format!("HSTRLEN returned {}", resp.value.type_name()))
                }),
            Err(e) if e.is_unknown_command() => {
                tracing::debug!("HSTRLEN not supported by server, using HGET");
                let resp = self
                    .hget(key, field, ExecMode::Syncron)
                    .await
                    .reply()
                    .await?
                    .into_result()?;
                Ok(resp.string().map_or(0, |value| value.len()))
            }
            Err(e) => Err(e),
        }
    }

    // ── Scan family ──

    pub async fn scan(&self, cursor: u64, opts: &ScanOptions, mode: ExecMode) -> Request {
        let cmd = opts.apply(Command::new("SCAN").int_arg(cursor));
        self.execute(cmd, mode).await
    }

    pub async fn hscan(
        &self,
        key: impl Into<Bytes>,
        cursor: u64,
        opts: &ScanOptions,
        mode: ExecMode,
    ) -> Request {
        let cmd = opts.apply(Command::new("HSCAN").arg(key).int_arg(cursor));
        self.execute(cmd, mode).await
    }

    pub async fn sscan(
        &self,
        key: impl Into<Bytes>,
        cursor: u64,
        opts: &ScanOptions,
        mode: ExecMode,
    ) -> Request {
        let cmd = opts.apply(Command::new("SSCAN").arg(key).int_arg(cursor));
        self.execute(cmd, mode).await
    }

    pub async fn zscan(
        &self,
        key: impl Into<Bytes>,
        cursor: u64,
        opts: &ScanOptions,
        mode: ExecMode,
    ) -> Request {
        let cmd = opts.apply(Command::new("ZSCAN").arg(key).int_arg(cursor));
        self.execute(cmd, mode).await
    }
}

// ── Tests ──────────────────────────────────────────────────────────
