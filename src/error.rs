//! Error taxonomy for the RESP client core.
//!
//! Faults (connect, write, protocol, ordering) are `RedustError` variants.
//! A well-formed `-ERR ...` reply is *not* a fault: it travels as a
//! [`RespValue::Error`](crate::resp::RespValue::Error) inside the response
//! and can be classified with [`RedisErrorKind`].

use std::io;
use std::sync::Arc;

/// Structured Redis error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// ERR unknown command 'X' (e.g. HSTRLEN on servers older than 3.2)
    UnknownCommand,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// Any other Redis error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Classify a server error message (e.g. "WRONGTYPE Operation against…").
    pub fn from_error_msg(msg: &str) -> Self {
        if msg.starts_with("WRONGTYPE") {
            Self::WrongType
        } else if let Some(rest) = msg.strip_prefix("ERR ") {
            if rest.starts_with("unknown command") {
                Self::UnknownCommand
            } else {
                Self::Err
            }
        } else if msg == "ERR" {
            Self::Err
        } else {
            let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
            Self::Other(prefix.to_string())
        }
    }
}

/// All error variants of the crate.
///
/// Cloneable so the same fault can be attached to a shared request slot
/// and handed to every party observing it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RedustError {
    /// TCP / IO level errors
    #[error("connection error: {0}")]
    Connection(Arc<io::Error>),
    /// Connect or read timed out
    #[error("timeout: {0}")]
    Timeout(String),
    /// The pool could not hand out a connection for the requested role;
    /// `source` is the underlying connect fault
    #[error("no {role} connection: {source}")]
    NoConnection {
        role: &'static str,
        source: Box<RedustError>,
    },
    /// Writing a command failed or could not be confirmed flushed
    #[error("write error: {0}")]
    Write(String),
    /// Malformed RESP data; the stream is no longer trustworthy
    #[error("protocol error: {0}")]
    Protocol(String),
    /// RESP parser needs more data. Control flow only, never surfaced.
    #[error("incomplete RESP message")]
    Incomplete,
    /// A reply arrived with no outstanding request to attach it to
    #[error("ordering violation: {0}")]
    Ordering(String),
    /// Redis returned an error string
    #[error("redis error: {message}")]
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
    /// Caller supplied an invalid argument combination
    #[error("invalid argument: {0}")]
    Argument(String),
    /// The engine or connection backing an operation has gone away
    #[error("closed: {0}")]
    Closed(String),
    /// The request was dispatched in a mode that never reads a reply
    #[error("no reply expected for {0}")]
    NoReply(String),
}

impl RedustError {
    /// Create a Redis error from a raw error message, auto-parsing the kind.
    pub fn redis(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = RedisErrorKind::from_error_msg(&message);
        Self::Redis { kind, message }
    }

    /// True for faults after which the byte stream of the connection
    /// cannot be trusted anymore.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Write(_)
        )
    }

    /// Wrap a connect fault as the acquisition failure of `role`.
    pub fn no_connection(role: &'static str, source: RedustError) -> Self {
        Self::NoConnection {
            role,
            source: Box::new(source),
        }
    }

    /// True when the server rejected the command as unknown.
    pub fn is_unknown_command(&self) -> bool {
        matches!(
            self,
            Self::Redis {
                kind: RedisErrorKind::UnknownCommand,
                ..
            }
        )
    }
}

impl From<io::Error> for RedustError {
    fn from(e: io::Error) -> Self {
        Self::Connection(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, RedustError>;

// ── Tests ──────────────────────────────────────────────────────────
