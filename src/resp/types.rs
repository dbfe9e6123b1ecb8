use bytes::Bytes;

use crate::error::{RedisErrorKind, RedustError, Result};

/// One decoded RESP2 reply, restricted to the shapes the command subset
/// produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// -ERR message\r\n
    Error(String),
    /// +OK\r\n
    Simple(Bytes),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n  or  $-1\r\n
    Bulk(Option<Bytes>),
    /// *2\r\n$1\r\na\r\n$1\r\nb\r\n  (`*-1\r\n` decodes as `[None]`)
    Array(Vec<Option<Bytes>>),
    /// An array containing at least one nested array.
    ArrayOfArrays(Vec<Group>),
}

/// One element of a [`RespValue::ArrayOfArrays`] reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Group {
    /// A scalar sitting next to nested arrays.
    Scalar(Option<Bytes>),
    /// A nested array (`*-1` decodes as `[None]`).
    Nested(Vec<Option<Bytes>>),
}

impl Group {
    /// The group's elements; a scalar reads as a single-element group.
    pub fn items(&self) -> &[Option<Bytes>] {
        match self {
            Self::Scalar(item) => std::slice::from_ref(item),
            Self::Nested(items) => items,
        }
    }
}

impl RespValue {
    /// Returns the type name as a static string (useful for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Simple(_) => "simple_string",
            Self::Integer(_) => "integer",
            Self::Bulk(_) => "bulk_string",
            Self::Array(_) => "array",
            Self::ArrayOfArrays(_) => "array_of_arrays",
        }
    }
}

/// The reply attached to a request.
///
/// `cursor` is only set for scan-family commands, whose two-level reply is
/// flattened into `cursor` + [`RespValue::Array`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub value: RespValue,
    pub cursor: Option<u64>,
}

impl Response {
    pub fn new(value: RespValue) -> Self {
        Self { value, cursor: None }
    }

    /// Build the normalized form of a scan reply.
    pub fn scan(cursor: u64, items: Vec<Option<Bytes>>) -> Self {
        Self {
            value: RespValue::Array(items),
            cursor: Some(cursor),
        }
    }

    /// Bytes of a simple or (non-null) bulk string.
    pub fn string(&self) -> Option<&Bytes> {
        match &self.value {
            RespValue::Simple(b) => Some(b),
            RespValue::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Integer reply.
    pub fn integer(&self) -> Option<i64> {
        match self.value {
            RespValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    /// Flat array reply (also the payload of a normalized scan reply).
    pub fn array(&self) -> Option<&[Option<Bytes>]> {
        match &self.value {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Nested array reply.
    pub fn array_of_arrays(&self) -> Option<&[Group]> {
        match &self.value {
            RespValue::ArrayOfArrays(groups) => Some(groups),
            _ => None,
        }
    }

    /// Server error text, if the reply was `-...`.
    pub fn error(&self) -> Option<&str> {
        match &self.value {
            RespValue::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Classified server error, if any.
    pub fn error_kind(&self) -> Option<RedisErrorKind> {
        self.error().map(RedisErrorKind::from_error_msg)
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Null bulk string or null array.
    pub fn is_null(&self) -> bool {
        match &self.value {
            RespValue::Bulk(None) => true,
            RespValue::Array(items) => items.len() == 1 && items[0].is_none(),
            _ => false,
        }
    }

    /// `:1` or `+OK` count as true, everything else as false.
    pub fn boolean(&self) -> bool {
        match &self.value {
            RespValue::Integer(i) => *i == 1,
            RespValue::Simple(s) => s.as_ref() == b"OK",
            _ => false,
        }
    }

    /// Turn a `-ERR` reply into `Err(RedustError::Redis)`.
    pub fn into_result(self) -> Result<Self> {
        match self.value {
            RespValue::Error(msg) => Err(RedustError::redis(msg)),
            _ => Ok(self),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
