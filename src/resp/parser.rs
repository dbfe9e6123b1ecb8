//! Streaming RESP2 parser.
//!
//! [`parse`] takes the accumulation buffer and returns
//! `Ok((RespValue, bytes_consumed))`, `Err(Incomplete)` when more data is
//! needed, or `Err(Protocol(…))` on malformed input. Callers keep every
//! byte past `bytes_consumed` for the next reply: on a pipelined stream it
//! already belongs to the following response.
//!
//! Bulk strings are extracted via zero-copy `Bytes::slice()`.

use bytes::Bytes;
use memchr::memchr;

use crate::error::{RedustError, Result};
use crate::resp::types::{Group, RespValue};

/// Upper bound for preallocating element vectors from an untrusted count.
const MAX_PREALLOC: usize = 1024;

/// Parse one RESP value from the front of `buf`.
///
/// Returns `(value, bytes_consumed)` on success.
/// Returns `Err(Incomplete)` when the buffer is too short; callers should
/// read more data and retry.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    if buf.is_empty() {
        return Err(RedustError::Incomplete);
    }

    match buf[0] {
        b'+' => {
            let (line, next) = read_line(buf, 1)?;
            Ok((RespValue::Simple(buf.slice(line)), next))
        }
        b'-' => {
            let (line, next) = read_line(buf, 1)?;
            let msg = std::str::from_utf8(&buf[line])
                .map_err(|e| RedustError::Protocol(format!("invalid UTF-8 in error: {e}")))?
                .to_string();
            Ok((RespValue::Error(msg), next))
        }
        b':' => {
            let (line, next) = read_line(buf, 1)?;
            Ok((RespValue::Integer(parse_int_from_bytes(&buf[line])?), next))
        }
        b'$' => {
            let (data, next) = parse_bulk_string(buf, 0)?;
            Ok((RespValue::Bulk(data), next))
        }
        b'*' => parse_array(buf),
        other => Err(RedustError::Protocol(format!(
            "unknown RESP type byte: 0x{other:02x}"
        ))),
    }
}

/// Convenience wrapper: parse from a byte slice (copies into `Bytes` first).
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

// ── Helpers ────────────────────────────────────────────────────────

/// Find the next `\r\n` in `buf` starting at `offset`.
/// Returns the index of `\r`.
#[inline]
fn find_crlf(buf: &[u8], offset: usize) -> Result<usize> {
    if offset >= buf.len() {
        return Err(RedustError::Incomplete);
    }
    match memchr(b'\r', &buf[offset..]) {
        Some(pos) => {
            let abs = offset + pos;
            if abs + 1 >= buf.len() {
                Err(RedustError::Incomplete)
            } else if buf[abs + 1] == b'\n' {
                Ok(abs)
            } else {
                Err(RedustError::Protocol("expected \\n after \\r".into()))
            }
        }
        None => Err(RedustError::Incomplete),
    }
}

/// Locate the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_range, index_after_crlf)`.
#[inline]
fn read_line(buf: &[u8], offset: usize) -> Result<(std::ops::Range<usize>, usize)> {
    let cr = find_crlf(buf, offset)?;
    Ok((offset..cr, cr + 2))
}

/// Parse an integer from a byte slice (no allocations).
fn parse_int_from_bytes(bytes: &[u8]) -> Result<i64> {
    let (negative, digits) = match bytes.first() {
        None => return Err(RedustError::Protocol("empty integer".into())),
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        Some(_) => (false, bytes),
    };

    if digits.is_empty() {
        return Err(RedustError::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative so i64::MIN fits.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RedustError::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| RedustError::Protocol("integer overflow".into()))?;
    }

    if negative {
        Ok(n)
    } else {
        n.checked_neg()
            .ok_or_else(|| RedustError::Protocol("integer overflow".into()))
    }
}

/// Parse an element count / bulk length header and convert negatives
/// (other than `-1`) into protocol errors.
fn parse_len(bytes: &[u8]) -> Result<Option<usize>> {
    match parse_int_from_bytes(bytes)? {
        -1 => Ok(None),
        n if n < 0 => Err(RedustError::Protocol(format!("invalid length: {n}"))),
        n => Ok(Some(n as usize)),
    }
}

// ── Type parsers ──────────────────────────────────────────────────

/// `$<length>\r\n<data>\r\n`  or  `$-1\r\n`, starting at `buf[offset]`.
///
/// **Zero-copy**: uses `buf.slice()` to share the underlying allocation.
fn parse_bulk_string(buf: &Bytes, offset: usize) -> Result<(Option<Bytes>, usize)> {
    let (line, next) = read_line(buf, offset + 1)?;
    let len = match parse_len(&buf[line])? {
        Some(len) => len,
        None => return Ok((None, next)),
    };

    let data_end = next + len;
    // Need data + \r\n
    if buf.len() < data_end + 2 {
        return Err(RedustError::Incomplete);
    }
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(RedustError::Protocol(
            "bulk string not terminated by \\r\\n".into(),
        ));
    }
    Ok((Some(buf.slice(next..data_end)), data_end + 2))
}

/// One non-array array element. Simple strings and integers inside arrays
/// are kept as their textual bytes.
fn parse_element(buf: &Bytes, offset: usize) -> Result<(Option<Bytes>, usize)> {
    match buf.get(offset) {
        None => Err(RedustError::Incomplete),
        Some(b'$') => parse_bulk_string(buf, offset),
        Some(b'+') | Some(b':') | Some(b'-') => {
            let (line, next) = read_line(buf, offset + 1)?;
            Ok((Some(buf.slice(line)), next))
        }
        Some(other) => Err(RedustError::Protocol(format!(
            "unknown RESP type byte in array: 0x{other:02x}"
        ))),
    }
}

/// `*<count>\r\n<elements>` nested one level inside an outer array.
fn parse_nested_array(buf: &Bytes, offset: usize) -> Result<(Vec<Option<Bytes>>, usize)> {
    let (line, mut next) = read_line(buf, offset + 1)?;
    let count = match parse_len(&buf[line])? {
        Some(count) => count,
        None => return Ok((vec![None], next)),
    };

    let mut elements = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        if buf.get(next) == Some(&b'*') {
            return Err(RedustError::Protocol(
                "array nesting deeper than two levels".into(),
            ));
        }
        let (elem, after) = parse_element(buf, next)?;
        elements.push(elem);
        next = after;
    }
    Ok((elements, next))
}

/// `*<count>\r\n<elements>`  or  `*-1\r\n`
///
/// A null array decodes as a one-element array holding a null. As soon as
/// a nested array shows up the reply switches to `ArrayOfArrays`.
fn parse_array(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, mut next) = read_line(buf, 1)?;
    let count = match parse_len(&buf[line])? {
        Some(count) => count,
        None => return Ok((RespValue::Array(vec![None]), next)),
    };

    let mut flat: Vec<Option<Bytes>> = Vec::with_capacity(count.min(MAX_PREALLOC));
    let mut groups: Option<Vec<Group>> = None;
    for _ in 0..count {
        if buf.get(next) == Some(&b'*') {
            let (inner, after) = parse_nested_array(buf, next)?;
            groups
                .get_or_insert_with(|| flat.drain(..).map(Group::Scalar).collect())
                .push(Group::Nested(inner));
            next = after;
        } else {
            let (elem, after) = parse_element(buf, next)?;
            match groups.as_mut() {
                Some(groups) => groups.push(Group::Scalar(elem)),
                None => flat.push(elem),
            }
            next = after;
        }
    }

    let value = match groups {
        Some(groups) => RespValue::ArrayOfArrays(groups),
        None => RespValue::Array(flat),
    };
    Ok((value, next))
}

// ── Tests ──────────────────────────────────────────────────────────
