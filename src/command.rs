//! Immutable command values and reply normalization.

use bytes::Bytes;

use crate::error::{RedustError, Result};
use crate::resp::types::{Group, RespValue, Response};

/// An ordered list of byte-string arguments, command name first.
///
/// Arguments never carry RESP framing; length prefixes are added by the
/// writer. A `None` argument is sent as a null bulk string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Option<Bytes>>,
}

impl Command {
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![Some(name.into())],
        }
    }

    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(Some(arg.into()));
        self
    }

    /// Append a copy of a borrowed argument.
    pub fn arg_slice(mut self, arg: &[u8]) -> Self {
        self.args.push(Some(Bytes::copy_from_slice(arg)));
        self
    }

    pub fn null_arg(mut self) -> Self {
        self.args.push(None);
        self
    }

    pub fn int_arg<I: itoa::Integer>(self, n: I) -> Self {
        let mut buf = itoa::Buffer::new();
        self.arg_slice(buf.format(n).as_bytes())
    }

    pub fn args_from<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(|a| Some(a.into())));
        self
    }

    pub fn args(&self) -> &[Option<Bytes>] {
        &self.args
    }

    /// The command name as sent.
    pub fn name(&self) -> &[u8] {
        self.args
            .first()
            .and_then(|a| a.as_deref())
            .unwrap_or_default()
    }

    /// Lossy name for logs and diagnostics.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name()).into_owned()
    }

    /// `SCAN`, `HSCAN`, `SSCAN` and `ZSCAN` (case-insensitive).
    pub fn is_scan_family(&self) -> bool {
        let name = self.name();
        [&b"SCAN"[..], b"HSCAN", b"SSCAN", b"ZSCAN"]
            .iter()
            .any(|n| name.eq_ignore_ascii_case(n))
    }

    /// Wrap a decoded reply for this command, flattening scan replies into
    /// `cursor` + array.
    pub fn normalize(&self, value: RespValue) -> Result<Response> {
        if !self.is_scan_family() || matches!(value, RespValue::Error(_)) {
            return Ok(Response::new(value));
        }
        match value {
            RespValue::ArrayOfArrays(groups) => match <[Group; 2]>::try_from(groups) {
                Ok([Group::Scalar(Some(cursor)), Group::Nested(items)]) => {
                    Ok(Response::scan(parse_cursor(&cursor)?, items))
                }
                Ok(_) => Err(RedustError::Protocol(format!(
                    "{} reply is not a cursor followed by an array",
                    self.name_lossy()
                ))),
                Err(groups) => Err(RedustError::Protocol(format!(
                    "{} reply has {} elements",
                    self.name_lossy(),
                    groups.len()
                ))),
            },
            other => Err(RedustError::Protocol(format!(
                "unexpected {} reply to {}",
                other.type_name(),
                self.name_lossy()
            ))),
        }
    }
}

fn parse_cursor(raw: &Bytes) -> Result<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            RedustError::Protocol(format!(
                "scan cursor is not a non-negative integer: {:?}",
                String::from_utf8_lossy(raw)
            ))
        })
}

/// Build a [`Command`] from a name and arguments.
///
/// ```ignore
/// let cmd = cmd!("HSET", "users", "alice", "42");
/// ```
#[macro_export]
macro_rules! cmd {
    ($name:expr $(, $arg:expr)* $(,)?) => {{
        $crate::command::Command::new($name)$(.arg($arg))*
    }};
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::parser::parse_slice;

    fn b(s: &'static [u8]) -> Option<Bytes> {
        Some(Bytes::from_static(s))
    }

    #[test]
    fn builder() {
        let cmd = Command::new("HSCAN").arg("h").int_arg(0).arg_slice(b"COUNT").int_arg(-5);
        assert_eq!(cmd.name(), b"HSCAN");
        assert_eq!(cmd.args(), &[b(b"HSCAN"), b(b"h"), b(b"0"), b(b"COUNT"), b(b"-5")]);
    }

    #[test]
    fn args_from_iter() {
        let cmd = Command::new("HMGET").arg("h").args_from(vec!["a", "b"]);
        assert_eq!(cmd.args().len(), 4);
    }

    #[test]
    fn macro_builds_command() {
        let cmd = cmd!("SET", "k", "v");
        assert_eq!(cmd, Command::new("SET").arg("k").arg("v"));
        assert_eq!(cmd!("PING").args().len(), 1);
    }

    #[test]
    fn scan_family_detection() {
        assert!(cmd!("SCAN", "0").is_scan_family());
        assert!(cmd!("hscan", "h", "0").is_scan_family());
        assert!(cmd!("SSCAN", "s", "0").is_scan_family());
        assert!(cmd!("ZSCAN", "z", "0").is_scan_family());
        assert!(!cmd!("HGETALL", "h").is_scan_family());
    }

    #[test]
    fn normalize_scan_reply() {
        let (val, _) = parse_slice(b"*2\r\n$1\r\n0\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n").unwrap();
        let resp = cmd!("HSCAN", "h", "0").normalize(val).unwrap();
        assert_eq!(resp.cursor(), Some(0));
        assert_eq!(resp.array().unwrap(), &[b(b"a"), b(b"b")]);
    }

    #[test]
    fn normalize_scan_reply_large_cursor() {
        let (val, _) = parse_slice(b"*2\r\n$20\r\n18446744073709551615\r\n*0\r\n").unwrap();
        let resp = cmd!("SCAN", "0").normalize(val).unwrap();
        assert_eq!(resp.cursor(), Some(u64::MAX));
        assert_eq!(resp.array().unwrap().len(), 0);
    }

    #[test]
    fn normalize_scan_wrong_shape() {
        let (val, _) = parse_slice(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n").unwrap();
        assert!(matches!(
            cmd!("HSCAN", "h", "0").normalize(val),
            Err(RedustError::Protocol(_))
        ));

        let (val, _) = parse_slice(b"*2\r\n$2\r\n-3\r\n*0\r\n").unwrap();
        assert!(matches!(
            cmd!("HSCAN", "h", "0").normalize(val),
            Err(RedustError::Protocol(_))
        ));
    }

    #[test]
    fn normalize_scan_rejects_nested_cursor() {
        for input in [
            &b"*2\r\n*1\r\n$1\r\n0\r\n*0\r\n"[..],
            b"*2\r\n$1\r\n0\r\n$1\r\na\r\n",
            b"*2\r\n$-1\r\n*0\r\n",
            b"*3\r\n$1\r\n0\r\n*0\r\n*0\r\n",
        ] {
            let (val, _) = parse_slice(input).unwrap();
            assert!(
                matches!(cmd!("HSCAN", "h", "0").normalize(val), Err(RedustError::Protocol(_))),
                "{:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn normalize_scan_error_passes_through() {
        let resp = cmd!("HSCAN", "h", "x")
            .normalize(RespValue::Error("ERR invalid cursor".into()))
            .unwrap();
        assert_eq!(resp.error(), Some("ERR invalid cursor"));
    }

    #[test]
    fn normalize_other_commands_untouched() {
        let (val, _) = parse_slice(b"*2\r\n$1\r\n0\r\n*1\r\n$1\r\na\r\n").unwrap();
        let resp = cmd!("EXEC").normalize(val.clone()).unwrap();
        assert_eq!(resp.value, val);
        assert_eq!(resp.cursor(), None);
    }
}
