//! RESP command serializer.
//!
//! Encodes commands into the RESP multi-bulk wire format:
//! `*<N>\r\n$<len>\r\narg1\r\n$<len>\r\narg2\r\n…`, with `$-1\r\n` for a
//! null argument. Everything is appended to a growable [`BytesMut`] so a
//! command (or a whole pipeline) leaves in one contiguous write.

use bytes::{BufMut, Bytes, BytesMut};
use itoa::Buffer;

use crate::command::Command;

/// Upper bound of the bytes needed to frame one command, payload excluded.
fn framing_capacity(cmd: &Command) -> usize {
    // '*' + digits + \r\n, then per arg '$' + digits + \r\n + data + \r\n
    let mut cap = 1 + 20 + 2;
    for arg in cmd.args() {
        cap += 1 + 20 + 2 + arg.as_ref().map_or(0, |a| a.len() + 2);
    }
    cap
}

/// Append the RESP encoding of `cmd` to `buf`.
pub fn encode_command_into(cmd: &Command, buf: &mut BytesMut) {
    buf.reserve(framing_capacity(cmd));
    let mut itoa_buf = Buffer::new();

    // *<N>\r\n
    buf.put_u8(b'*');
    buf.extend_from_slice(itoa_buf.format(cmd.args().len()).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in cmd.args() {
        match arg {
            // $<len>\r\n<data>\r\n
            Some(data) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(itoa_buf.format(data.len()).as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            None => buf.extend_from_slice(b"$-1\r\n"),
        }
    }
}

/// Encode a single command into a frozen buffer.
pub fn encode_command(cmd: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(framing_capacity(cmd));
    encode_command_into(cmd, &mut buf);
    buf.freeze()
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd;

    #[test]
    fn encode_single_arg() {
        assert_eq!(&encode_command(&cmd!("PING"))[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn encode_set() {
        assert_eq!(
            &encode_command(&cmd!("SET", "k", "v"))[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"
        );
    }

    #[test]
    fn encode_empty_arg() {
        assert_eq!(
            &encode_command(&cmd!("SET", "key", ""))[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$0\r\n\r\n"
        );
    }

    #[test]
    fn encode_null_arg() {
        let cmd = Command::new("HSET").arg("h").arg("f").null_arg();
        assert_eq!(
            &encode_command(&cmd)[..],
            b"*4\r\n$4\r\nHSET\r\n$1\r\nh\r\n$1\r\nf\r\n$-1\r\n"
        );
    }

    #[test]
    fn encode_binary_arg() {
        let cmd = Command::new("SET").arg("key").arg(vec![0x00u8, 0x01, 0xFF]);
        assert_eq!(
            &encode_command(&cmd)[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\n\x00\x01\xFF\r\n"
        );
    }

    #[test]
    fn encode_arg_with_crlf() {
        assert_eq!(
            &encode_command(&cmd!("SET", "key", "val\r\nue"))[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$7\r\nval\r\nue\r\n"
        );
    }

    #[test]
    fn encode_large_arg() {
        let big = vec![b'x'; 10_000];
        let out = encode_command(&Command::new("SET").arg("key").arg(big));
        assert!(out.starts_with(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$10000\r\n"));
        assert!(out.ends_with(b"x\r\n"));
    }

    #[test]
    fn encode_into_appends() {
        let mut buf = BytesMut::from(&b"prefix"[..]);
        encode_command_into(&cmd!("PING"), &mut buf);
        assert_eq!(&buf[..], b"prefix*1\r\n$4\r\nPING\r\n");
    }

    // ── Round-trip: encode → parse ──

    #[test]
    fn roundtrip_encode_parse() {
        use crate::resp::parser::parse;
        use crate::resp::types::RespValue;

        let wire = encode_command(&Command::new("ECHO").arg(vec![0u8, b'\r', b'\n']).arg(""));
        let (val, consumed) = parse(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(
            val,
            RespValue::Array(vec![
                Some(Bytes::from_static(b"ECHO")),
                Some(Bytes::from_static(b"\x00\r\n")),
                Some(Bytes::new()),
            ])
        );
    }
}
