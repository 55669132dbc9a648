//! # RESP Encoding
//!
//! Purpose: Serialize commands into RESP2 request frames, and replies into
//! RESP2/RESP3 frames for servers and test doubles.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: Callers pass the output buffer to avoid per-call allocations.
//! 2. **Binary-Safe**: Arguments are written as length-prefixed bulk strings verbatim.

use crate::reply::Reply;

/// Encodes a RESP2 array-of-bulk-strings command into `out`.
///
/// `*<argc>\r\n` followed by `$<len>\r\n<bytes>\r\n` per argument.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Encodes a reply value into `out`.
///
/// RESP3-only variants are written with their RESP3 prefixes, so the peer
/// must have negotiated RESP3 to read them.
pub fn encode_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Null => out.extend_from_slice(b"_\r\n"),
        Reply::Status(text) => {
            out.push(b'+');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error { .. } => {
            out.push(b'-');
            if let Some(text) = reply.error_text() {
                out.extend_from_slice(text.as_bytes());
            }
            out.extend_from_slice(b"\r\n");
        }
        Reply::Integer(value) => {
            out.push(b':');
            out.extend_from_slice(value.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Double(value) => {
            out.push(b',');
            if value.is_infinite() {
                out.extend_from_slice(if *value > 0.0 { b"inf" } else { b"-inf" });
            } else if value.is_nan() {
                out.extend_from_slice(b"nan");
            } else {
                out.extend_from_slice(value.to_string().as_bytes());
            }
            out.extend_from_slice(b"\r\n");
        }
        Reply::Boolean(value) => {
            out.extend_from_slice(if *value { b"#t\r\n" } else { b"#f\r\n" });
        }
        Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        Reply::Bulk(Some(data)) => push_blob(out, b'$', data),
        Reply::Verbatim { format, data } => {
            out.push(b'=');
            push_usize(out, data.len() + 4);
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(format);
            out.push(b':');
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        Reply::BigNumber(text) => {
            out.push(b'(');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        Reply::Array(Some(items)) => push_aggregate(out, b'*', items),
        Reply::Set(items) => push_aggregate(out, b'~', items),
        Reply::Push(items) => push_aggregate(out, b'>', items),
        Reply::Map(entries) => {
            out.push(b'%');
            push_usize(out, entries.len());
            out.extend_from_slice(b"\r\n");
            for (key, value) in entries {
                encode_reply(key, out);
                encode_reply(value, out);
            }
        }
    }
}

fn push_blob(out: &mut Vec<u8>, prefix: u8, data: &[u8]) {
    out.push(prefix);
    push_usize(out, data.len());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn push_aggregate(out: &mut Vec<u8>, prefix: u8, items: &[Reply]) {
    out.push(prefix);
    push_usize(out, items.len());
    out.extend_from_slice(b"\r\n");
    for item in items {
        encode_reply(item, out);
    }
}

pub(crate) fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go into a small stack buffer first.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
