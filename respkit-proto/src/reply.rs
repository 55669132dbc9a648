//! # Reply Values
//!
//! Purpose: Represent one decoded server reply, covering every RESP2 and
//! RESP3 reply kind the client understands.
//!
//! ## Design Principles
//! 1. **One Variant Active**: Each reply is exactly one tagged variant.
//! 2. **Null Is Not Empty**: `Bulk(None)` and `Array(None)` are kept apart from
//!    `Bulk(Some(empty))` and `Array(Some(vec![]))`.
//! 3. **Owned Payloads**: Bulk data is stored as `Bytes` so replies can outlive
//!    the read buffer they were parsed from.

use bytes::Bytes;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// RESP3 `_` null.
    Null,
    /// `+OK` style status lines.
    Status(String),
    /// `-ERR ...` or RESP3 `!` bulk errors, split into code and message.
    Error { code: String, message: String },
    /// `:123` integers.
    Integer(i64),
    /// RESP3 `,3.14` doubles.
    Double(f64),
    /// RESP3 `#t` / `#f` booleans.
    Boolean(bool),
    /// `$...` bulk strings, with None for `$-1`.
    Bulk(Option<Bytes>),
    /// RESP3 `=...` verbatim strings; `format` is the three-byte type such as `txt`.
    Verbatim { format: [u8; 3], data: Bytes },
    /// RESP3 `(...` big numbers, kept as decimal text.
    BigNumber(String),
    /// `*...` arrays, with None for `*-1`.
    Array(Option<Vec<Reply>>),
    /// RESP3 `%...` maps in wire order.
    Map(Vec<(Reply, Reply)>),
    /// RESP3 `~...` sets in wire order.
    Set(Vec<Reply>),
    /// RESP3 `>...` out-of-band pushes.
    Push(Vec<Reply>),
}

impl Reply {
    /// Builds an error reply from the raw line text (`ERR unknown command`).
    pub fn error_from_text(text: &str) -> Reply {
        let (code, message) = match text.split_once(' ') {
            Some((code, rest)) => (code.to_string(), rest.to_string()),
            None => (text.to_string(), String::new()),
        };
        Reply::Error { code, message }
    }

    /// Convenience constructor for a present bulk string.
    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(Some(data.into()))
    }

    /// Convenience constructor for a present array.
    pub fn array(items: Vec<Reply>) -> Reply {
        Reply::Array(Some(items))
    }

    /// Returns true for `Null`, `Bulk(None)` and `Array(None)`.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null | Reply::Bulk(None) | Reply::Array(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    /// Short, stable name of the active variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Null => "null",
            Reply::Status(_) => "status",
            Reply::Error { .. } => "error",
            Reply::Integer(_) => "integer",
            Reply::Double(_) => "double",
            Reply::Boolean(_) => "boolean",
            Reply::Bulk(None) => "null bulk",
            Reply::Bulk(Some(_)) => "bulk",
            Reply::Verbatim { .. } => "verbatim",
            Reply::BigNumber(_) => "big number",
            Reply::Array(None) => "null array",
            Reply::Array(Some(_)) => "array",
            Reply::Map(_) => "map",
            Reply::Set(_) => "set",
            Reply::Push(_) => "push",
        }
    }

    /// Raw bytes of a textual reply (status, bulk, verbatim or big number).
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Status(text) | Reply::BigNumber(text) => Some(text.as_bytes()),
            Reply::Bulk(Some(data)) => Some(data),
            Reply::Verbatim { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Full error line (`CODE message`) when this is an error reply.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Reply::Error { code, message } if message.is_empty() => Some(code.clone()),
            Reply::Error { code, message } => Some(format!("{} {}", code, message)),
            _ => None,
        }
    }
}
