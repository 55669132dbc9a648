//! Protocol errors raised by the decoder.
//!
//! Every variant means the byte stream can no longer be trusted; the owning
//! connection must be discarded.

/// Malformed RESP framing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Leading type byte is not a known RESP2/RESP3 prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Integer or length field is not a valid decimal.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Length prefix is negative (other than -1) or otherwise unusable.
    #[error("invalid length prefix: {0}")]
    InvalidLength(i64),

    /// A status, error or length line ran past the configured maximum.
    #[error("line too long: exceeds {max} byte limit")]
    LineTooLong { max: usize },

    /// A frame ended before the content its headers announced.
    #[error("frame truncated")]
    TruncatedFrame,

    /// A line or bulk payload was not terminated by CRLF.
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// RESP3 double was not a valid float.
    #[error("invalid double: {0}")]
    InvalidDouble(String),

    /// RESP3 boolean was neither `t` nor `f`.
    #[error("invalid boolean")]
    InvalidBoolean,

    /// RESP3 big number contained non-digit characters.
    #[error("invalid big number: {0}")]
    InvalidBigNumber(String),

    /// RESP3 verbatim string lacked its `fmt:` header.
    #[error("invalid verbatim string")]
    InvalidVerbatim,

    /// Nested aggregates exceeded the configured depth.
    #[error("nesting too deep: depth {0} exceeds limit")]
    NestingTooDeep(usize),

    /// Bulk payload length exceeded the configured maximum.
    #[error("bulk string too long: {len} bytes exceeds {max} byte limit")]
    BulkTooLong { len: usize, max: usize },

    /// Aggregate element count exceeded the configured maximum.
    #[error("aggregate too large: {len} elements exceeds {max}")]
    AggregateTooLong { len: usize, max: usize },
}
