//! # Client Errors
//!
//! Purpose: One inspectable error type for every failure the client can
//! surface, grouped into the categories callers branch on.
//!
//! ## Categories
//! - Protocol: malformed bytes; the connection is discarded.
//! - Server: a well-formed error reply; the connection stays healthy.
//! - Connection: socket, TLS, handshake or pool-capacity failures; eligible for retry.
//! - ShapeMismatch: the reply does not fit the declared shape; never retried.
//! - Cancelled: the caller abandoned the call.
//! - Usage: the caller misused the API.

use std::io;

use respkit_proto::{ProtocolError, ReadError};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Server,
    Connection,
    ShapeMismatch,
    Cancelled,
    Usage,
}

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// RESP framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server returned an error reply.
    #[error("server error from {command}: {code} {message}")]
    Server {
        command: String,
        code: String,
        message: String,
    },

    /// A connection setup step (AUTH, HELLO, SELECT, ...) was refused.
    #[error("handshake failed at {step}: {message}")]
    Handshake { step: &'static str, message: String },

    /// TLS setup failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Reply did not match the declared result shape.
    #[error("unexpected reply to {command}: expected {expected}, got {actual}")]
    UnexpectedReply {
        command: String,
        expected: &'static str,
        actual: String,
    },

    /// Reply carried a status the client does not know, usually a server version mismatch.
    #[error("unknown {enum_name} value {value:?} in reply to {command}")]
    UnknownEnumValue {
        command: String,
        enum_name: &'static str,
        value: String,
    },

    /// Numeric text could not be projected to the requested representation.
    #[error("cannot read {text:?} as {target}")]
    InvalidNumber { text: String, target: &'static str },

    /// No connection became available before the acquire timeout.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The pool was disposed.
    #[error("connection pool closed")]
    PoolClosed,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A lease was handed to a pool that did not issue it.
    #[error("connection does not belong to this pool")]
    ForeignConnection,

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration values are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Returns the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Protocol(_) | ClientError::UnknownEnumValue { .. } => ErrorKind::Protocol,
            ClientError::Server { .. } => ErrorKind::Server,
            ClientError::Io(_)
            | ClientError::Handshake { .. }
            | ClientError::Tls(_)
            | ClientError::PoolExhausted
            | ClientError::PoolClosed => ErrorKind::Connection,
            ClientError::UnexpectedReply { .. } | ClientError::InvalidNumber { .. } => {
                ErrorKind::ShapeMismatch
            }
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::ForeignConnection
            | ClientError::InvalidAddress(_)
            | ClientError::InvalidConfig(_) => ErrorKind::Usage,
        }
    }

    /// True for transport failures that a fresh connection may not repeat.
    ///
    /// Pool exhaustion and pool closure are connection-category errors but
    /// retrying them would only wait again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Handshake { .. } | ClientError::Tls(_)
        )
    }

    /// Server error code (`WRONGTYPE`, `NOAUTH`, ...) for server errors.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            ClientError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<ReadError> for ClientError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Io(err) => ClientError::Io(err),
            ReadError::Protocol(err) => ClientError::Protocol(err),
        }
    }
}
