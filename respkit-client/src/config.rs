//! # Client Configuration
//!
//! Purpose: Collect the knobs consumed by connections, the pool and the
//! dispatcher in one serde-friendly struct.

use std::time::Duration;

use respkit_proto::DecodeLimits;
use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;

/// Protocol version requested during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Plain RESP2; no HELLO is sent.
    #[default]
    Resp2,
    /// Sends `HELLO 3` after connecting.
    Resp3,
}

/// When a failed call is re-sent on a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Never retry.
    Never,
    /// Retry commands marked idempotent, plus any failure before the request was written.
    #[default]
    IdempotentOnly,
    /// Retry every connection failure, accepting possible double execution.
    Always,
}

/// Bounded retry policy applied to connection-category failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause before each retry, multiplied by the retry number.
    pub backoff: Duration,
    pub mode: RetryMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
            mode: RetryMode::IdempotentOnly,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn never() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
            mode: RetryMode::Never,
        }
    }

    /// Decides whether attempt number `attempt` (1-based) may be followed by another.
    ///
    /// `sent` tells whether request bytes may have reached the server.
    pub fn allows_retry(&self, attempt: u32, sent: bool, idempotent: bool) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match self.mode {
            RetryMode::Never => false,
            RetryMode::IdempotentOnly => !sent || idempotent,
            RetryMode::Always => true,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(retry)
    }
}

/// TLS settings, honoured when the crate is built with the `tls` feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// SNI / certificate name; defaults to the host part of `addr`.
    pub server_name: Option<String>,
}

/// Configuration for the clients and their pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum total connections (idle + in-use).
    pub max_pool_size: usize,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// ACL username; only used together with `password`.
    pub username: Option<String>,
    /// Password sent with AUTH (or HELLO AUTH under RESP3).
    pub password: Option<String>,
    /// Database index selected after connecting; 0 sends no SELECT.
    pub database: i64,
    pub protocol: ProtocolVersion,
    /// Name registered through CLIENT SETNAME.
    pub client_name: Option<String>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Default bound on waiting for a pooled connection; None waits indefinitely.
    pub acquire_timeout: Option<Duration>,
    pub tls: Option<TlsConfig>,
    pub retry: RetryPolicy,
    #[serde(skip)]
    pub decode_limits: DecodeLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_pool_size: 16,
            max_idle: 8,
            idle_timeout: None,
            username: None,
            password: None,
            database: 0,
            protocol: ProtocolVersion::Resp2,
            client_name: None,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            acquire_timeout: None,
            tls: None,
            retry: RetryPolicy::default(),
            decode_limits: DecodeLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.max_pool_size,
            max_idle: self.max_idle,
            idle_timeout: self.idle_timeout,
        }
    }

    /// Host part of `addr`, used as the default TLS server name.
    #[cfg_attr(not(feature = "tls"), allow(dead_code))]
    pub(crate) fn host(&self) -> &str {
        let host = match self.addr.rsplit_once(':') {
            Some((host, _port)) => host,
            None => &self.addr,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}
