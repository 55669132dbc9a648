//! # Synchronous Client API
//!
//! Purpose: Run one command end to end on the calling thread: lease a
//! connection, exchange the frames, coerce the reply, return the lease.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, framing and retries.
//! 2. **Single Funnel**: Every convenience call goes through `execute_with`.
//! 3. **Health by State**: A lease goes back healthy unless its exchange was
//!    interrupted; server error replies do not break a connection.
//! 4. **Bounded Retry**: Only connection failures are retried, and only when
//!    the retry policy says re-sending is safe.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::{self, CancellationToken};
use crate::coerce::{self, ResultShape};
use crate::command::Command;
use crate::commands::Call;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::{ClientError, ClientResult};
use crate::pool::{Pool, PoolStatus};

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Bound on waiting for a pooled connection; falls back to
    /// `ClientConfig::acquire_timeout`. Zero fails fast when the pool is full.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        ExecuteOptions::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn acquire_timeout(&self, config: &ClientConfig) -> Option<Duration> {
        self.timeout.or(config.acquire_timeout)
    }
}

/// A failed attempt; `sent` is false when no request byte can have left.
pub(crate) struct Failure {
    pub(crate) error: ClientError,
    pub(crate) sent: bool,
}

impl Failure {
    pub(crate) fn unsent(error: ClientError) -> Self {
        Failure { error, sent: false }
    }

    pub(crate) fn sent(error: ClientError) -> Self {
        Failure { error, sent: true }
    }
}

/// An I/O error caused by our own socket shutdown is reported as cancellation.
pub(crate) fn classify(error: ClientError, cancel: Option<&CancellationToken>) -> ClientError {
    match error {
        ClientError::Io(_) if cancel::is_cancelled(cancel) => ClientError::Cancelled,
        other => other,
    }
}

/// Decides whether `failure` on attempt `attempt` is followed by another attempt.
pub(crate) fn should_retry(
    config: &ClientConfig,
    command: &Command,
    failure: &Failure,
    attempt: u32,
) -> bool {
    failure.error.is_retryable()
        && config
            .retry
            .allows_retry(attempt, failure.sent, command.is_idempotent())
}

/// Synchronous client with connection pooling.
///
/// Clones share the pool. Each call leases one connection for one
/// request/reply exchange.
#[derive(Clone)]
pub struct Client {
    pool: Pool<Connection>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr))
    }

    /// Creates a client with a custom configuration. Connections are opened lazily.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = Pool::new(config.pool_config())?;
        Ok(Client {
            pool,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool<Connection> {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Runs `command` and coerces its reply with `shape`.
    pub fn execute<S: ResultShape>(&self, command: &Command, shape: &S) -> ClientResult<S::Output> {
        self.execute_with(command, shape, &ExecuteOptions::default())
    }

    /// Runs a prepared [`Call`].
    pub fn call<S: ResultShape>(&self, call: Call<S>) -> ClientResult<S::Output> {
        self.execute_with(&call.command, &call.shape, &ExecuteOptions::default())
    }

    pub fn call_with<S: ResultShape>(&self, call: Call<S>, options: &ExecuteOptions) -> ClientResult<S::Output> {
        self.execute_with(&call.command, &call.shape, options)
    }

    /// Runs `command` with per-call timeout and cancellation, retrying
    /// connection failures as the retry policy allows.
    pub fn execute_with<S: ResultShape>(
        &self,
        command: &Command,
        shape: &S,
        options: &ExecuteOptions,
    ) -> ClientResult<S::Output> {
        let cancel = options.cancel.as_ref();
        let mut attempt = 1;
        loop {
            let failure = match self.attempt(command, shape, options) {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            if !should_retry(&self.config, command, &failure, attempt) {
                return Err(failure.error);
            }
            warn!(
                command = %command.name(),
                attempt,
                error = %failure.error,
                "connection failure, retrying"
            );
            thread::sleep(self.config.retry.delay(attempt));
            if cancel::is_cancelled(cancel) {
                return Err(ClientError::Cancelled);
            }
            attempt += 1;
        }
    }

    fn attempt<S: ResultShape>(
        &self,
        command: &Command,
        shape: &S,
        options: &ExecuteOptions,
    ) -> Result<S::Output, Failure> {
        let cancel = options.cancel.as_ref();
        let mut lease = self
            .pool
            .acquire_blocking(options.acquire_timeout(&self.config), cancel, || {
                Connection::open_cancellable(&self.config, cancel)
            })
            .map_err(|err| Failure::unsent(classify(err, cancel)))?;

        let result = lease.send_and_receive(command, cancel);
        let healthy = lease.state() != ConnectionState::Broken;
        if !healthy {
            debug!(conn = lease.id(), command = %command.name(), "releasing broken connection");
        }
        self.pool.release(lease, healthy).map_err(Failure::unsent)?;

        let reply = result.map_err(|err| {
            let err = classify(err, cancel);
            match err {
                ClientError::Cancelled if healthy => Failure::unsent(err),
                err => Failure::sent(err),
            }
        })?;
        coerce::coerce(shape, reply, &command.name()).map_err(Failure::sent)
    }

    /// Closes idle connections and fails every waiting and future call.
    pub fn dispose(&self) {
        self.pool.dispose();
    }
}
