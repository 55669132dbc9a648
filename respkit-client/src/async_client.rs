//! # Async Client API
//!
//! Purpose: The tokio counterpart of [`Client`](crate::Client), with the same
//! retry, health and coercion rules. Pool waits and socket I/O suspend the
//! task instead of blocking a thread.
//!
//! Dropping an `execute` future is a valid way to cancel: a queued wait
//! leaves the pool queue and a half-finished exchange discards its connection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::async_connection::AsyncConnection;
use crate::cancel::{self, CancellationToken};
use crate::client::{classify, should_retry, ExecuteOptions, Failure};
use crate::coerce::{self, ResultShape};
use crate::command::Command;
use crate::commands::Call;
use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::error::{ClientError, ClientResult};
use crate::pool::{Pool, PoolStatus};

/// Async client with connection pooling; clones share the pool.
#[derive(Clone)]
pub struct AsyncClient {
    pool: Pool<AsyncConnection>,
    config: Arc<ClientConfig>,
}

impl AsyncClient {
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr))
    }

    /// Creates a client with a custom configuration. Connections are opened lazily.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = Pool::new(config.pool_config())?;
        Ok(AsyncClient {
            pool,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool<AsyncConnection> {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub async fn execute<S: ResultShape>(&self, command: &Command, shape: &S) -> ClientResult<S::Output> {
        self.execute_with(command, shape, &ExecuteOptions::default()).await
    }

    pub async fn call<S: ResultShape>(&self, call: Call<S>) -> ClientResult<S::Output> {
        self.execute_with(&call.command, &call.shape, &ExecuteOptions::default())
            .await
    }

    pub async fn call_with<S: ResultShape>(&self, call: Call<S>, options: &ExecuteOptions) -> ClientResult<S::Output> {
        self.execute_with(&call.command, &call.shape, options).await
    }

    /// Runs `command` with per-call timeout and cancellation, retrying
    /// connection failures as the retry policy allows.
    pub async fn execute_with<S: ResultShape>(
        &self,
        command: &Command,
        shape: &S,
        options: &ExecuteOptions,
    ) -> ClientResult<S::Output> {
        let cancel = options.cancel.as_ref();
        let mut attempt = 1;
        loop {
            let failure = match self.attempt(command, shape, options).await {
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
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry.delay(attempt)) => {}
                _ = cancel::wait_cancelled(cancel) => return Err(ClientError::Cancelled),
            }
            attempt += 1;
        }
    }

    async fn attempt<S: ResultShape>(
        &self,
        command: &Command,
        shape: &S,
        options: &ExecuteOptions,
    ) -> Result<S::Output, Failure> {
        let cancel: Option<&CancellationToken> = options.cancel.as_ref();
        let mut lease = self
            .pool
            .acquire(options.acquire_timeout(&self.config), cancel, || {
                AsyncConnection::open(&self.config)
            })
            .await
            .map_err(|err| Failure::unsent(classify(err, cancel)))?;

        let result = lease.send_and_receive(command, cancel).await;
        let healthy = lease.state() != ConnectionState::Broken;
        if !healthy {
            debug!(conn = lease.id(), command = %command.name(), "releasing broken connection");
        }
        self.pool.release(lease, healthy).map_err(Failure::unsent)?;

        let reply = result.map_err(|err| match err {
            ClientError::Cancelled if healthy => Failure::unsent(err),
            err => Failure::sent(err),
        })?;
        coerce::coerce(shape, reply, &command.name()).map_err(Failure::sent)
    }

    /// Closes idle connections and fails every waiting and future call.
    pub fn dispose(&self) {
        self.pool.dispose();
    }
}
