//! # respkit Client
//!
//! Purpose: Execute typed Redis commands over pooled RESP connections from
//! many threads or tasks at once, with one blocking and one async call path.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A bounded pool leases each connection to one caller at a time.
//! 2. **Facade Pattern**: `Client` / `AsyncClient` hide pooling, framing and retries.
//! 3. **Declared Shapes**: Callers name the reply shape they expect and get a typed
//!    value or a typed error, never a guess.
//! 4. **Fail Fast**: Protocol violations and server errors surface immediately.
//!
//! ## Layout
//! - `command`: argument builder handed to the dispatcher.
//! - `connection` / `async_connection`: one transport each, with handshake.
//! - `pool`: generic lease pool shared by both transports.
//! - `coerce`: reply-to-type conversion rules.
//! - `client` / `async_client`: the dispatchers; `commands`: thin builders.
//! - `tls` (feature `tls`): rustls settings for both transports.

mod async_client;
mod async_connection;
mod cancel;
mod client;
pub mod coerce;
pub mod commands;
mod command;
mod config;
mod connection;
mod error;
mod number;
pub mod pool;
#[cfg(feature = "tls")]
mod tls;

pub use async_client::AsyncClient;
pub use async_connection::AsyncConnection;
pub use cancel::CancellationToken;
pub use client::{Client, ExecuteOptions};
pub use coerce::{CallCondition, ResultShape, ScanPage};
pub use command::{Command, ToArg};
pub use commands::Call;
pub use config::{ClientConfig, ProtocolVersion, RetryMode, RetryPolicy, TlsConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use number::NumberValue;
pub use pool::{Lease, Pool, PoolConfig, PoolStatus, Poolable};

pub use respkit_proto::{DecodeLimits, Reply};
