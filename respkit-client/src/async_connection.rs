//! # Async Connection
//!
//! Purpose: The tokio counterpart of [`Connection`](crate::Connection). Same
//! handshake, same bytes on the wire; the task suspends only on socket readiness.
//!
//! ## Design Principles
//! 1. **Shared Codec**: Replies are decoded incrementally from the read buffer
//!    with the same parser the blocking path uses.
//! 2. **Drop Is Cancel**: Dropping an in-flight exchange leaves the connection
//!    `Broken`, so the pool discards it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use respkit_proto::{decode_buffered, DecodeLimits, FrameScanner, Reply};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::cancel::{self, CancellationToken};
use crate::command::Command;
use crate::config::ClientConfig;
use crate::connection::{check_handshake, handshake_commands, next_connection_id, ConnectionState};
use crate::error::{ClientError, ClientResult};
use crate::pool::Poolable;

const READ_CHUNK: usize = 8 * 1024;

enum AsyncStream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncStream {
    fn socket(&self) -> &TcpStream {
        match self {
            AsyncStream::Tcp(stream) => stream,
            #[cfg(feature = "tls")]
            AsyncStream::Tls(stream) => stream.get_ref().0,
        }
    }
}

impl AsyncRead for AsyncStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AsyncStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Single async connection with reusable buffers.
pub struct AsyncConnection {
    id: u64,
    stream: AsyncStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    limits: DecodeLimits,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    state: ConnectionState,
}

impl AsyncConnection {
    /// Connects to `config.addr` and runs the handshake.
    pub async fn open(config: &ClientConfig) -> ClientResult<Self> {
        let addrs: Vec<_> = tokio::net::lookup_host(config.addr.as_str())
            .await
            .map_err(|_| ClientError::InvalidAddress(config.addr.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::InvalidAddress(config.addr.clone()));
        }
        let stream = with_timeout(config.connect_timeout, TcpStream::connect(&addrs[..])).await?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = AsyncConnection {
            id: next_connection_id(),
            stream: wrap_stream(stream, config).await?,
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: Vec::with_capacity(256),
            limits: config.decode_limits,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            state: ConnectionState::Idle,
        };
        for (step, command) in handshake_commands(config) {
            let reply = conn.send_and_receive(&command, None).await?;
            check_handshake(step, &reply)?;
            trace!(conn = conn.id, step, "handshake step ok");
        }
        debug!(conn = conn.id, addr = %config.addr, "async connection established");
        Ok(conn)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Writes `command` and reads exactly one reply.
    ///
    /// Cancellation through `cancel`, or dropping the future, leaves the
    /// connection `Broken` once I/O has started.
    pub async fn send_and_receive(
        &mut self,
        command: &Command,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<Reply> {
        if cancel::is_cancelled(cancel) {
            return Err(ClientError::Cancelled);
        }
        if matches!(self.state, ConnectionState::Broken | ConnectionState::Closed) {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is no longer usable",
            )));
        }

        let previous = self.state;
        self.state = ConnectionState::Broken;
        let reply = tokio::select! {
            reply = self.exchange(command) => reply?,
            _ = cancel::wait_cancelled(cancel) => return Err(ClientError::Cancelled),
        };
        self.state = previous;
        Ok(reply)
    }

    async fn exchange(&mut self, command: &Command) -> ClientResult<Reply> {
        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        let (stream, frame) = (&mut self.stream, &self.write_buf);
        with_timeout(self.write_timeout, async {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await?;

        let mut scanner = FrameScanner::new();
        loop {
            if let Some(reply) = decode_buffered(&mut self.read_buf, &mut scanner, &self.limits)? {
                if let Reply::Push(items) = &reply {
                    trace!(conn = self.id, len = items.len(), "skipping push frame");
                    continue;
                }
                return Ok(reply);
            }
            self.read_buf.reserve(READ_CHUNK);
            let read = with_timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf)).await?;
            if read == 0 {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-reply",
                )));
            }
        }
    }

    /// Cheap liveness probe; see [`Connection::is_alive`](crate::Connection::is_alive).
    pub fn is_alive(&mut self) -> bool {
        if matches!(self.state, ConnectionState::Broken | ConnectionState::Closed) {
            return false;
        }
        if !self.read_buf.is_empty() {
            return false;
        }
        if !matches!(self.stream.socket().take_error(), Ok(None)) {
            return false;
        }
        match &mut self.stream {
            AsyncStream::Tcp(socket) => {
                // Any readable byte or EOF on an idle socket means it cannot be reused.
                let mut probe = [0u8; 1];
                matches!(socket.try_read(&mut probe), Err(err) if err.kind() == io::ErrorKind::WouldBlock)
            }
            #[cfg(feature = "tls")]
            AsyncStream::Tls(stream) => {
                let (socket, conn) = stream.get_mut();
                crate::tls::absorb_idle_records(conn, &mut TryReader(socket))
            }
        }
    }

    /// Shuts the stream down; the connection is not usable afterwards.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
        self.state = ConnectionState::Closed;
    }
}

impl Poolable for AsyncConnection {
    fn is_alive(&mut self) -> bool {
        AsyncConnection::is_alive(self)
    }

    fn on_checkout(&mut self) {
        self.state = ConnectionState::Leased;
    }

    fn on_checkin(&mut self) {
        self.state = ConnectionState::Idle;
    }
}

/// Non-blocking `Read` view of a tokio socket, for feeding rustls directly.
#[cfg(feature = "tls")]
struct TryReader<'a>(&'a TcpStream);

#[cfg(feature = "tls")]
impl std::io::Read for TryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out")),
        },
        None => fut.await,
    }
}

#[cfg(feature = "tls")]
async fn wrap_stream(stream: TcpStream, config: &ClientConfig) -> ClientResult<AsyncStream> {
    if config.tls.is_none() {
        return Ok(AsyncStream::Tcp(stream));
    }
    let name = crate::tls::server_name(config)?;
    let connector = tokio_rustls::TlsConnector::from(crate::tls::client_config());
    let tls = connector
        .connect(name, stream)
        .await
        .map_err(|err| ClientError::Tls(err.to_string()))?;
    Ok(AsyncStream::Tls(Box::new(tls)))
}

#[cfg(not(feature = "tls"))]
async fn wrap_stream(stream: TcpStream, config: &ClientConfig) -> ClientResult<AsyncStream> {
    if config.tls.is_some() {
        return Err(crate::connection::tls_disabled());
    }
    Ok(AsyncStream::Tcp(stream))
}
