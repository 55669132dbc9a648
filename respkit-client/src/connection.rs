//! # Blocking Connection
//!
//! Purpose: Own one TCP (optionally TLS) stream with reusable buffers, run
//! the connection handshake, and exchange one request for one reply at a time.
//!
//! ## Design Principles
//! 1. **Exclusive Ownership**: Buffers belong to the connection; the pool
//!    guarantees a single lease holder.
//! 2. **Unknown Means Broken**: The state is `Broken` for the whole exchange and
//!    is only restored once a full reply was decoded.
//! 3. **Interruptible I/O**: Cancelling a call shuts the socket down, which
//!    unblocks a thread stuck in `read` or `write`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use respkit_proto::{read_reply, DecodeLimits, Reply};
use tracing::{debug, trace};

use crate::cancel::{self, CancellationToken};
use crate::command::Command;
use crate::config::{ClientConfig, ProtocolVersion};
use crate::error::{ClientError, ClientResult};
use crate::pool::Poolable;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Parked in the pool.
    Idle,
    /// Owned by one caller.
    Leased,
    /// An exchange failed or was interrupted; never reused.
    Broken,
    /// Shut down on purpose.
    Closed,
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Stream {
    fn socket(&self) -> &TcpStream {
        match self {
            Stream::Tcp(stream) => stream,
            #[cfg(feature = "tls")]
            Stream::Tls(stream) => &stream.sock,
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

/// Single blocking connection with reusable buffers.
pub struct Connection {
    id: u64,
    stream: Stream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    limits: DecodeLimits,
    state: ConnectionState,
}

impl Connection {
    /// Connects to `config.addr` and runs the handshake.
    pub fn open(config: &ClientConfig) -> ClientResult<Self> {
        Self::open_cancellable(config, None)
    }

    /// Like [`open`](Self::open), but `cancel` interrupts the handshake.
    ///
    /// The TCP connect itself is bounded by `connect_timeout`; the token is
    /// checked once it completes.
    pub fn open_cancellable(config: &ClientConfig, cancel: Option<&CancellationToken>) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        if cancel::is_cancelled(cancel) {
            return Err(ClientError::Cancelled);
        }
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            id: next_connection_id(),
            stream: wrap_stream(stream, config)?,
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: Vec::with_capacity(256),
            limits: config.decode_limits,
            state: ConnectionState::Idle,
        };
        conn.handshake(config, cancel)?;
        debug!(conn = conn.id, addr = %config.addr, "connection established");
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
    /// Error replies are returned as `Reply::Error` values. Out-of-band push
    /// frames are skipped. If `cancel` fires mid-exchange the socket is shut
    /// down and the connection is left `Broken`.
    pub fn send_and_receive(
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

        let interrupt = match cancel {
            Some(token) => {
                let socket = self.stream.socket().try_clone()?;
                Some(token.on_cancel(move || {
                    let _ = socket.shutdown(Shutdown::Both);
                }))
            }
            None => None,
        };

        let previous = self.state;
        self.state = ConnectionState::Broken;
        let result = self.exchange(command);
        // Once the guard is gone no shutdown can be pending on this socket.
        drop(interrupt);

        let reply = result?;
        if !cancel::is_cancelled(cancel) {
            self.state = previous;
        }
        Ok(reply)
    }

    fn exchange(&mut self, command: &Command) -> ClientResult<Reply> {
        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf)?;
        self.stream.flush()?;

        loop {
            match read_reply(&mut self.stream, &mut self.read_buf, &self.limits)? {
                Reply::Push(items) => {
                    trace!(conn = self.id, len = items.len(), "skipping push frame");
                }
                reply => return Ok(reply),
            }
        }
    }

    /// Cheap liveness probe: no recorded failure, no socket error and no
    /// unsolicited bytes (a closed peer reads as EOF).
    ///
    /// Under TLS, post-handshake records such as session tickets are
    /// absorbed; only application data or a close makes the connection dead.
    pub fn is_alive(&mut self) -> bool {
        if matches!(self.state, ConnectionState::Broken | ConnectionState::Closed) {
            return false;
        }
        if !self.read_buf.is_empty() {
            return false;
        }
        let socket = self.stream.socket();
        if !matches!(socket.take_error(), Ok(None)) {
            return false;
        }
        if socket.set_nonblocking(true).is_err() {
            return false;
        }
        let idle = match &mut self.stream {
            Stream::Tcp(stream) => {
                let mut probe = [0u8; 1];
                matches!(stream.peek(&mut probe), Err(err) if err.kind() == io::ErrorKind::WouldBlock)
            }
            #[cfg(feature = "tls")]
            Stream::Tls(stream) => {
                let stream = stream.as_mut();
                crate::tls::absorb_idle_records(&mut stream.conn, &mut stream.sock)
            }
        };
        self.stream.socket().set_nonblocking(false).is_ok() && idle
    }

    /// Shuts the socket down; the connection is not usable afterwards.
    pub fn close(&mut self) {
        let _ = self.stream.socket().shutdown(Shutdown::Both);
        self.state = ConnectionState::Closed;
    }

    fn handshake(&mut self, config: &ClientConfig, cancel: Option<&CancellationToken>) -> ClientResult<()> {
        for (step, command) in handshake_commands(config) {
            let reply = self.send_and_receive(&command, cancel)?;
            check_handshake(step, &reply)?;
            trace!(conn = self.id, step, "handshake step ok");
        }
        Ok(())
    }
}

impl Poolable for Connection {
    fn is_alive(&mut self) -> bool {
        Connection::is_alive(self)
    }

    fn on_checkout(&mut self) {
        self.state = ConnectionState::Leased;
    }

    fn on_checkin(&mut self) {
        self.state = ConnectionState::Idle;
    }
}

fn connect_stream(config: &ClientConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = config
        .addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(config.addr.clone()))?
        .collect();
    let mut last_err = None;
    for addr in &addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(ClientError::Io(err)),
        None => Err(ClientError::InvalidAddress(config.addr.clone())),
    }
}

#[cfg(feature = "tls")]
fn wrap_stream(stream: TcpStream, config: &ClientConfig) -> ClientResult<Stream> {
    if config.tls.is_none() {
        return Ok(Stream::Tcp(stream));
    }
    let name = crate::tls::server_name(config)?;
    let session = rustls::ClientConnection::new(crate::tls::client_config(), name)
        .map_err(|err| ClientError::Tls(err.to_string()))?;
    Ok(Stream::Tls(Box::new(rustls::StreamOwned::new(session, stream))))
}

#[cfg(not(feature = "tls"))]
fn wrap_stream(stream: TcpStream, config: &ClientConfig) -> ClientResult<Stream> {
    if config.tls.is_some() {
        return Err(tls_disabled());
    }
    Ok(Stream::Tcp(stream))
}

#[cfg(not(feature = "tls"))]
pub(crate) fn tls_disabled() -> ClientError {
    ClientError::InvalidConfig("tls requested but the crate was built without the `tls` feature".into())
}

/// Commands sent right after connecting, in order, with a step label.
pub(crate) fn handshake_commands(config: &ClientConfig) -> Vec<(&'static str, Command)> {
    let mut steps = Vec::new();
    match config.protocol {
        ProtocolVersion::Resp3 => {
            let mut hello = Command::new("HELLO").arg("3");
            if let Some(password) = &config.password {
                let username = config.username.as_deref().unwrap_or("default");
                hello = hello.arg("AUTH").arg(username).arg(password);
            }
            steps.push(("HELLO", hello));
        }
        ProtocolVersion::Resp2 => {
            if let Some(password) = &config.password {
                let mut auth = Command::new("AUTH");
                if let Some(username) = &config.username {
                    auth = auth.arg(username);
                }
                steps.push(("AUTH", auth.arg(password)));
            }
        }
    }
    if let Some(name) = &config.client_name {
        steps.push(("CLIENT SETNAME", Command::new("CLIENT").arg("SETNAME").arg(name)));
    }
    if config.database != 0 {
        steps.push(("SELECT", Command::new("SELECT").arg(config.database)));
    }
    steps
}

/// Turns an error reply to a handshake step into a handshake failure.
pub(crate) fn check_handshake(step: &'static str, reply: &Reply) -> ClientResult<()> {
    match reply.error_text() {
        Some(message) => Err(ClientError::Handshake { step, message }),
        None => Ok(()),
    }
}
