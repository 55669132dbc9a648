#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use respkit_proto::{encode_reply, Reply};
use tracing_subscriber::EnvFilter;

/// Where a command arrived: which accepted connection, and its position on it.
pub struct Session {
    pub conn_index: usize,
    pub command_index: usize,
}

/// What the scripted server does with one command.
pub enum Action {
    Reply(Vec<u8>),
    /// Reply, then close the socket.
    ReplyThenClose(Vec<u8>),
    /// Close without replying, like a reset mid-exchange.
    Close,
    /// Keep the socket open and never answer.
    NoReply,
}

type Handler = dyn Fn(&Session, &[Vec<u8>]) -> Action + Send + Sync;

pub struct MockServer {
    pub addr: String,
    connections: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockServer {
    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every command received, as lossy strings, in arrival order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().expect("log").clone()
    }

    /// Count of received commands named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| cmd.first().map(String::as_str) == Some(name))
            .count()
    }
}

pub fn spawn<H>(handler: H) -> MockServer
where
    H: Fn(&Session, &[Vec<u8>]) -> Action + Send + Sync + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let connections = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler: Arc<Handler> = Arc::new(handler);

    {
        let connections = connections.clone();
        let log = log.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let conn_index = connections.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                let log = log.clone();
                thread::spawn(move || serve(stream, conn_index, handler, log));
            }
        });
    }

    MockServer { addr, connections, log }
}

fn serve(mut stream: TcpStream, conn_index: usize, handler: Arc<Handler>, log: Arc<Mutex<Vec<Vec<String>>>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
    let mut reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(_) => return,
    };
    let mut command_index = 0;
    while let Ok(args) = read_command(&mut reader) {
        log.lock()
            .expect("log")
            .push(args.iter().map(|arg| String::from_utf8_lossy(arg).into_owned()).collect());
        let session = Session {
            conn_index,
            command_index,
        };
        command_index += 1;
        match handler(&session, &args) {
            Action::Reply(bytes) => {
                if stream.write_all(&bytes).and_then(|_| stream.flush()).is_err() {
                    return;
                }
            }
            Action::ReplyThenClose(bytes) => {
                let _ = stream.write_all(&bytes);
                let _ = stream.flush();
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            }
            Action::Close => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            }
            Action::NoReply => {}
        }
    }
}

pub fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

pub fn frame(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::new();
    encode_reply(reply, &mut out);
    out
}

pub fn simple(text: &str) -> Action {
    Action::Reply(frame(&Reply::Status(text.to_string())))
}

pub fn error(text: &str) -> Action {
    Action::Reply(frame(&Reply::error_from_text(text)))
}

pub fn bulk(data: &[u8]) -> Action {
    Action::Reply(frame(&Reply::bulk(data.to_vec())))
}

pub fn integer(value: i64) -> Action {
    Action::Reply(frame(&Reply::Integer(value)))
}

pub fn reply(reply: Reply) -> Action {
    Action::Reply(frame(&reply))
}

pub fn raw(bytes: &[u8]) -> Action {
    Action::Reply(bytes.to_vec())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn name(args: &[Vec<u8>]) -> String {
    String::from_utf8_lossy(&args[0]).to_ascii_uppercase()
}
