mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use respkit_client::coerce::{FieldExpireOutcome, KeyType};
use respkit_client::commands;
use respkit_client::{
    CancellationToken, Client, ClientConfig, ClientError, Command, Connection, ErrorKind, ExecuteOptions,
    ProtocolVersion, Reply, RetryMode, RetryPolicy,
};

use common::{bulk, error, integer, name, raw, reply, simple, Action, MockServer};

fn config(server: &MockServer, max_pool_size: usize) -> ClientConfig {
    ClientConfig {
        max_pool_size,
        max_idle: max_pool_size,
        read_timeout: Some(Duration::from_secs(5)),
        write_timeout: Some(Duration::from_secs(5)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::new(server.addr.clone())
    }
}

fn client(server: &MockServer, max_pool_size: usize) -> Client {
    Client::with_config(config(server, max_pool_size)).expect("client")
}

#[test]
fn set_get_roundtrip() -> anyhow::Result<()> {
    let server = common::spawn(|_, args| match name(args).as_str() {
        "SET" => {
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            simple("OK")
        }
        "GET" if args[1] == b"key" => bulk(b"value"),
        "GET" => reply(Reply::Bulk(None)),
        _ => error("ERR unknown command"),
    });
    let client = client(&server, 1);

    assert!(client.call(commands::set("key", "value"))?);
    assert_eq!(client.call(commands::get("key"))?, Some(Bytes::from_static(b"value")));
    assert_eq!(client.call(commands::get("missing"))?, None);
    assert_eq!(server.connections(), 1);
    Ok(())
}

#[test]
fn handshake_runs_in_order_before_first_command() -> anyhow::Result<()> {
    let server = common::spawn(|_, args| match name(args).as_str() {
        "GET" => bulk(b"v"),
        _ => simple("OK"),
    });
    let client = Client::with_config(ClientConfig {
        password: Some("secret".into()),
        client_name: Some("worker".into()),
        database: 2,
        ..config(&server, 1)
    })?;

    client.call(commands::get("k"))?;
    client.call(commands::get("k"))?;
    assert_eq!(
        server.commands(),
        vec![
            vec!["AUTH", "secret"],
            vec!["CLIENT", "SETNAME", "worker"],
            vec!["SELECT", "2"],
            vec!["GET", "k"],
            vec!["GET", "k"],
        ]
    );
    Ok(())
}

#[test]
fn resp3_handshake_sends_hello() -> anyhow::Result<()> {
    let server = common::spawn(|_, args| match name(args).as_str() {
        "HELLO" => reply(Reply::Map(vec![(
            Reply::bulk(&b"proto"[..]),
            Reply::Integer(3),
        )])),
        _ => reply(Reply::Null),
    });
    let client = Client::with_config(ClientConfig {
        protocol: ProtocolVersion::Resp3,
        username: Some("app".into()),
        password: Some("pw".into()),
        ..config(&server, 1)
    })?;

    assert_eq!(client.call(commands::get("k"))?, None);
    assert_eq!(server.commands()[0], vec!["HELLO", "3", "AUTH", "app", "pw"]);
    Ok(())
}

#[test]
fn refused_auth_fails_the_handshake() {
    let server = common::spawn(|_, _| error("WRONGPASS invalid username-password pair"));
    let client = Client::with_config(ClientConfig {
        password: Some("wrong".into()),
        retry: RetryPolicy::never(),
        ..config(&server, 1)
    })
    .expect("client");

    let err = client.call(commands::ping()).unwrap_err();
    assert!(matches!(err, ClientError::Handshake { step: "AUTH", .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(client.status().total, 0);
}

#[test]
fn hgetall_keeps_missing_apart_from_empty() -> anyhow::Result<()> {
    let server = common::spawn(|_, args| match args[1].as_slice() {
        b"missing" => raw(b"*-1\r\n"),
        b"empty" => raw(b"*0\r\n"),
        _ => reply(Reply::array(vec![Reply::bulk(&b"f"[..]), Reply::bulk(&b"v"[..])])),
    });
    let client = client(&server, 1);

    assert_eq!(client.call(commands::hgetall("missing"))?, None);
    assert_eq!(client.call(commands::hgetall("empty"))?.map(|h| h.len()), Some(0));
    let hash = client.call(commands::hgetall("user"))?.expect("hash");
    assert_eq!(hash.get("f"), Some(&Bytes::from_static(b"v")));
    Ok(())
}

#[test]
fn server_error_keeps_the_connection() -> anyhow::Result<()> {
    let server = common::spawn(|_, args| match name(args).as_str() {
        "INCR" => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
        _ => simple("PONG"),
    });
    let client = client(&server, 1);

    let err = client
        .execute(&Command::new("INCR").arg("list"), &respkit_client::coerce::Int64)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.server_code(), Some("WRONGTYPE"));
    assert!(err.to_string().contains("INCR"));

    assert_eq!(client.call(commands::ping())?, "PONG");
    assert_eq!(server.connections(), 1);
    assert_eq!(client.status().idle, 1);
    Ok(())
}

#[test]
fn broken_connection_is_replaced() -> anyhow::Result<()> {
    let server = common::spawn(|session, _| {
        if session.conn_index == 0 {
            Action::Close
        } else {
            bulk(b"fresh")
        }
    });
    let client = Client::with_config(ClientConfig {
        retry: RetryPolicy::never(),
        ..config(&server, 1)
    })?;

    let err = client.call(commands::get("k")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(client.status().total, 0);

    assert_eq!(client.call(commands::get("k"))?, Some(Bytes::from_static(b"fresh")));
    assert_eq!(server.connections(), 2);
    assert!(client.status().total <= 1);
    Ok(())
}

#[test]
fn idempotent_command_is_retried_on_fresh_connection() -> anyhow::Result<()> {
    let server = common::spawn(|session, _| {
        if session.conn_index == 0 {
            Action::Close
        } else {
            bulk(b"v")
        }
    });
    let client = client(&server, 1);

    assert_eq!(client.call(commands::get("k"))?, Some(Bytes::from_static(b"v")));
    assert_eq!(server.count("GET"), 2);
    assert_eq!(server.connections(), 2);
    Ok(())
}

#[test]
fn non_idempotent_command_is_not_resent() {
    let server = common::spawn(|_, _| Action::Close);
    let client = client(&server, 1);

    let err = client.call(commands::set_nx("k", "v")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(server.count("SET"), 1);
}

#[test]
fn always_mode_resends_writes() {
    let server = common::spawn(|session, _| {
        if session.conn_index < 2 {
            Action::Close
        } else {
            simple("OK")
        }
    });
    let client = Client::with_config(ClientConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            mode: RetryMode::Always,
        },
        ..config(&server, 1)
    })
    .expect("client");

    assert!(client.call(commands::set_nx("k", "v")).expect("set"));
    assert_eq!(server.count("SET"), 3);
}

#[test]
fn stale_idle_connection_is_not_reused() -> anyhow::Result<()> {
    let server = common::spawn(|session, _| {
        if session.conn_index == 0 {
            Action::ReplyThenClose(b"+OK\r\n".to_vec())
        } else {
            simple("OK")
        }
    });
    let client = Client::with_config(ClientConfig {
        retry: RetryPolicy::never(),
        ..config(&server, 1)
    })?;

    assert!(client.call(commands::set_nx("a", "1"))?);
    thread::sleep(Duration::from_millis(100));
    assert!(client.call(commands::set_nx("b", "2"))?);
    assert_eq!(server.connections(), 2);
    Ok(())
}

#[test]
fn saturated_pool_with_zero_timeout_fails_fast() {
    let server = common::spawn(|_, _| simple("PONG"));
    let client = client(&server, 1);
    let _held = client
        .pool()
        .acquire_blocking(None, None, || Connection::open(client.config()))
        .expect("lease");

    let start = Instant::now();
    let err = client
        .call_with(commands::ping(), &ExecuteOptions::new().timeout(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, ClientError::PoolExhausted));
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn replies_are_coerced_to_declared_shapes() -> anyhow::Result<()> {
    let server = common::spawn(|_, args| match name(args).as_str() {
        "SET" if args.len() == 4 => reply(Reply::Bulk(None)),
        "SET" => simple("OK"),
        "INCRBYFLOAT" => bulk(b"3.0000000000000004"),
        "HSCAN" => reply(Reply::array(vec![
            Reply::bulk(&b"0"[..]),
            Reply::array(vec![Reply::bulk(&b"f1"[..]), Reply::bulk(&b"v1"[..])]),
        ])),
        "HEXPIRE" => reply(Reply::array(vec![Reply::Integer(1), Reply::Integer(-2)])),
        "TYPE" if args[1] == b"odd" => simple("vectorset"),
        "TYPE" => simple("hash"),
        "EXISTS" => integer(1),
        _ => error("ERR unknown command"),
    });
    let client = client(&server, 2);

    assert!(client.call(commands::set("k", "v"))?);
    assert!(!client.call(commands::set_nx("k", "v"))?);
    assert!(client.call(commands::exists("k"))?);

    let value = client.call(commands::incr_by_float("counter", 0.1))?;
    assert_eq!(value.as_f64()?, 3.0000000000000004);
    assert!(matches!(value.as_i64(), Err(ClientError::InvalidNumber { .. })));

    let page = client.call(commands::hscan("h", 0, None, None))?;
    assert!(page.is_complete());
    assert_eq!(page.items, vec![("f1".to_string(), Bytes::from_static(b"v1"))]);

    assert_eq!(
        client.call(commands::hexpire("h", 60, ["f1", "gone"]))?,
        vec![FieldExpireOutcome::Set, FieldExpireOutcome::NoSuchField]
    );
    assert_eq!(client.call(commands::key_type("h"))?, KeyType::Hash);

    let err = client.call(commands::key_type("odd")).unwrap_err();
    assert!(matches!(err, ClientError::UnknownEnumValue { ref value, .. } if value == "vectorset"));

    // Mismatches are not connection failures.
    assert_eq!(server.connections(), 1);
    Ok(())
}

#[test]
fn malformed_reply_breaks_the_connection() {
    let server = common::spawn(|_, _| raw(b"@what\r\n"));
    let client = client(&server, 1);

    let err = client.call(commands::ping()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(client.status().total, 0);
}

#[test]
fn cancellation_interrupts_a_blocked_read() {
    let server = common::spawn(|_, _| Action::NoReply);
    let client = client(&server, 1);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        })
    };

    let start = Instant::now();
    let err = client
        .call_with(commands::get("k"), &ExecuteOptions::new().cancel(token))
        .unwrap_err();
    canceller.join().expect("canceller");

    assert!(matches!(err, ClientError::Cancelled), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(3));
    let status = client.status();
    assert_eq!(status.leased, 0);
    assert_eq!(status.total, 0);
}

#[test]
fn cancellation_interrupts_a_stalled_handshake() {
    let server = common::spawn(|_, args| match name(args).as_str() {
        "AUTH" => Action::NoReply,
        _ => simple("PONG"),
    });
    let client = Client::with_config(ClientConfig {
        password: Some("secret".into()),
        read_timeout: None,
        ..config(&server, 1)
    })
    .expect("client");
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        })
    };

    let start = Instant::now();
    let err = client
        .call_with(commands::ping(), &ExecuteOptions::new().cancel(token))
        .unwrap_err();
    canceller.join().expect("canceller");

    assert!(matches!(err, ClientError::Cancelled), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(server.count("AUTH"), 1);
    let status = client.status();
    assert_eq!(status.leased, 0);
    assert_eq!(status.total, 0);
}

#[test]
fn push_frames_before_the_reply_are_skipped() -> anyhow::Result<()> {
    let server = common::spawn(|_, _| raw(b">2\r\n+message\r\n+a\r\n>1\r\n+b\r\n$1\r\nv\r\n"));
    let client = client(&server, 1);

    assert_eq!(client.call(commands::get("k"))?, Some(Bytes::from_static(b"v")));
    assert_eq!(client.call(commands::get("k"))?, Some(Bytes::from_static(b"v")));
    assert_eq!(server.connections(), 1);
    Ok(())
}

#[test]
fn cancelled_before_start_leaves_pool_untouched() {
    let server = common::spawn(|_, _| simple("PONG"));
    let client = client(&server, 1);
    let token = CancellationToken::new();
    token.cancel();

    let err = client
        .call_with(commands::ping(), &ExecuteOptions::new().cancel(token))
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(server.connections(), 0);
}

#[test]
fn dispose_fails_future_calls() -> anyhow::Result<()> {
    let server = common::spawn(|_, _| simple("PONG"));
    let client = client(&server, 2);
    client.call(commands::ping())?;

    client.dispose();
    let err = client.call(commands::ping()).unwrap_err();
    assert!(matches!(err, ClientError::PoolClosed));
    let status = client.status();
    assert!(status.closed);
    assert_eq!(status.idle, 0);
    Ok(())
}

#[test]
fn many_threads_share_a_bounded_pool() {
    const CALLERS: usize = 300;
    const MAX: usize = 50;

    let server = common::spawn(|_, _| {
        thread::sleep(Duration::from_millis(2));
        simple("PONG")
    });
    let client = client(&server, MAX);
    let done = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let client = client.clone();
            let done = done.clone();
            thread::spawn(move || {
                let pong = client.call(commands::ping()).expect("ping");
                assert_eq!(pong, "PONG");
                assert!(client.status().leased <= MAX);
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("caller");
    }

    assert_eq!(done.load(Ordering::SeqCst), CALLERS);
    assert!(server.connections() <= MAX);
    let status = client.status();
    assert_eq!(status.leased, 0);
    assert!(status.total <= MAX);
}

#[test]
fn config_deserializes_from_json() -> anyhow::Result<()> {
    let config: ClientConfig = serde_json::from_str(
        r#"{
            "addr": "10.0.0.7:6380",
            "max_pool_size": 4,
            "protocol": "resp3",
            "read_timeout": { "secs": 2, "nanos": 0 },
            "retry": { "mode": "never" }
        }"#,
    )?;
    assert_eq!(config.addr, "10.0.0.7:6380");
    assert_eq!(config.max_pool_size, 4);
    assert_eq!(config.max_idle, 8);
    assert_eq!(config.protocol, ProtocolVersion::Resp3);
    assert_eq!(config.read_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.retry.mode, RetryMode::Never);
    assert_eq!(config.retry.max_attempts, 3);
    Ok(())
}

#[test]
fn zero_sized_pool_is_rejected() {
    let err = Client::with_config(ClientConfig {
        max_pool_size: 0,
        ..ClientConfig::default()
    })
    .err()
    .expect("invalid");
    assert_eq!(err.kind(), ErrorKind::Usage);
}
