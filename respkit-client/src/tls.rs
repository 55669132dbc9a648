//! TLS client settings shared by the blocking and async transports.

use std::io::{self, Read};
use std::sync::{Arc, OnceLock};

use rustls::pki_types::ServerName;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Process-wide rustls client config trusting the webpki root set.
pub(crate) fn client_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// Name presented for SNI and checked against the certificate.
pub(crate) fn server_name(config: &ClientConfig) -> ClientResult<ServerName<'static>> {
    let name = config
        .tls
        .as_ref()
        .and_then(|tls| tls.server_name.clone())
        .unwrap_or_else(|| config.host().to_string());
    ServerName::try_from(name).map_err(|err| ClientError::Tls(err.to_string()))
}

/// Reads whatever TLS records arrived on an idle connection.
///
/// Session tickets and key updates carry no application data and leave the
/// connection reusable. Returns false on plaintext, a close, EOF or any
/// error. `sock` must be non-blocking.
pub(crate) fn absorb_idle_records(conn: &mut rustls::ClientConnection, sock: &mut dyn Read) -> bool {
    match conn.process_new_packets() {
        Ok(state) if state.plaintext_bytes_to_read() == 0 && !state.peer_has_closed() => {}
        _ => return false,
    }
    loop {
        match conn.read_tls(sock) {
            Ok(0) => return false,
            Ok(_) => match conn.process_new_packets() {
                Ok(state) if state.plaintext_bytes_to_read() == 0 && !state.peer_has_closed() => {}
                _ => return false,
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return true,
            Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Script(Vec<io::Result<Vec<u8>>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let data = self.0.remove(0)?;
            buf[..data.len()].copy_from_slice(&data);
            Ok(data.len())
        }
    }

    fn session() -> rustls::ClientConnection {
        let name = ServerName::try_from("localhost").expect("name");
        rustls::ClientConnection::new(client_config(), name).expect("session")
    }

    #[test]
    fn quiet_socket_stays_alive() {
        assert!(absorb_idle_records(&mut session(), &mut Script(Vec::new())));
    }

    #[test]
    fn eof_and_garbage_records_are_dead() {
        assert!(!absorb_idle_records(&mut session(), &mut Script(vec![Ok(Vec::new())])));
        let junk = vec![Ok(b"\x17\x03\x03\x00\x05hello".to_vec())];
        assert!(!absorb_idle_records(&mut session(), &mut Script(junk)));
        let reset = vec![Err(io::ErrorKind::ConnectionReset.into())];
        assert!(!absorb_idle_records(&mut session(), &mut Script(reset)));
    }

    #[test]
    fn server_name_defaults_to_host() {
        let config = ClientConfig {
            tls: Some(crate::config::TlsConfig::default()),
            ..ClientConfig::new("cache.example.com:6380")
        };
        assert_eq!(
            server_name(&config).expect("name"),
            ServerName::try_from("cache.example.com").expect("name")
        );
    }
}
