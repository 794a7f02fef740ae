//! Relay connection setup.
//!
//! Dials the remote relay and writes the newline-terminated handshake line
//! that tells the relay which tunnel this connection belongs to. The relay
//! consumes exactly one line and then switches to raw forwarding; no
//! acknowledgment is ever read back.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::AgentConfig;
use crate::crypto::{seal_token, HandshakeKey};
use crate::error::{Error, Result};

/// Bound on the relay dial.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens handshake-tagged connections to the relay.
///
/// Cheap to clone; every proxy session gets its own copy.
#[derive(Clone)]
pub struct RelayConnector {
    addr: String,
    handshake_key: Option<HandshakeKey>,
    timeout: Duration,
}

impl RelayConnector {
    /// Build a connector from the agent configuration.
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_timeout(config, CONNECT_TIMEOUT)
    }

    /// Build a connector with a custom dial timeout.
    pub fn with_timeout(config: &AgentConfig, timeout: Duration) -> Self {
        Self {
            addr: config.relay_addr(),
            handshake_key: config.handshake_key.clone(),
            timeout,
        }
    }

    /// The relay address this connector dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Dial the relay and send the handshake line for `token`.
    ///
    /// When a handshake key is configured the token is sealed first; a
    /// crypto failure fails this attempt, it never falls back to plaintext.
    /// On any failure after the dial the connection is closed before the
    /// error returns — a connection with a partial handshake is unusable.
    pub async fn connect(&self, token: &str) -> Result<TcpStream> {
        let mut stream = match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    addr: self.addr.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let line = match &self.handshake_key {
            Some(key) => seal_token(token, key)?,
            None => token.to_string(),
        };

        let mut message = line.into_bytes();
        message.push(b'\n');
        stream
            .write_all(&message)
            .await
            .map_err(Error::HandshakeWrite)?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalEndpoint, Tunnel};
    use crate::crypto::{open_token, HandshakeKey};
    use std::time::Instant;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn config_for(addr: &str, key: Option<HandshakeKey>) -> AgentConfig {
        let (host, port) = addr.rsplit_once(':').unwrap();
        AgentConfig {
            relay_host: host.to_string(),
            relay_port: port.parse().unwrap(),
            handshake_key: key,
            tunnels: vec![Tunnel {
                local: LocalEndpoint::Tcp("127.0.0.1:0".into()),
                token: "forward".into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_plaintext_handshake_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
            line
        });

        let connector = RelayConnector::new(&config_for(&addr, None));
        let _stream = connector.connect("usbmuxd").await.unwrap();

        assert_eq!(server.await.unwrap(), "usbmuxd\n");
    }

    #[tokio::test]
    async fn test_sealed_handshake_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
            line
        });

        let key = HandshakeKey::from_bytes([9u8; 32]);
        let connector = RelayConnector::new(&config_for(&addr, Some(key.clone())));
        let _stream = connector.connect("usbmuxd").await.unwrap();

        let line = server.await.unwrap();
        let blob = line.trim_end();
        assert_ne!(blob, "usbmuxd", "token must not travel in plaintext");
        assert_eq!(open_token(blob, &key).unwrap(), "usbmuxd");
    }

    #[tokio::test]
    async fn test_refused_relay_fails_fast() {
        // Grab a port that nothing listens on
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let connector = RelayConnector::new(&config_for(&addr, None));

        let started = Instant::now();
        let result = connector.connect("forward").await;

        assert!(result.is_err());
        // Refused means an immediate error, not a ten second stall
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_relay_times_out() {
        // Non-routable address per RFC 5737
        let connector = RelayConnector::with_timeout(
            &config_for("192.0.2.1:9", None),
            Duration::from_millis(200),
        );

        let result = connector.connect("forward").await;
        // Depending on the host network this surfaces as our timeout or as a
        // kernel-level unreachable error; both are per-connection failures
        assert!(matches!(
            result,
            Err(Error::ConnectTimeout { .. }) | Err(Error::Io(_))
        ));
    }
}
