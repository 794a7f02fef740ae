//! Process configuration.
//!
//! Everything is read from the environment exactly once at startup into an
//! explicit [`AgentConfig`] that is passed into the connector and the tunnel
//! tasks; nothing consults ambient state after that.

use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::crypto::HandshakeKey;
use crate::error::{Error, Result};

/// Relay host name or address (required).
pub const ENV_RELAY_HOST: &str = "RELAYTUN_RELAY_HOST";
/// Relay TCP port (required).
pub const ENV_RELAY_PORT: &str = "RELAYTUN_RELAY_PORT";
/// Unix socket path for the default tunnel set (optional).
pub const ENV_SOCKET_PATH: &str = "RELAYTUN_SOCKET_PATH";
/// Base64 of the 32-byte pre-shared handshake key (optional).
pub const ENV_HANDSHAKE_KEY: &str = "RELAYTUN_HANDSHAKE_KEY";
/// Comma-separated `local=token` tunnel list (optional).
pub const ENV_TUNNELS: &str = "RELAYTUN_TUNNELS";

/// Where a tunnel accepts (or originates) its local traffic.
///
/// The textual form is polymorphic: a leading `/` means a Unix domain
/// socket listener, a `host:port` means a TCP listener, and a bare name
/// means no listener at all — the agent dials that TCP address directly
/// once and runs a single session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalEndpoint {
    /// Bind a Unix domain socket listener at this path
    Unix(PathBuf),
    /// Bind a TCP listener on this `host:port`
    Tcp(String),
    /// No listener; dial this TCP address directly
    Direct(String),
}

impl LocalEndpoint {
    /// Parse the textual endpoint form.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::config("local endpoint must not be empty"));
        }
        if s.starts_with('/') {
            Ok(LocalEndpoint::Unix(PathBuf::from(s)))
        } else if s.contains(':') {
            Ok(LocalEndpoint::Tcp(s.to_string()))
        } else {
            Ok(LocalEndpoint::Direct(s.to_string()))
        }
    }
}

impl fmt::Display for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            LocalEndpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
            LocalEndpoint::Direct(addr) => write!(f, "dial:{}", addr),
        }
    }
}

/// One configured tunnel: a local endpoint and the token that tells the
/// relay where to route its traffic. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Tunnel {
    /// Local traffic source
    pub local: LocalEndpoint,
    /// Handshake token sent first on every relay connection
    pub token: String,
}

/// Agent configuration, constructed once at process start.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Relay host
    pub relay_host: String,
    /// Relay port
    pub relay_port: u16,
    /// Pre-shared handshake key. When present, every handshake token is
    /// sealed before transmission; when absent, tokens go out in plaintext.
    pub handshake_key: Option<HandshakeKey>,
    /// Tunnels to run
    pub tunnels: Vec<Tunnel>,
}

impl AgentConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let relay_host = get(ENV_RELAY_HOST)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config(format!("{} must be set", ENV_RELAY_HOST)))?;

        let relay_port = get(ENV_RELAY_PORT)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config(format!("{} must be set", ENV_RELAY_PORT)))?
            .parse::<u16>()
            .map_err(|_| Error::config(format!("{} is not a valid port", ENV_RELAY_PORT)))?;

        let handshake_key = get(ENV_HANDSHAKE_KEY)
            .map(|encoded| HandshakeKey::from_base64(&encoded))
            .transpose()?;

        let tunnels = match get(ENV_TUNNELS) {
            Some(list) => parse_tunnels(&list)?,
            None => default_tunnels(get(ENV_SOCKET_PATH))?,
        };
        if tunnels.is_empty() {
            return Err(Error::config("no tunnels configured"));
        }

        Ok(Self {
            relay_host,
            relay_port,
            handshake_key,
            tunnels,
        })
    }

    /// Full relay dial address.
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.relay_host, self.relay_port)
    }
}

/// Parse a `local=token` comma-separated tunnel list.
fn parse_tunnels(list: &str) -> Result<Vec<Tunnel>> {
    let mut tunnels = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (local, token) = entry
            .split_once('=')
            .ok_or_else(|| Error::config(format!("tunnel entry '{}' is not local=token", entry)))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::config(format!("tunnel entry '{}' has an empty token", entry)));
        }
        tunnels.push(Tunnel {
            local: LocalEndpoint::parse(local.trim())?,
            token: token.to_string(),
        });
    }
    Ok(tunnels)
}

/// Default tunnel set: the device socket (when a path is configured) plus
/// the fixed local forward port.
fn default_tunnels(socket_path: Option<String>) -> Result<Vec<Tunnel>> {
    let mut tunnels = Vec::new();
    if let Some(path) = socket_path.filter(|p| !p.is_empty()) {
        tunnels.push(Tunnel {
            local: LocalEndpoint::parse(&path)?,
            token: "usbmuxd".to_string(),
        });
    }
    tunnels.push(Tunnel {
        local: LocalEndpoint::Tcp("127.0.0.1:7777".to_string()),
        token: "forward".to_string(),
    });
    Ok(tunnels)
}
