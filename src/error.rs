//! Error types for the tunneling agent.

use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the agent.
#[derive(Error, Debug)]
pub enum Error {
    /// Handshake key has the wrong length (must be exactly 32 raw bytes)
    #[error("handshake key must be 32 bytes, got {actual}")]
    InvalidKeyLength {
        /// Length of the key material that was supplied
        actual: usize,
    },

    /// Externally supplied key material could not be decoded
    #[error("handshake key is not valid base64")]
    KeyDecode(#[source] base64::DecodeError),

    /// AEAD sealing of the handshake token failed
    #[error("handshake encryption failed")]
    Encrypt,

    /// AEAD opening of a handshake blob failed (tampered, truncated, or wrong key)
    #[error("handshake decryption failed")]
    Decrypt,

    /// Relay dial exceeded the connect timeout
    #[error("timed out connecting to relay {addr} after {secs}s")]
    ConnectTimeout {
        /// Relay address that was dialed
        addr: String,
        /// Timeout bound in seconds
        secs: u64,
    },

    /// Writing the handshake line to the relay failed
    #[error("failed to write handshake to relay: {0}")]
    HandshakeWrite(#[source] std::io::Error),

    /// A connection target is structurally unusable (e.g. an empty
    /// direct-dial address) — a programming error, not a runtime failure
    #[error("invalid connection: {0}")]
    InvalidConnection(&'static str),

    /// Startup configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network or filesystem I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

/// True for I/O errors that mean the peer went away.
///
/// These are expected end-of-session signals, not failures; the splice
/// engine logs them at debug instead of error.
pub fn is_closed_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}
