//! # relaytun
//!
//! A local tunneling agent. Exposes one or more local endpoints (a Unix
//! domain socket, a local TCP port, or a direct outbound dial) and forwards
//! every local connection through a single remote relay.
//!
//! The first bytes written on each relay connection are one
//! newline-terminated handshake line naming the logical tunnel; the relay
//! consumes exactly that line and then treats the connection as an opaque
//! duplex byte stream. When a pre-shared key is configured the handshake
//! token is sealed with an AEAD before it goes on the wire.
//!
//! ```text
//! local peer ──▶ endpoint listener ──▶ relay connector ──▶ relay
//!                       │                                    │
//!                       └─────────── splice engine ◀─────────┘
//! ```
//!
//! One accept loop runs per configured tunnel; every accepted connection
//! becomes an independent proxy session with its own pair of copy tasks.
//! Sessions never affect each other: a failed relay dial or a copy error
//! tears down exactly one connection pair.

pub mod config;
pub mod crypto;
pub mod error;
pub mod relay;
pub mod splice;
pub mod tunnel;

pub use error::{Error, Result};
