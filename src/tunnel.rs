//! Per-tunnel endpoint listeners.
//!
//! One task per configured tunnel, running for the life of the process. The
//! listener variants accept local connections forever and spawn one proxy
//! session per connection; the direct variant dials out once, runs a single
//! session, and returns. Only bind-time failures are fatal — everything
//! after a successful bind is handled per connection.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener};

use crate::config::{LocalEndpoint, Tunnel};
use crate::error::{Error, Result};
use crate::relay::RelayConnector;
use crate::splice::splice;

/// Run one tunnel.
///
/// Returns an error only for the startup-fatal class: a failed bind or an
/// uncreatable socket directory. Per-connection failures are logged and the
/// loop keeps accepting.
pub async fn run_tunnel(tunnel: Tunnel, connector: RelayConnector) -> Result<()> {
    tracing::info!("starting tunnel {} (token {})", tunnel.local, tunnel.token);

    match tunnel.local.clone() {
        LocalEndpoint::Unix(path) => run_unix_listener(&path, &tunnel, connector).await,
        LocalEndpoint::Tcp(addr) => run_tcp_listener(&addr, &tunnel, connector).await,
        LocalEndpoint::Direct(addr) => run_direct(&addr, &tunnel, connector).await,
    }
}

async fn run_unix_listener(path: &Path, tunnel: &Tunnel, connector: RelayConnector) -> Result<()> {
    // A stale socket file from a previous run would fail the bind with
    // "address in use"; nothing else may own this path.
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("removed stale socket file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!("unix socket listening on {}", path.display());

    loop {
        match listener.accept().await {
            Ok((local, _)) => {
                tracing::info!("accepted connection on {}", path.display());
                spawn_session(local, tunnel.token.clone(), connector.clone());
            }
            Err(e) => {
                tracing::warn!("accept failed on {}: {}", path.display(), e);
            }
        }
    }
}

async fn run_tcp_listener(addr: &str, tunnel: &Tunnel, connector: RelayConnector) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("tcp listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((local, peer)) => {
                tracing::info!("accepted connection from {}", peer);
                spawn_session(local, tunnel.token.clone(), connector.clone());
            }
            Err(e) => {
                tracing::warn!("accept failed on {}: {}", addr, e);
            }
        }
    }
}

/// Direct variant: no listener. One relay connection, one outbound local
/// dial, exactly one session. Connection-level failures end the tunnel but
/// are not startup-fatal.
async fn run_direct(addr: &str, tunnel: &Tunnel, connector: RelayConnector) -> Result<()> {
    if addr.is_empty() {
        return Err(Error::InvalidConnection("empty direct dial address"));
    }

    let remote = match connector.connect(&tunnel.token).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::error!("relay connect failed for {}: {}", tunnel.local, e);
            return Ok(());
        }
    };

    let local = match TcpStream::connect(addr).await {
        Ok(local) => local,
        Err(e) => {
            // `remote` is dropped here; its handshake line is wasted
            tracing::error!("local dial {} failed: {}", addr, e);
            return Ok(());
        }
    };

    tracing::info!("proxy session started for {}", tunnel.local);
    let summary = splice(local, remote).await;
    tracing::info!(
        "proxy session completed for {} ({}B out, {}B in)",
        tunnel.local,
        summary.a_to_b,
        summary.b_to_a
    );
    Ok(())
}

/// Hand one accepted local connection to its own proxy session task.
///
/// The relay connect happens on the session task, so a slow relay never
/// blocks the accept loop. On relay failure the local connection is dropped
/// and no session starts.
fn spawn_session<S>(local: S, token: String, connector: RelayConnector)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let remote = match connector.connect(&token).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::error!("relay connect failed for token {}: {}", token, e);
                return;
            }
        };

        tracing::info!("proxy session started (token {})", token);
        let summary = splice(local, remote).await;
        tracing::info!(
            "proxy session completed (token {}, {}B out, {}B in)",
            token,
            summary.a_to_b,
            summary.b_to_a
        );
    });
}
