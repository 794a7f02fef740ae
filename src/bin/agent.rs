//! relaytun agent binary.
//!
//! Reads its configuration from the environment, starts every configured
//! tunnel, and runs until all tunnels have finished. A startup-fatal error
//! in any tunnel (missing relay address, failed bind) exits the process
//! nonzero; per-connection failures only ever end their own session.

use anyhow::Context;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use relaytun::config::AgentConfig;
use relaytun::relay::RelayConnector;
use relaytun::tunnel::run_tunnel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AgentConfig::from_env().context("loading configuration")?;
    let connector = RelayConnector::new(&config);

    tracing::info!(
        "agent starting: relay {}, {} tunnel(s), handshake {}",
        connector.addr(),
        config.tunnels.len(),
        if config.handshake_key.is_some() {
            "sealed"
        } else {
            "plaintext"
        }
    );

    let mut tunnels = JoinSet::new();
    for tunnel in config.tunnels.clone() {
        tunnels.spawn(run_tunnel(tunnel, connector.clone()));
    }

    while let Some(joined) = tunnels.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e).context("tunnel failed"),
            Err(e) => return Err(e).context("tunnel task panicked"),
        }
    }

    tracing::info!("all tunnels finished");
    Ok(())
}
