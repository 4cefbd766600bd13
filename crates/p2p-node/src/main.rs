//! p2p-node — the content-addressed peer-to-peer daemon.

use anyhow::{Context, Result};
use p2p_core::config::NodeConfig;
use p2p_core::crypto::Identity;
use p2p_core::keyfile;
use p2p_core::store::ContentStore;
use p2p_node::correlator::Correlator;
use p2p_node::maintenance::{self, MaintenanceConfig};
use p2p_node::session::SessionTable;
use p2p_node::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=p2p_node=debug cargo run -p p2p-node
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = NodeConfig::load().context("loading configuration")?;
    tracing::info!(bind = %config.network.bind_addr, port = config.network.bind_port, "p2p-node starting");

    let identity = Arc::new(
        keyfile::load_or_generate(&config.identity.key_path).context("loading signing identity")?,
    );
    tracing::info!(key_path = %config.identity.key_path.display(), "signing identity ready");

    let store = Arc::new(ContentStore::new());
    let sessions = Arc::new(SessionTable::new());
    let correlator = Arc::new(Correlator::new());

    let socket = Transport::bind(&config.network.bind_addr, config.network.bind_port)
        .await
        .context("binding UDP socket")?;
    tracing::info!(local_addr = %socket.local_addr()?, "listening");

    let transport = Transport {
        socket: socket.clone(),
        identity: identity.clone(),
        peer_name: config.identity.peer_name.clone(),
        sessions: sessions.clone(),
        correlator: correlator.clone(),
        store: store.clone(),
        encryption_enabled: config.network.encryption,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let transport_task = tokio::spawn(async move {
        transport.run(shutdown_rx).await;
    });

    let maintenance_task = {
        let shutdown_rx = shutdown_tx.subscribe();
        let directory_addr = config.network.directory_udp_addr.parse().ok();
        if config.network.directory_udp_addr.is_empty() {
            tracing::debug!("no directory_udp_addr configured, skipping directory keep-alive");
        } else if directory_addr.is_none() {
            tracing::warn!(
                addr = %config.network.directory_udp_addr,
                "directory_udp_addr is not a valid socket address, ignoring"
            );
        }
        let maintenance_config = MaintenanceConfig {
            tick: Duration::from_secs(config.maintenance.tick_secs),
            keepalive_after: Duration::from_secs(config.maintenance.keepalive_after_secs),
            expire_after: Duration::from_secs(config.maintenance.expire_after_secs),
            directory_addr,
            identity: identity.clone(),
            peer_name: config.identity.peer_name.clone(),
            encryption_enabled: config.network.encryption,
        };
        tokio::spawn(maintenance::run(socket, sessions, maintenance_config, shutdown_rx))
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("received ctrl-c, shutting down");
    let _ = shutdown_tx.send(true);

    let (transport_result, maintenance_result) = tokio::join!(transport_task, maintenance_task);
    if let Err(e) = transport_result {
        tracing::error!(error = ?e, "transport task exited with an error");
    }
    if let Err(e) = maintenance_result {
        tracing::error!(error = ?e, "maintenance task exited with an error");
    }

    Ok(())
}
