#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Blocknet relayer node entrypoint (systemd-friendly).
//! Loads config, wires state, serves the API, supervises background loops.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use blocknet::api::{self, ws, AppState};
use blocknet::core::consensus::proposer;
use blocknet::core::security::keystore::NodeKeystore;
use blocknet::core::state::content::ContentStore;
use blocknet::core::state::store::Store;
use blocknet::core::types::RelayerConfig;
use blocknet::monitoring::metrics::Metrics;
use blocknet::networking::{bootstrap, peer_registry, replication};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg_path = env("BLOCKNET_CONFIG", "relayer.toml");
    let cfg = RelayerConfig::load(&cfg_path).context("load config")?;

    if cfg.log_json {
        let _ = tracing_subscriber::fmt().with_target(false).json().try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .compact()
            .try_init();
    }

    let store = Store::open(&cfg.db_path).context("open database")?;
    let content = Arc::new(
        ContentStore::open(&cfg.relayer_storage_path, cfg.redundancy, cfg.slot_quota_bytes)
            .context("open content store")?,
    );
    let keystore = Arc::new(NodeKeystore::open(&cfg.data_dir).context("open keystore")?);
    let metrics = Arc::new(Metrics::new().map_err(|e| anyhow::anyhow!("metrics init: {e}"))?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let peers = replication::PeerClient::new(store.clone(), &cfg);
    let (replicate_tx, replicate_rx) = mpsc::channel(256);
    let replicator = replication::spawn_replicator(
        peers.clone(),
        metrics.clone(),
        replicate_rx,
        shutdown_rx.clone(),
    );

    let listen_addr = cfg.http_listen_addr.clone();
    let state = Arc::new(AppState {
        cfg,
        store,
        content,
        keystore,
        peers,
        online: ws::new_online_map(),
        metrics,
        replicate_tx,
    });

    info!(node = %state.keystore.address(), url = %state.cfg.node_url, "blocknet relayer starting");

    // Best-effort seed registration and peer sync before the loops start.
    if let Some(seed) = bootstrap::bootstrap_url(&state.cfg.node_url) {
        bootstrap::register_with_bootstrap(&state, &seed).await;
        bootstrap::fetch_peer_list(&state, &seed).await;
    }

    let proposer_task = tokio::spawn(proposer::run_proposer(state.clone(), shutdown_rx.clone()));
    let heartbeat_task = tokio::spawn(peer_registry::run_heartbeat(state.clone(), shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("bind {listen_addr}"))?;
    info!(addr = %listen_addr, "listening");

    let router = api::routes::router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serve")?;

    // Signal the loops, then wait for them and the replication drain.
    let _ = shutdown_tx.send(true);
    if let Err(e) = proposer_task.await {
        warn!(err = %e, "proposer task join failed");
    }
    if let Err(e) = heartbeat_task.await {
        warn!(err = %e, "heartbeat task join failed");
    }
    if let Err(e) = replicator.await {
        warn!(err = %e, "replication worker join failed");
    }

    info!("node stopped");
    Ok(())
}
