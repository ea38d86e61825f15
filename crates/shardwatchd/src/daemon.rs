//! Process wiring: build the subsystems, wait for the first snapshot,
//! serve until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use shardwatch_api::{ApiState, build_router};
use shardwatch_core::MonitorConfig;
use shardwatch_dht::{DhtClient, GatewayDht, MemoryDht};
use shardwatch_health::{Prober, ProberConfig};
use shardwatch_monitor::Updater;
use shardwatch_state::SnapshotStore;

fn build_dht(
    config: &MonitorConfig,
    fixture: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn DhtClient>> {
    match fixture {
        Some(path) => {
            let dht = MemoryDht::from_fixture(&path)?;
            info!(path = %path.display(), "replaying dht fixture");
            Ok(Arc::new(dht))
        }
        None => {
            if config.dht_gateways.is_empty() {
                anyhow::bail!("no dht_gateways configured (or pass --dht-fixture)");
            }
            info!(gateways = ?config.dht_gateways, "using dht gateways");
            Ok(Arc::new(GatewayDht::new(config.dht_gateways.clone())))
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

pub async fn run(config: MonitorConfig, fixture: Option<PathBuf>) -> anyhow::Result<()> {
    info!(
        models = config.models.len(),
        initial_peers = config.initial_peers.len(),
        "shardwatch daemon starting"
    );
    let config = Arc::new(config);

    // ── Initialize subsystems ──────────────────────────────────

    let dht = build_dht(&config, fixture)?;
    let store = SnapshotStore::new();
    let prober = Prober::new(ProberConfig::from(config.as_ref()));
    let updater = Arc::new(Updater::new(
        Arc::clone(&config),
        Arc::clone(&dht),
        prober.clone(),
        store.clone(),
    ));

    // ── Start the updater ──────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let updater_handle = tokio::spawn(updater.run(shutdown_rx));

    info!("waiting for the first snapshot");
    tokio::select! {
        _ = store.wait_ready() => {
            info!(generation = store.generation(), "first snapshot published");
        }
        _ = ctrl_c() => {
            info!("shutdown signal received before first snapshot");
            let _ = shutdown_tx.send(true);
            let _ = updater_handle.await;
            return Ok(());
        }
    }

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        prober,
        dht,
        dht_timeout: config.dht_timeout,
        frontend_dist: Arc::new(config.frontend_dist.clone()),
    });

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, "API server starting");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
    .await?;

    let _ = updater_handle.await;
    info!("shardwatch daemon stopped");
    Ok(())
}
