//! Snapshot publisher.
//!
//! The updater owns the only writer side of the [`SnapshotStore`]. Each
//! cycle collects, aggregates and renders a complete snapshot before a
//! single swap makes it visible, so readers never observe a cycle in
//! progress.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use shardwatch_core::{MonitorConfig, MultiaddrExt};
use shardwatch_dht::DhtClient;
use shardwatch_health::Prober;
use shardwatch_metrics::render_prometheus;
use shardwatch_state::{
    BootstrapState, GlobalSnapshot, MonitorError, MonitorResult, PublishedSnapshot, Reachability,
    ServerRecord, SnapshotStore, unix_now,
};

use crate::aggregator::{aggregate, top_contributors};
use crate::discovery::{DiscoveryOptions, discover};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterPhase {
    Idle,
    Collecting,
    Publishing,
}

/// Puts the phase back to idle however the cycle ends.
struct IdleOnDrop<'a>(&'a watch::Sender<UpdaterPhase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(UpdaterPhase::Idle);
    }
}

pub struct Updater {
    config: Arc<MonitorConfig>,
    dht: Arc<dyn DhtClient>,
    prober: Prober,
    store: SnapshotStore,
    discovery: DiscoveryOptions,
    phase: watch::Sender<UpdaterPhase>,
}

impl Updater {
    pub fn new(
        config: Arc<MonitorConfig>,
        dht: Arc<dyn DhtClient>,
        prober: Prober,
        store: SnapshotStore,
    ) -> Self {
        let (phase, _) = watch::channel(UpdaterPhase::Idle);
        Self {
            discovery: DiscoveryOptions::from(config.as_ref()),
            config,
            dht,
            prober,
            store,
            phase,
        }
    }

    pub fn phase(&self) -> UpdaterPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<UpdaterPhase> {
        self.phase.subscribe()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run one full cycle and publish its snapshot.
    ///
    /// Any error leaves the previously published snapshot in place.
    pub async fn run_cycle(&self) -> MonitorResult<Arc<PublishedSnapshot>> {
        let started = Instant::now();
        self.phase.send_replace(UpdaterPhase::Collecting);
        let _idle = IdleOnDrop(&self.phase);

        let evicted = self.prober.cache().evict_expired();
        debug!(evicted, cached = self.prober.cache().len(), "cycle starting");

        let bootstrap_states = self.probe_bootstrap().await;

        let mut discovered: Vec<Vec<ServerRecord>> =
            Vec::with_capacity(self.config.models.len());
        for model in &self.config.models {
            let records = discover(self.dht.as_ref(), model, &self.discovery).await?;
            discovered.push(records);
        }

        let targets = discovered
            .iter()
            .flatten()
            .map(|r| (r.peer_id, r.addrs.clone()))
            .collect();
        let reachability = self.prober.probe_many(targets).await;

        let now = unix_now();
        let models: Vec<_> = self
            .config
            .models
            .iter()
            .zip(&discovered)
            .map(|(model, records)| {
                let ttl = self.config.record_ttl;
                aggregate(model, records, |peer| reachability.get(peer), now, ttl)
            })
            .collect();

        self.phase.send_replace(UpdaterPhase::Publishing);
        let snapshot = GlobalSnapshot {
            generation: self.store.generation() + 1,
            created_at: now,
            update_duration_secs: started.elapsed().as_secs_f64(),
            update_period_secs: self.config.update_period.as_secs_f64(),
            bootstrap_states,
            top_contributors: top_contributors(&models),
            models,
        };
        let state_json =
            serde_json::to_string(&snapshot).map_err(|e| MonitorError::Serialize(e.to_string()))?;
        let prometheus = render_prometheus(&snapshot);

        let published = self.store.publish(PublishedSnapshot {
            snapshot,
            state_json,
            prometheus,
        })?;

        for model in &published.snapshot.models {
            info!(
                model = %model.name,
                status = model.status.as_str(),
                coverage = model.block_coverage,
                num_blocks = model.num_blocks,
                servers = model.servers.len(),
                "model health"
            );
        }
        info!(
            generation = published.generation(),
            duration_ms = started.elapsed().as_millis() as u64,
            "snapshot published"
        );
        Ok(published)
    }

    async fn probe_bootstrap(&self) -> Vec<BootstrapState> {
        let probes = self.config.initial_peers.iter().filter_map(|addr| {
            let peer = addr.peer_id()?;
            Some(async move {
                let result = self
                    .prober
                    .probe(&peer, std::slice::from_ref(addr), true)
                    .await;
                BootstrapState {
                    addr: addr.to_string(),
                    peer_id: peer,
                    reachability: result.outcome,
                    error: result.error,
                    latency_ms: result.latency_ms,
                }
            })
        });
        let states = futures::future::join_all(probes).await;

        let reachable = states
            .iter()
            .filter(|s| s.reachability == Reachability::Reachable)
            .count();
        if !states.is_empty() && reachable == 0 {
            warn!(peers = states.len(), "no bootstrap peer is reachable");
        }
        states
    }

    /// Run cycles every `update_period` until `shutdown` flips or closes.
    ///
    /// The first cycle starts immediately. A cycle that overruns the
    /// period delays the next tick instead of bunching them up.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.update_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            models = self.config.models.len(),
            period_secs = self.config.update_period.as_secs_f64(),
            "updater started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        error!(
                            error = %e,
                            generation = self.store.generation(),
                            "update cycle failed, keeping previous snapshot"
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("updater stopped");
    }
}
