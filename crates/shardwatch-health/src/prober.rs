//! Bounded-concurrency reachability prober.
//!
//! Periodic probes go through the result cache and a semaphore of
//! `concurrency` permits. On-demand checks skip both the cache read and
//! the semaphore, so a busy cycle never delays an API caller, but they
//! still refresh the cache with what they find when the peer's slot is free.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use shardwatch_core::{MonitorConfig, Multiaddr, PeerId};
use shardwatch_state::ReachabilityResult;

use crate::cache::ReachabilityCache;
use crate::dial::{DialMode, dial_probe};

#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Per-address dial timeout.
    pub timeout: Duration,
    /// Hard limit for [`Prober::check_now`].
    pub on_demand_timeout: Duration,
    /// How long a cached result is reused.
    pub ttl: Duration,
    /// Maximum dials in flight for periodic probing.
    pub concurrency: usize,
    pub mode: DialMode,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            on_demand_timeout: Duration::from_secs(10),
            ttl: Duration::from_secs(5 * 60),
            concurrency: 64,
            mode: DialMode::Multistream,
        }
    }
}

impl From<&MonitorConfig> for ProberConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            timeout: config.probe_timeout,
            on_demand_timeout: config.on_demand_timeout,
            ttl: config.reachability_ttl,
            concurrency: config.probe_concurrency.max(1),
            mode: if config.probe_handshake {
                DialMode::Multistream
            } else {
                DialMode::TcpConnect
            },
        }
    }
}

struct Inner {
    config: ProberConfig,
    cache: ReachabilityCache,
    permits: Semaphore,
    dials: AtomicU64,
}

/// Cheaply cloneable; clones share the cache and the semaphore.
#[derive(Clone)]
pub struct Prober {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

impl Prober {
    pub fn new(config: ProberConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                cache: ReachabilityCache::new(config.ttl),
                permits: Semaphore::new(concurrency),
                dials: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ReachabilityCache {
        &self.inner.cache
    }

    /// Dials issued since creation.
    pub fn dial_count(&self) -> u64 {
        self.inner.dials.load(Ordering::Relaxed)
    }

    /// Probe one peer, reusing a fresh cached result when `use_cache` is set.
    pub async fn probe(
        &self,
        peer: &PeerId,
        addrs: &[Multiaddr],
        use_cache: bool,
    ) -> ReachabilityResult {
        let inner = &self.inner;
        inner
            .cache
            .fetch_or_probe(peer, use_cache, || async {
                // The semaphore is never closed.
                let _permit = inner.permits.acquire().await.ok();
                inner.dials.fetch_add(1, Ordering::Relaxed);
                dial_probe(peer, addrs, inner.config.timeout, inner.config.mode).await
            })
            .await
    }

    /// Fresh, uncached probe bounded by `on_demand_timeout`.
    ///
    /// A check that runs out of time reports the peer as unreachable. The
    /// dial runs outside the peer's cache slot: the result replaces the
    /// cached one only if no periodic probe of the same peer holds it.
    pub async fn check_now(&self, peer: &PeerId, addrs: &[Multiaddr]) -> ReachabilityResult {
        let inner = &self.inner;
        let deadline = inner.config.on_demand_timeout;
        let per_address = inner.config.timeout.min(deadline);

        inner.dials.fetch_add(1, Ordering::Relaxed);
        let dial = dial_probe(peer, addrs, per_address, inner.config.mode);
        let result = match tokio::time::timeout(deadline, dial).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%peer, ?deadline, "on-demand check timed out");
                ReachabilityResult::unreachable(*peer, "timed out")
            }
        };

        if !inner.cache.try_insert(result.clone()) {
            debug!(%peer, "periodic probe in flight, on-demand result not cached");
        }
        result
    }

    /// Probe many peers concurrently, at most `concurrency` dials at once.
    ///
    /// Repeated peers are probed once with the union of their addresses.
    pub async fn probe_many(
        &self,
        targets: Vec<(PeerId, Vec<Multiaddr>)>,
    ) -> HashMap<PeerId, ReachabilityResult> {
        let mut merged: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
        for (peer, addrs) in targets {
            let known = merged.entry(peer).or_default();
            for addr in addrs {
                if !known.contains(&addr) {
                    known.push(addr);
                }
            }
        }

        let total = merged.len();
        let dials_before = self.dial_count();
        let mut tasks = JoinSet::new();
        for (peer, addrs) in merged {
            let prober = self.clone();
            tasks.spawn(async move {
                let result = prober.probe(&peer, &addrs, true).await;
                (peer, result)
            });
        }

        let mut results = HashMap::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, result)) => {
                    results.insert(peer, result);
                }
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }

        let reachable = results.values().filter(|r| r.is_reachable()).count();
        info!(
            peers = total,
            reachable,
            dials = self.dial_count() - dials_before,
            "probe round complete"
        );
        results
    }
}
