//! Reachability result cache with TTL expiration.
//!
//! One slot per peer. A slot is an async mutex around the cached result,
//! so a probe holds its peer's slot for the whole dial: concurrent probes
//! for the same peer queue behind the first and then read its result,
//! while probes for different peers never touch each other's lock.
//! Results produced elsewhere are stored with [`ReachabilityCache::try_insert`],
//! which skips a busy slot instead of waiting on it.
//!
//! Cache statistics (hits, misses, evictions) are emitted as
//! `tracing::debug` fields.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use shardwatch_core::PeerId;
use shardwatch_state::ReachabilityResult;

/// A stored result and when it was stored.
struct CachedResult {
    result: ReachabilityResult,
    stored_at: Instant,
}

impl CachedResult {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }
}

type Slot = Arc<Mutex<Option<CachedResult>>>;

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

pub struct ReachabilityCache {
    ttl: Duration,
    /// Peer → slot. The map lock is only held to find or create a slot.
    slots: RwLock<HashMap<PeerId, Slot>>,
    counters: Counters,
}

impl std::fmt::Debug for ReachabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityCache")
            .field("ttl", &self.ttl)
            .field("peers", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ReachabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, peer: &PeerId) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(*peer).or_default())
    }

    /// Upsert-or-fetch.
    ///
    /// With `use_cache`, a non-expired result is returned as is. Otherwise
    /// `probe` runs while the peer's slot is held and its result replaces
    /// whatever was cached.
    pub async fn fetch_or_probe<F, Fut>(
        &self,
        peer: &PeerId,
        use_cache: bool,
        probe: F,
    ) -> ReachabilityResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ReachabilityResult>,
    {
        let slot = self.slot(peer);
        let mut cached = slot.lock().await;

        if use_cache {
            if let Some(entry) = cached.as_ref().filter(|e| !e.is_expired(self.ttl)) {
                let hits = self.counters.hits.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(%peer, cache_hits = hits, "reachability cache hit");
                return entry.result.clone();
            }
        }

        let misses = self.counters.misses.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(%peer, use_cache, cache_misses = misses, "reachability cache miss");

        let result = probe().await;
        *cached = Some(CachedResult {
            result: result.clone(),
            stored_at: Instant::now(),
        });
        result
    }

    /// Store a result produced outside `fetch_or_probe`, unless a probe of
    /// the same peer holds the slot. Never waits.
    ///
    /// Returns whether the result was stored.
    pub fn try_insert(&self, result: ReachabilityResult) -> bool {
        let slot = self.slot(&result.peer_id);
        let Ok(mut cached) = slot.try_lock() else {
            return false;
        };
        *cached = Some(CachedResult {
            result,
            stored_at: Instant::now(),
        });
        true
    }

    /// The cached result for `peer`, if present and not expired.
    ///
    /// Waits for an in-flight probe of the same peer.
    pub async fn get(&self, peer: &PeerId) -> Option<ReachabilityResult> {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .cloned()?;
        let cached = slot.lock().await;
        cached
            .as_ref()
            .filter(|e| !e.is_expired(self.ttl))
            .map(|e| e.result.clone())
    }

    /// Drop expired and empty slots. Slots with a probe in flight are kept.
    ///
    /// Returns the number of slots removed.
    pub fn evict_expired(&self) -> usize {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(cached) => cached.as_ref().is_some_and(|e| !e.is_expired(self.ttl)),
            Err(_) => true,
        });
        let removed = before - slots.len();

        if removed > 0 {
            let evictions = self
                .counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed)
                + removed as u64;
            tracing::debug!(
                removed,
                remaining = slots.len(),
                cache_evictions = evictions,
                "reachability cache evicted expired entries"
            );
        }
        removed
    }

    /// Number of peers with a slot (including expired, not yet evicted ones).
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
