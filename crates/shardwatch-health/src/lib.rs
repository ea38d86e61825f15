//! shardwatch-health — reachability probing for swarm peers.
//!
//! # Architecture
//!
//! ```text
//! Prober
//!   ├── probe(peer, addrs, use_cache)
//!   │     └── ReachabilityCache::fetch_or_probe   (per-peer slot lock)
//!   │           └── dial_probe() → ReachabilityResult
//!   ├── probe_many()   bounded by a semaphore (probe_concurrency)
//!   └── check_now()    uncached, hard timeout, used by the HTTP API
//!         ├── dial_probe() outside the cache slot
//!         └── ReachabilityCache::try_insert   (skips a busy slot)
//! ```
//!
//! Periodic bulk probing reuses cached results until they expire; the
//! on-demand check always dials and then refreshes the cache unless a
//! periodic probe of the same peer is in flight.

pub mod cache;
pub mod dial;
pub mod prober;

pub use cache::ReachabilityCache;
pub use dial::{DialMode, dial_probe};
pub use prober::{Prober, ProberConfig};
