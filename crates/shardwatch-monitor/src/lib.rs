//! shardwatch-monitor — the background half of the health monitor.
//!
//! # Architecture
//!
//! ```text
//! Updater::run()   one cycle per update_period
//!   └── run_cycle()
//!         ├── Prober::probe()          bootstrap peers
//!         ├── discover()               per model, DHT keys "{prefix}.{block}"
//!         ├── Prober::probe_many()     every distinct discovered peer
//!         ├── aggregate()              per model → ModelHealthSnapshot
//!         └── SnapshotStore::publish() JSON + Prometheus rendered once
//! ```
//!
//! A failed cycle publishes nothing; readers keep the previous snapshot.

pub mod aggregator;
pub mod discovery;
pub mod updater;

pub use aggregator::{aggregate, top_contributors};
pub use discovery::{DiscoveryOptions, discover};
pub use updater::{Updater, UpdaterPhase};
