//! shardwatch-state — health snapshot types and publication.
//!
//! # Architecture
//!
//! ```text
//! ServerRecord (one per peer per block key, rebuilt every cycle)
//!   + ReachabilityResult (one per peer, from the prober cache)
//!   └─> ModelHealthSnapshot (per model: blocks, coverage, status)
//!         └─> GlobalSnapshot (all models + generation)
//!               └─> SnapshotStore (current + previous, atomically swapped)
//! ```
//!
//! Snapshots are immutable once built. Readers take an `Arc` to the
//! current one and keep it for the whole request; a publish never
//! mutates a snapshot someone else holds.

pub mod error;
pub mod store;
pub mod types;

pub use error::{MonitorError, MonitorResult};
pub use store::{PublishedSnapshot, SnapshotStore};
pub use types::*;
