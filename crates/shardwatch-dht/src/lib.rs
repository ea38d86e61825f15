//! shardwatch-dht — the monitor's view of the DHT.
//!
//! The DHT itself is an external collaborator. This crate only defines
//! the capability the monitor needs from it ([`DhtClient`]) and two
//! implementations:
//!
//! - [`GatewayDht`] — asks DHT gateway nodes over HTTP/1.
//! - [`MemoryDht`] — an in-process store for tests and fixture replays.
//!
//! Adapters never retry. A missing key is `Ok(None)`, which callers must
//! keep apart from `Err(DhtError::Timeout | DhtError::Transport)`: the
//! first means "nobody declared anything", the second "we could not ask".

pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;

pub use client::{DhtClient, DhtEntry, DhtValue};
pub use error::DhtError;
pub use gateway::GatewayDht;
pub use memory::MemoryDht;
