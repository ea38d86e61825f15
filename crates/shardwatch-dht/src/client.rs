//! The capability interface over the DHT.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shardwatch_core::{Multiaddr, PeerId};

use crate::error::DhtError;

/// One sub-entry of a dictionary value.
///
/// Servers announce themselves under `{prefix}.{block}` with their peer id
/// as the subkey, so one key holds one entry per server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhtEntry {
    pub subkey: String,
    /// Raw value as stored by the peer; decoded by the caller.
    pub value: serde_json::Value,
    /// Unix seconds at which the entry was last written.
    pub updated_at: f64,
}

/// A dictionary value read from one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DhtValue {
    pub entries: Vec<DhtEntry>,
}

/// What the monitor needs from the DHT.
///
/// Implementations bound every call by `timeout` and never retry.
#[async_trait]
pub trait DhtClient: Send + Sync + fmt::Debug {
    /// Read a key. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<DhtValue>, DhtError>;

    /// Addresses the DHT has seen `peer` listening on.
    async fn get_visible_maddrs(
        &self,
        peer: &PeerId,
        timeout: Duration,
    ) -> Result<Vec<Multiaddr>, DhtError>;
}
