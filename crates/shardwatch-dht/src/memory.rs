//! In-process DHT store.
//!
//! Used by tests, and by the daemon to replay a recorded DHT dump
//! (`--dht-fixture`). Failures can be injected to exercise the
//! timeout/transport paths of callers.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use shardwatch_core::{Multiaddr, PeerId};

use crate::client::{DhtClient, DhtEntry, DhtValue};
use crate::error::DhtError;

/// On-disk fixture format.
#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    records: HashMap<String, Vec<DhtEntry>>,
    #[serde(default)]
    maddrs: HashMap<PeerId, Vec<Multiaddr>>,
}

#[derive(Debug, Default)]
pub struct MemoryDht {
    records: RwLock<HashMap<String, DhtValue>>,
    maddrs: RwLock<HashMap<PeerId, Vec<Multiaddr>>>,
    /// Every call fails with a transport error while set.
    offline: AtomicBool,
    /// Keys whose reads time out.
    timeout_keys: RwLock<HashSet<String>>,
    /// Number of `get` calls served (including failed ones).
    gets: AtomicU64,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON fixture: `{"records": {key: [entries]}, "maddrs": {peer: [addrs]}}`.
    pub fn from_fixture(path: &Path) -> Result<Self, DhtError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DhtError::Transport(format!("read {}: {e}", path.display())))?;
        let fixture: Fixture =
            serde_json::from_str(&content).map_err(|e| DhtError::Decode(e.to_string()))?;

        let dht = Self::new();
        {
            let mut records = dht.records.write().unwrap_or_else(|e| e.into_inner());
            for (key, entries) in fixture.records {
                records.insert(key, DhtValue { entries });
            }
        }
        *dht.maddrs.write().unwrap_or_else(|e| e.into_inner()) = fixture.maddrs;
        debug!(path = %path.display(), "dht fixture loaded");
        Ok(dht)
    }

    /// Insert or replace one sub-entry of `key`.
    pub fn put(&self, key: &str, subkey: &str, value: serde_json::Value, updated_at: f64) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let entries = &mut records.entry(key.to_string()).or_default().entries;
        entries.retain(|e| e.subkey != subkey);
        entries.push(DhtEntry {
            subkey: subkey.to_string(),
            value,
            updated_at,
        });
    }

    /// Append a sub-entry without replacing an existing one with the same subkey.
    ///
    /// Real DHT replicas can return conflicting copies of one subkey.
    pub fn push_duplicate(&self, key: &str, subkey: &str, value: serde_json::Value, updated_at: f64) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry(key.to_string())
            .or_default()
            .entries
            .push(DhtEntry {
                subkey: subkey.to_string(),
                value,
                updated_at,
            });
    }

    pub fn remove(&self, key: &str) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn set_maddrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>) {
        self.maddrs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*peer, addrs);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_key_timeout(&self, key: &str) {
        self.timeout_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), DhtError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DhtError::Transport("dht is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DhtClient for MemoryDht {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<DhtValue>, DhtError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let times_out = self
            .timeout_keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key);
        if times_out {
            return Err(DhtError::Timeout(format!("get {key} after {timeout:?}")));
        }
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn get_visible_maddrs(
        &self,
        peer: &PeerId,
        _timeout: Duration,
    ) -> Result<Vec<Multiaddr>, DhtError> {
        self.check_online()?;
        self.maddrs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .cloned()
            .ok_or_else(|| DhtError::NotFound(format!("peer {peer}")))
    }
}

#[cfg(test)]
mod tests {
    use shardwatch_core::peer_id_from_digest;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn missing_key_is_none() {
        let dht = MemoryDht::new();
        assert_eq!(dht.get("model.0", TIMEOUT).await.unwrap(), None);
        assert_eq!(dht.get_count(), 1);
    }

    #[tokio::test]
    async fn put_replaces_same_subkey() {
        let dht = MemoryDht::new();
        dht.put("model.0", "peer-a", serde_json::json!({"v": 1}), 10.0);
        dht.put("model.0", "peer-a", serde_json::json!({"v": 2}), 20.0);
        dht.put("model.0", "peer-b", serde_json::json!({"v": 3}), 30.0);

        let value = dht.get("model.0", TIMEOUT).await.unwrap().unwrap();
        assert_eq!(value.entries.len(), 2);
        assert_eq!(value.entries[0].value["v"], 2);
    }

    #[tokio::test]
    async fn offline_is_transport_error() {
        let dht = MemoryDht::new();
        dht.set_offline(true);
        let err = dht.get("model.0", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, DhtError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn injected_timeout() {
        let dht = MemoryDht::new();
        dht.set_key_timeout("model.3");
        assert!(matches!(
            dht.get("model.3", TIMEOUT).await,
            Err(DhtError::Timeout(_))
        ));
        assert!(dht.get("model.2", TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_peer_maddrs_is_not_found() {
        let dht = MemoryDht::new();
        let peer = peer_id_from_digest([1; 32]).unwrap();
        let err = dht.get_visible_maddrs(&peer, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, DhtError::NotFound(_)));
        assert!(!err.is_retryable());

        let addr = "/ip4/127.0.0.1/tcp/31337".parse::<Multiaddr>().unwrap();
        dht.set_maddrs(&peer, vec![addr.clone()]);
        assert_eq!(dht.get_visible_maddrs(&peer, TIMEOUT).await.unwrap(), vec![addr]);
    }

    #[tokio::test]
    async fn loads_fixture_file() {
        let peer = peer_id_from_digest([4; 32]).unwrap();
        let fixture = serde_json::json!({
            "records": {
                "org/model.0": [
                    {"subkey": peer.to_string(), "value": {"start_block": 0, "end_block": 1}, "updated_at": 100.0}
                ]
            },
            "maddrs": { peer.to_string(): ["/ip4/10.0.0.1/tcp/31337"] }
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dht.json");
        std::fs::write(&path, fixture.to_string()).unwrap();

        let dht = MemoryDht::from_fixture(&path).unwrap();
        let value = dht.get("org/model.0", TIMEOUT).await.unwrap().unwrap();
        assert_eq!(value.entries.len(), 1);
        assert_eq!(dht.get_visible_maddrs(&peer, TIMEOUT).await.unwrap().len(), 1);
    }
}
