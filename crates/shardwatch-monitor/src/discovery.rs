//! Shard discovery.
//!
//! Every server announces itself under each block key it holds:
//! `"{dht_prefix}.{block}"` maps the server's peer id to its
//! [`ServerInfo`]. Discovery reads all block keys of a model and turns
//! the sub-entries into [`ServerRecord`]s. Staleness is left to the
//! aggregator, which knows the time the snapshot is built at.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use shardwatch_core::{ModelDescriptor, MonitorConfig, Multiaddr, PeerId};
use shardwatch_dht::{DhtClient, DhtError, DhtValue};
use shardwatch_state::{MonitorError, MonitorResult, ServerInfo, ServerRecord};

/// DHT access policy for one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Bound for each single DHT call.
    pub dht_timeout: Duration,
    /// Block keys queried at once.
    pub concurrency: usize,
    /// Extra attempts after a timeout or transport error.
    pub retries: u32,
    /// Delay before the first retry; doubles on every further one.
    pub retry_backoff: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            dht_timeout: Duration::from_secs(10),
            concurrency: 16,
            retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl From<&MonitorConfig> for DiscoveryOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            dht_timeout: config.dht_timeout,
            concurrency: config.dht_concurrency.max(1),
            retries: config.dht_retries,
            retry_backoff: config.dht_retry_backoff,
        }
    }
}

/// Read one key, retrying recoverable failures with exponential backoff.
async fn get_with_retry(
    dht: &dyn DhtClient,
    key: &str,
    opts: &DiscoveryOptions,
) -> Result<Option<DhtValue>, DhtError> {
    let mut attempt = 0u32;
    loop {
        match dht.get(key, opts.dht_timeout).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < opts.retries => {
                let delay = opts
                    .retry_backoff
                    .saturating_mul(1u32 << attempt.min(16));
                debug!(%key, attempt, ?delay, error = %e, "retrying dht get");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A declaration that survived decoding, before addresses are attached.
struct Declaration {
    info: ServerInfo,
    updated_at: f64,
}

/// Enumerate the servers declared for `model`.
///
/// Returns one record per (peer, block), sorted by block then peer.
/// Fails only when no block key could be read at all.
pub async fn discover(
    dht: &dyn DhtClient,
    model: &ModelDescriptor,
    opts: &DiscoveryOptions,
) -> MonitorResult<Vec<ServerRecord>> {
    let name = model.name();
    let mut replies: Vec<(u32, Result<Option<DhtValue>, DhtError>)> =
        stream::iter(0..model.num_blocks)
            .map(|block| async move {
                let key = model.block_key(block);
                (block, get_with_retry(dht, &key, opts).await)
            })
            .buffer_unordered(opts.concurrency.max(1))
            .collect()
            .await;
    replies.sort_by_key(|(block, _)| *block);

    let mut failures = 0u32;
    let mut last_error = None;
    let mut declarations: BTreeMap<(u32, PeerId), Declaration> = BTreeMap::new();

    for (block, reply) in replies {
        let value = match reply {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                warn!(model = %name, block, error = %e, "block query failed");
                failures += 1;
                last_error = Some(e);
                continue;
            }
        };

        for entry in value.entries {
            let peer = match entry.subkey.parse::<PeerId>() {
                Ok(peer) => peer,
                Err(e) => {
                    debug!(model = %name, block, subkey = %entry.subkey, error = %e, "skipping entry with bad peer id");
                    continue;
                }
            };
            let info: ServerInfo = match serde_json::from_value(entry.value) {
                Ok(info) => info,
                Err(e) => {
                    debug!(model = %name, block, %peer, error = %e, "skipping undecodable server info");
                    continue;
                }
            };
            if !info.span().contains(block) {
                debug!(
                    model = %name,
                    block,
                    %peer,
                    start = info.start_block,
                    end = info.end_block,
                    "skipping declaration whose span excludes its block"
                );
                continue;
            }

            let fresher = Declaration {
                info,
                updated_at: entry.updated_at,
            };
            match declarations.get(&(block, peer)) {
                // Ties keep the later-seen entry.
                Some(seen) if seen.updated_at > fresher.updated_at => {}
                _ => {
                    declarations.insert((block, peer), fresher);
                }
            }
        }
    }

    if model.num_blocks > 0 && failures == model.num_blocks {
        let err = last_error.map(MonitorError::from).unwrap_or_else(|| {
            MonitorError::Transport(format!("no block of {name} could be read"))
        });
        warn!(model = %name, failures, error = %err, "every block query failed");
        return Err(err);
    }

    let peers: BTreeSet<PeerId> = declarations.keys().map(|(_, p)| *p).collect();
    let addrs = resolve_addrs(dht, peers, opts).await;

    let records: Vec<ServerRecord> = declarations
        .into_iter()
        .map(|((block, peer_id), decl)| ServerRecord {
            addrs: addrs.get(&peer_id).cloned().unwrap_or_default(),
            span: decl.info.span(),
            peer_id,
            block,
            info: decl.info,
            updated_at: decl.updated_at,
        })
        .collect();

    info!(
        model = %name,
        records = records.len(),
        peers = addrs.len(),
        failed_blocks = failures,
        "discovery complete"
    );
    Ok(records)
}

/// Look up the visible addresses of each peer once.
///
/// A failed lookup leaves the peer without addresses.
async fn resolve_addrs(
    dht: &dyn DhtClient,
    peers: BTreeSet<PeerId>,
    opts: &DiscoveryOptions,
) -> HashMap<PeerId, Vec<Multiaddr>> {
    stream::iter(peers)
        .map(|peer| async move {
            let addrs = match dht.get_visible_maddrs(&peer, opts.dht_timeout).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    debug!(%peer, error = %e, "no visible addresses");
                    Vec::new()
                }
            };
            (peer, addrs)
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shardwatch_core::peer_id_from_digest;
    use shardwatch_dht::MemoryDht;
    use shardwatch_state::BlockSpan;

    use super::*;

    fn opts() -> DiscoveryOptions {
        DiscoveryOptions {
            dht_timeout: Duration::from_secs(1),
            concurrency: 4,
            retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn model(num_blocks: u32) -> ModelDescriptor {
        ModelDescriptor::new("https://huggingface.co/org/Model-1.5B", num_blocks)
    }

    fn peer(n: u8) -> PeerId {
        peer_id_from_digest([n; 32]).unwrap()
    }

    fn info(start: u32, end: u32) -> serde_json::Value {
        json!({"state": "online", "start_block": start, "end_block": end, "throughput": 10.0})
    }

    #[tokio::test]
    async fn one_record_per_peer_and_block() {
        let dht = MemoryDht::new();
        let m = model(4);
        let a = peer(1);
        let b = peer(2);
        for block in 0..4 {
            dht.put(&m.block_key(block), &a.to_base58(), info(0, 4), 100.0);
        }
        dht.put(&m.block_key(2), &b.to_base58(), info(2, 3), 100.0);
        let addr = "/ip4/10.0.0.1/tcp/31337".parse::<Multiaddr>().unwrap();
        dht.set_maddrs(&a, vec![addr.clone()]);

        let records = discover(&dht, &m, &opts()).await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.windows(2).all(|w| w[0].block <= w[1].block));

        let for_a: Vec<_> = records.iter().filter(|r| r.peer_id == a).collect();
        assert_eq!(for_a.len(), 4);
        assert!(for_a.iter().all(|r| r.addrs == vec![addr.clone()]));
        assert!(for_a.iter().all(|r| r.span == BlockSpan::new(0, 4)));

        // No known addresses: kept, with none.
        let for_b: Vec<_> = records.iter().filter(|r| r.peer_id == b).collect();
        assert_eq!(for_b.len(), 1);
        assert!(for_b[0].addrs.is_empty());
    }

    #[tokio::test]
    async fn missing_keys_are_empty_not_errors() {
        let dht = MemoryDht::new();
        let records = discover(&dht, &model(8), &opts()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn bad_entries_are_skipped() {
        let dht = MemoryDht::new();
        let m = model(2);
        let good = peer(1);
        dht.put(&m.block_key(0), &good.to_base58(), info(0, 2), 100.0);
        dht.put(&m.block_key(0), "not-a-peer-id!", info(0, 2), 100.0);
        dht.put(&m.block_key(0), &peer(2).to_base58(), json!({"garbage": true}), 100.0);
        // Declares blocks 1..2 but sits under block 0.
        dht.put(&m.block_key(0), &peer(3).to_base58(), info(1, 2), 100.0);

        let records = discover(&dht, &m, &opts()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].peer_id, good);
    }

    #[tokio::test]
    async fn duplicate_declarations_keep_the_freshest() {
        let dht = MemoryDht::new();
        let m = model(1);
        let p = peer(1);
        let key = m.block_key(0);
        dht.push_duplicate(&key, &p.to_base58(), json!({"start_block": 0, "end_block": 1, "throughput": 1.0}), 200.0);
        dht.push_duplicate(&key, &p.to_base58(), json!({"start_block": 0, "end_block": 1, "throughput": 2.0}), 100.0);
        dht.push_duplicate(&key, &p.to_base58(), json!({"start_block": 0, "end_block": 1, "throughput": 3.0}), 200.0);

        let records = discover(&dht, &m, &opts()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].updated_at, 200.0);
        // Tie on updated_at: the later-seen entry wins.
        assert_eq!(records[0].info.throughput, 3.0);
    }

    #[tokio::test]
    async fn partial_failures_are_tolerated() {
        let dht = MemoryDht::new();
        let m = model(3);
        let p = peer(1);
        dht.put(&m.block_key(0), &p.to_base58(), info(0, 3), 100.0);
        dht.set_key_timeout(&m.block_key(1));

        let records = discover(&dht, &m, &opts()).await.unwrap();
        assert_eq!(records.len(), 1);
        // 3 keys, plus 2 retries for the one that timed out.
        assert_eq!(dht.get_count(), 5);
    }

    #[tokio::test]
    async fn all_queries_timing_out_is_a_timeout() {
        let dht = MemoryDht::new();
        let m = model(2);
        for block in 0..2 {
            dht.set_key_timeout(&m.block_key(block));
        }
        let err = discover(&dht, &m, &opts()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn all_queries_failing_is_a_transport_error() {
        let dht = MemoryDht::new();
        dht.set_offline(true);
        let err = discover(&dht, &model(4), &opts()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Transport(_)), "{err}");
        assert_eq!(dht.get_count(), 4 * 3);
    }

    #[test]
    fn options_follow_config() {
        let mut config = MonitorConfig::with_models(vec![model(1)]);
        config.dht_retries = 5;
        config.dht_concurrency = 3;
        let opts = DiscoveryOptions::from(&config);
        assert_eq!(opts.retries, 5);
        assert_eq!(opts.concurrency, 3);
        assert_eq!(opts.dht_timeout, config.dht_timeout);
    }
}
