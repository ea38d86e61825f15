//! State aggregation.
//!
//! Pure functions from one cycle's records and probe results to a model
//! snapshot. Nothing is carried over between cycles.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use shardwatch_core::{ModelDescriptor, PeerId};
use shardwatch_state::{
    BlockHealth, BlockServer, Contributor, ModelHealthSnapshot, ModelStatus, Reachability,
    ReachabilityIssue, ReachabilityResult, ServerRecord, ServerRow,
};

/// How many names `top_contributors` keeps.
pub const MAX_CONTRIBUTORS: usize = 20;

/// Build the health of one model.
///
/// A block is covered iff at least one of its records is fresh at `now`
/// and belongs to a peer whose probe came back reachable. Peers missing
/// from `reachability` count as [`Reachability::Unknown`].
pub fn aggregate<'a>(
    model: &ModelDescriptor,
    records: &[ServerRecord],
    reachability: impl Fn(&PeerId) -> Option<&'a ReachabilityResult>,
    now: f64,
    record_ttl: Duration,
) -> ModelHealthSnapshot {
    let num_blocks = model.num_blocks;
    let mut blocks: Vec<BlockHealth> = (0..num_blocks)
        .map(|index| BlockHealth {
            index,
            covered: false,
            redundancy: 0,
            servers: Vec::new(),
        })
        .collect();
    // Per peer: its freshest record and the blocks it was found under.
    let mut peers: BTreeMap<&PeerId, (&ServerRecord, Vec<u32>)> = BTreeMap::new();

    for record in records.iter().filter(|r| r.block < num_blocks) {
        let outcome = reachability(&record.peer_id)
            .map(|r| r.outcome)
            .unwrap_or(Reachability::Unknown);
        let server = BlockServer {
            peer_id: record.peer_id,
            reachability: outcome,
            stale: record.is_stale(now, record_ttl),
            state: record.info.state,
            throughput: record.info.throughput,
            updated_at: record.updated_at,
        };

        let servers = &mut blocks[record.block as usize].servers;
        match servers.iter_mut().find(|s| s.peer_id == record.peer_id) {
            Some(existing) if existing.updated_at <= server.updated_at => *existing = server,
            Some(_) => {}
            None => servers.push(server),
        }

        let (freshest, found_under) = peers
            .entry(&record.peer_id)
            .or_insert_with(|| (record, Vec::new()));
        if record.updated_at > freshest.updated_at {
            *freshest = record;
        }
        if !found_under.contains(&record.block) {
            found_under.push(record.block);
        }
    }

    for block in &mut blocks {
        block.servers.sort_by(|a, b| {
            b.throughput
                .total_cmp(&a.throughput)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        block.redundancy = block.servers.iter().filter(|s| s.covers()).count() as u32;
        block.covered = block.redundancy > 0;
    }
    let block_coverage = blocks.iter().filter(|b| b.covered).count() as u32;

    let mut servers: Vec<ServerRow> = peers
        .into_iter()
        .map(|(peer_id, (record, mut found_under))| {
            found_under.sort_unstable();
            let probe = reachability(peer_id);
            ServerRow {
                peer_id: *peer_id,
                public_name: record.info.public_name.clone(),
                version: record.info.version.clone(),
                state: record.info.state,
                span: record.span,
                blocks: found_under,
                throughput: record.info.throughput,
                inference_rps: record.info.inference_rps,
                cache_tokens_left: record.info.cache_tokens_left,
                pending_requests: record.info.pending_requests,
                torch_dtype: record.info.torch_dtype.clone(),
                quant_type: record.info.quant_type.clone(),
                adapters: record.info.adapters.clone(),
                using_relay: record.info.using_relay,
                addrs: record.addrs.clone(),
                reachability: probe.map(|r| r.outcome).unwrap_or(Reachability::Unknown),
                error: probe.and_then(|r| r.error.clone()),
                latency_ms: probe.and_then(|r| r.latency_ms),
                stale: record.is_stale(now, record_ttl),
                updated_at: record.updated_at,
            }
        })
        .collect();
    servers.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then_with(|| a.span.end.cmp(&b.span.end))
            .then_with(|| a.peer_id.cmp(&b.peer_id))
    });

    let reachability_issues = servers
        .iter()
        .filter(|row| row.reachability != Reachability::Reachable)
        .map(|row| ReachabilityIssue {
            peer_id: row.peer_id,
            public_name: row.public_name.clone(),
            outcome: row.reachability,
            error: row.error.clone(),
        })
        .collect();

    ModelHealthSnapshot {
        name: model.name().to_string(),
        short_name: model.short_name().to_string(),
        repository: model.repository.clone(),
        dht_prefix: model.prefix(),
        num_blocks,
        official: model.official,
        limited: model.limited,
        status: ModelStatus::classify(block_coverage, num_blocks),
        block_coverage,
        blocks,
        servers,
        reachability_issues,
    }
}

/// Public names ranked by the number of covered blocks their peers serve
/// across all models. Peers without a public name are not ranked.
pub fn top_contributors(models: &[ModelHealthSnapshot]) -> Vec<Contributor> {
    let mut totals: HashMap<&str, u32> = HashMap::new();
    for model in models {
        let names: HashMap<&PeerId, &str> = model
            .servers
            .iter()
            .filter_map(|row| row.public_name.as_deref().map(|n| (&row.peer_id, n)))
            .collect();
        for block in &model.blocks {
            for server in block.servers.iter().filter(|s| s.covers()) {
                if let Some(name) = names.get(&server.peer_id) {
                    *totals.entry(*name).or_default() += 1;
                }
            }
        }
    }

    let mut ranked: Vec<Contributor> = totals
        .into_iter()
        .map(|(name, blocks)| Contributor {
            name: name.to_string(),
            blocks,
        })
        .collect();
    ranked.sort_by(|a, b| b.blocks.cmp(&a.blocks).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(MAX_CONTRIBUTORS);
    ranked
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use shardwatch_core::{Multiaddr, peer_id_from_digest};
    use shardwatch_state::{BlockSpan, ServerInfo};

    use super::*;

    const NOW: f64 = 10_000.0;
    const TTL: Duration = Duration::from_secs(300);

    fn peer(n: u8) -> PeerId {
        peer_id_from_digest([n; 32]).unwrap()
    }

    fn model(num_blocks: u32) -> ModelDescriptor {
        ModelDescriptor::new("org/Model", num_blocks)
    }

    fn record(peer_id: &PeerId, block: u32, span: (u32, u32), updated_at: f64) -> ServerRecord {
        let info: ServerInfo = serde_json::from_value(serde_json::json!({
            "start_block": span.0,
            "end_block": span.1,
            "throughput": 5.0,
            "public_name": format!("node-{peer_id}"),
        }))
        .unwrap();
        ServerRecord {
            peer_id: *peer_id,
            block,
            span: BlockSpan::new(span.0, span.1),
            info,
            addrs: vec!["/ip4/10.0.0.1/tcp/31337".parse::<Multiaddr>().unwrap()],
            updated_at,
        }
    }

    fn reachable(peers: &[&PeerId]) -> HashMap<PeerId, ReachabilityResult> {
        peers
            .iter()
            .map(|p| {
                (
                    **p,
                    ReachabilityResult::reachable(
                        **p,
                        "/ip4/10.0.0.1/tcp/31337".to_string(),
                        Duration::from_millis(5),
                    ),
                )
            })
            .collect()
    }

    #[test]
    fn all_blocks_fresh_and_reachable_is_healthy() {
        let p = peer(1);
        let records: Vec<_> = (0..16).map(|b| record(&p, b, (0, 16), NOW - 10.0)).collect();
        let results = reachable(&[&p]);

        let snap = aggregate(&model(16), &records, |id| results.get(id), NOW, TTL);
        assert_eq!(snap.block_coverage, 16);
        assert_eq!(snap.status, ModelStatus::Healthy);
        assert_eq!(snap.blocks.len(), 16);
        assert_eq!(snap.servers.len(), 1);
        assert_eq!(snap.servers[0].blocks, (0..16).collect::<Vec<_>>());
        assert!(snap.reachability_issues.is_empty());
    }

    #[test]
    fn one_stale_block_degrades() {
        let p = peer(1);
        let records: Vec<_> = (0..16)
            .map(|b| {
                let updated_at = if b == 7 { NOW - 301.0 } else { NOW - 10.0 };
                record(&p, b, (0, 16), updated_at)
            })
            .collect();
        let results = reachable(&[&p]);

        let snap = aggregate(&model(16), &records, |id| results.get(id), NOW, TTL);
        assert_eq!(snap.block_coverage, 15);
        assert_eq!(snap.status, ModelStatus::Degraded);
        assert!(!snap.blocks[7].covered);
        assert!(snap.blocks[7].servers[0].stale);
    }

    #[test]
    fn no_records_is_broken() {
        let snap = aggregate(&model(4), &[], |_| None, NOW, TTL);
        assert_eq!(snap.block_coverage, 0);
        assert_eq!(snap.status, ModelStatus::Broken);
        assert_eq!(snap.blocks.len(), 4);
        assert!(snap.servers.is_empty());
    }

    #[test]
    fn unknown_and_unprobed_peers_never_cover() {
        let probed = peer(1);
        let unprobed = peer(2);
        let records = vec![
            record(&probed, 0, (0, 1), NOW),
            record(&unprobed, 1, (1, 2), NOW),
        ];
        let mut results = HashMap::new();
        results.insert(
            probed,
            ReachabilityResult::unknown(probed, "no dialable address"),
        );

        let snap = aggregate(&model(2), &records, |id| results.get(id), NOW, TTL);
        assert_eq!(snap.block_coverage, 0);
        assert_eq!(snap.status, ModelStatus::Broken);
        assert_eq!(snap.reachability_issues.len(), 2);
        let issue = snap
            .reachability_issues
            .iter()
            .find(|i| i.peer_id == probed)
            .unwrap();
        assert_eq!(issue.error.as_deref(), Some("no dialable address"));
    }

    #[test]
    fn redundant_peers_are_kept() {
        let a = peer(1);
        let b = peer(2);
        let c = peer(3);
        let records = vec![
            record(&a, 0, (0, 1), NOW),
            record(&b, 0, (0, 2), NOW),
            record(&c, 0, (0, 1), NOW),
        ];
        let mut results = reachable(&[&a, &b]);
        results.insert(c, ReachabilityResult::unreachable(c, "refused"));

        let snap = aggregate(&model(2), &records, |id| results.get(id), NOW, TTL);
        assert_eq!(snap.blocks[0].servers.len(), 3);
        assert_eq!(snap.blocks[0].redundancy, 2);
        assert!(!snap.blocks[1].covered);
        assert_eq!(snap.status, ModelStatus::Degraded);
    }

    #[test]
    fn a_peer_appears_once_per_block() {
        let p = peer(1);
        let records = vec![record(&p, 0, (0, 1), NOW - 500.0), record(&p, 0, (0, 1), NOW)];
        let results = reachable(&[&p]);

        let snap = aggregate(&model(1), &records, |id| results.get(id), NOW, TTL);
        assert_eq!(snap.blocks[0].servers.len(), 1);
        assert!(!snap.blocks[0].servers[0].stale);
        assert_eq!(snap.status, ModelStatus::Healthy);
    }

    #[test]
    fn out_of_range_blocks_are_ignored() {
        let p = peer(1);
        let records = vec![record(&p, 0, (0, 9), NOW), record(&p, 8, (0, 9), NOW)];
        let results = reachable(&[&p]);

        let snap = aggregate(&model(2), &records, |id| results.get(id), NOW, TTL);
        assert_eq!(snap.blocks.len(), 2);
        assert!(snap.block_coverage <= snap.num_blocks);
        assert_eq!(snap.servers[0].blocks, vec![0]);
    }

    #[test]
    fn contributors_ranked_by_covered_blocks() {
        let a = peer(1);
        let b = peer(2);
        let mut records: Vec<_> = (0..3).map(|blk| record(&a, blk, (0, 3), NOW)).collect();
        records.push(record(&b, 0, (0, 1), NOW));
        let results = reachable(&[&a, &b]);
        let first = aggregate(&model(3), &records, |id| results.get(id), NOW, TTL);

        let other = ModelDescriptor::new("org/Other", 1);
        let second = aggregate(&other, &[record(&b, 0, (0, 1), NOW)], |id| results.get(id), NOW, TTL);

        let ranked = top_contributors(&[first, second]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].blocks, 3);
        assert_eq!(ranked[0].name, format!("node-{a}"));
        assert_eq!(ranked[1].blocks, 2);
    }
}
