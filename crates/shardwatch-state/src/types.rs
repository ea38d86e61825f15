//! Domain types for health snapshots.
//!
//! Everything here serializes to the JSON served at `/api/v1/state`.
//! Timestamps are unix seconds as `f64`, matching what peers write into
//! the DHT.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use shardwatch_core::{Multiaddr, PeerId};

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ── Server declarations ────────────────────────────────────────────

/// Lifecycle state a server announces for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Offline,
    Joining,
    #[default]
    Online,
}

/// Half-open range of blocks `[start, end)` a server declares it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpan {
    pub start: u32,
    pub end: u32,
}

impl BlockSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, block: u32) -> bool {
        self.start <= block && block < self.end
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The value a server stores under each block key it serves.
///
/// Only `start_block`/`end_block` are required; everything else is
/// informational and defaults when a peer runs an older version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub state: ServerState,
    pub start_block: u32,
    pub end_block: u32,
    #[serde(default)]
    pub throughput: f64,
    #[serde(default)]
    pub public_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub inference_rps: Option<f64>,
    #[serde(default)]
    pub forward_rps: Option<f64>,
    #[serde(default)]
    pub network_rps: Option<f64>,
    #[serde(default)]
    pub cache_tokens_left: Option<u64>,
    /// Requests queued in the server's session pool.
    #[serde(default)]
    pub pending_requests: Option<u32>,
    #[serde(default)]
    pub torch_dtype: Option<String>,
    #[serde(default)]
    pub quant_type: Option<String>,
    #[serde(default)]
    pub adapters: Vec<String>,
    #[serde(default)]
    pub using_relay: bool,
    /// Round-trip times (seconds) the server measured to its neighbours.
    #[serde(default)]
    pub next_pings: BTreeMap<String, f64>,
}

impl ServerInfo {
    pub fn span(&self) -> BlockSpan {
        BlockSpan::new(self.start_block, self.end_block)
    }
}

/// One peer's declaration as read from one block key.
///
/// Rebuilt from the DHT every cycle and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerRecord {
    pub peer_id: PeerId,
    /// Block index of the DHT key this declaration was read from.
    pub block: u32,
    pub span: BlockSpan,
    pub info: ServerInfo,
    pub addrs: Vec<Multiaddr>,
    /// Unix seconds at which the DHT entry was written.
    pub updated_at: f64,
}

impl ServerRecord {
    /// Whether the declaration is older than `ttl` at `now`.
    pub fn is_stale(&self, now: f64, ttl: Duration) -> bool {
        now - self.updated_at > ttl.as_secs_f64()
    }
}

// ── Reachability ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable,
    /// No dial could be attempted (no usable address).
    Unknown,
}

/// Outcome of a dial attempt against one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityResult {
    pub peer_id: PeerId,
    pub outcome: Reachability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Address that answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ReachabilityResult {
    pub fn reachable(peer_id: PeerId, address: String, latency: Duration) -> Self {
        Self {
            peer_id,
            outcome: Reachability::Reachable,
            error: None,
            checked_at: unix_now(),
            latency_ms: Some(latency.as_secs_f64() * 1000.0),
            address: Some(address),
        }
    }

    pub fn unreachable(peer_id: PeerId, error: impl Into<String>) -> Self {
        Self {
            peer_id,
            outcome: Reachability::Unreachable,
            error: Some(error.into()),
            checked_at: unix_now(),
            latency_ms: None,
            address: None,
        }
    }

    pub fn unknown(peer_id: PeerId, error: impl Into<String>) -> Self {
        Self {
            peer_id,
            outcome: Reachability::Unknown,
            error: Some(error.into()),
            checked_at: unix_now(),
            latency_ms: None,
            address: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.outcome == Reachability::Reachable
    }
}

// ── Per-model health ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Every block has a fresh, reachable server.
    Healthy,
    /// Some blocks are covered, some are not.
    Degraded,
    /// No block is covered.
    Broken,
}

impl ModelStatus {
    pub const ALL: [ModelStatus; 3] = [
        ModelStatus::Healthy,
        ModelStatus::Degraded,
        ModelStatus::Broken,
    ];

    /// Status as a pure function of coverage.
    pub fn classify(block_coverage: u32, num_blocks: u32) -> Self {
        if block_coverage == 0 {
            ModelStatus::Broken
        } else if block_coverage >= num_blocks {
            ModelStatus::Healthy
        } else {
            ModelStatus::Degraded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Healthy => "healthy",
            ModelStatus::Degraded => "degraded",
            ModelStatus::Broken => "broken",
        }
    }
}

/// A server's contribution to one block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockServer {
    pub peer_id: PeerId,
    pub reachability: Reachability,
    pub stale: bool,
    pub state: ServerState,
    pub throughput: f64,
    pub updated_at: f64,
}

impl BlockServer {
    /// Whether this server counts toward block coverage.
    pub fn covers(&self) -> bool {
        !self.stale && self.reachability == Reachability::Reachable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockHealth {
    pub index: u32,
    pub covered: bool,
    /// Number of servers currently covering the block.
    pub redundancy: u32,
    /// At most one entry per peer.
    pub servers: Vec<BlockServer>,
}

/// One row per server in a model's server table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerRow {
    pub peer_id: PeerId,
    pub public_name: Option<String>,
    pub version: Option<String>,
    pub state: ServerState,
    pub span: BlockSpan,
    /// Blocks this peer was found under, in ascending order.
    pub blocks: Vec<u32>,
    pub throughput: f64,
    pub inference_rps: Option<f64>,
    pub cache_tokens_left: Option<u64>,
    pub pending_requests: Option<u32>,
    pub torch_dtype: Option<String>,
    pub quant_type: Option<String>,
    pub adapters: Vec<String>,
    pub using_relay: bool,
    pub addrs: Vec<Multiaddr>,
    pub reachability: Reachability,
    pub error: Option<String>,
    pub latency_ms: Option<f64>,
    pub stale: bool,
    pub updated_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachabilityIssue {
    pub peer_id: PeerId,
    pub public_name: Option<String>,
    pub outcome: Reachability,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelHealthSnapshot {
    pub name: String,
    pub short_name: String,
    pub repository: String,
    pub dht_prefix: String,
    pub num_blocks: u32,
    pub official: bool,
    pub limited: bool,
    pub status: ModelStatus,
    /// Blocks with at least one fresh, reachable server. Never exceeds `num_blocks`.
    pub block_coverage: u32,
    pub blocks: Vec<BlockHealth>,
    pub servers: Vec<ServerRow>,
    pub reachability_issues: Vec<ReachabilityIssue>,
}

// ── Global snapshot ───────────────────────────────────────────────

/// Reachability of one configured bootstrap peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapState {
    pub addr: String,
    pub peer_id: PeerId,
    pub reachability: Reachability,
    pub error: Option<String>,
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contributor {
    pub name: String,
    /// Covered blocks served across all models.
    pub blocks: u32,
}

/// Immutable view of the whole swarm at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSnapshot {
    pub generation: u64,
    pub created_at: f64,
    pub update_duration_secs: f64,
    pub update_period_secs: f64,
    pub bootstrap_states: Vec<BootstrapState>,
    pub models: Vec<ModelHealthSnapshot>,
    pub top_contributors: Vec<Contributor>,
}

impl GlobalSnapshot {
    pub fn model(&self, name: &str) -> Option<&ModelHealthSnapshot> {
        self.models.iter().find(|m| m.name == name)
    }
}
