//! shardwatch-api — read API for the health monitor.
//!
//! Handlers only read the published snapshot; they never start a cycle.
//! The one exception is the on-demand reachability check, which dials
//! the peer directly.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/state` | Current snapshot as JSON |
//! | GET | `/api/v1/is_reachable/{peer_id}` | Fresh dial of one peer |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/api/prometheus` | Same as `/metrics` |
//! | GET | anything else | Frontend bundle |

pub mod frontend;
pub mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;

use shardwatch_dht::DhtClient;
use shardwatch_health::Prober;
use shardwatch_state::SnapshotStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: SnapshotStore,
    pub prober: Prober,
    pub dht: Arc<dyn DhtClient>,
    /// Bound for the address lookup of an on-demand check.
    pub dht_timeout: Duration,
    /// Directory holding the built frontend.
    pub frontend_dist: Arc<PathBuf>,
}

/// Build the complete router (API + metrics + frontend fallback).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/state", get(handlers::get_state))
        .route("/is_reachable/{peer_id}", get(handlers::is_reachable));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/api/prometheus", get(handlers::prometheus_metrics))
        .fallback(frontend::serve_frontend)
        .with_state(state)
}
