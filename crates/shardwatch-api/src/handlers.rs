//! Read API handlers.
//!
//! Snapshot handlers copy out the bodies rendered at publish time, so a
//! request costs one pointer load and one copy no matter how large the
//! swarm is.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Extensions, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shardwatch_core::PeerId;
use shardwatch_metrics::CONTENT_TYPE as PROMETHEUS_CONTENT_TYPE;

use crate::ApiState;

/// Message served while no snapshot has been published.
pub const NOT_READY: &str = "state is not ready yet";

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: msg.to_string(),
        }),
    )
        .into_response()
}

/// Body of `/api/v1/is_reachable/{peer_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReachabilityReply {
    pub success: bool,
    /// Why the peer could not be reached.
    pub message: Option<String>,
    /// Address the request came from.
    pub your_ip: String,
}

/// GET /api/v1/state
pub async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.current() {
        Some(published) => (
            [(header::CONTENT_TYPE, "application/json")],
            published.state_json.clone(),
        )
            .into_response(),
        None => error_response(NOT_READY, StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// GET /api/v1/is_reachable/{peer_id}
///
/// Always dials; a cached result is never returned. The fresh one replaces
/// it unless a periodic probe for the same peer is in flight.
pub async fn is_reachable(
    State(state): State<ApiState>,
    Path(peer_id): Path<String>,
    extensions: Extensions,
) -> impl IntoResponse {
    let peer = match peer_id.parse::<PeerId>() {
        Ok(peer) => peer,
        Err(e) => {
            return error_response(&format!("invalid peer id: {e}"), StatusCode::BAD_REQUEST);
        }
    };

    let addrs = match state.dht.get_visible_maddrs(&peer, state.dht_timeout).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(%peer, error = %e, "address lookup failed");
            Vec::new()
        }
    };
    let result = state.prober.check_now(&peer, &addrs).await;

    // Present when served through `into_make_service_with_connect_info`.
    let your_ip = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!(%peer, outcome = ?result.outcome, %your_ip, "on-demand reachability check");

    Json(ReachabilityReply {
        success: result.is_reachable(),
        message: result.error,
        your_ip,
    })
    .into_response()
}

/// GET /metrics and GET /api/prometheus
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.current() {
        Some(published) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            published.prometheus.clone(),
        )
            .into_response(),
        None => error_response(NOT_READY, StatusCode::SERVICE_UNAVAILABLE),
    }
}
