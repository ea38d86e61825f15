//! DHT gateway client.
//!
//! Talks HTTP/1 to one or more gateway nodes that expose the swarm's DHT:
//!
//! ```text
//! GET /dht/v1/get/{key}              -> {"entries": [{subkey, value, updated_at}]}
//! GET /dht/v1/peers/{peer}/maddrs    -> {"maddrs": ["/ip4/.../tcp/..."]}
//! ```
//!
//! Gateways are tried in order; a transport failure moves on to the next
//! one while the call's deadline lasts. A 404 is an answer, not a failure.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use shardwatch_core::{Multiaddr, PeerId};

use crate::client::{DhtClient, DhtValue};
use crate::error::DhtError;

#[derive(Debug, Clone)]
pub struct GatewayDht {
    gateways: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MaddrsReply {
    maddrs: Vec<String>,
}

/// Outcome of one request that reached a gateway.
enum Reply {
    Found(Bytes),
    Missing,
}

impl GatewayDht {
    /// `gateways` are `host:port` strings.
    pub fn new(gateways: Vec<String>) -> Self {
        Self { gateways }
    }

    pub fn gateways(&self) -> &[String] {
        &self.gateways
    }

    /// `timeout` bounds the whole call, fail-over included.
    async fn fetch(&self, path: &str, timeout: Duration) -> Result<Reply, DhtError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_err = DhtError::Transport("no dht gateways configured".to_string());
        for gateway in &self.gateways {
            match tokio::time::timeout_at(deadline, request(gateway, path)).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => {
                    debug!(%gateway, %path, error = %e, "dht gateway request failed");
                    last_err = e;
                }
                Err(_) => {
                    debug!(%gateway, %path, "dht gateway request timed out");
                    return Err(DhtError::Timeout(format!(
                        "{path} after {timeout:?} (last tried {gateway})"
                    )));
                }
            }
        }
        Err(last_err)
    }
}

async fn request(gateway: &str, path: &str) -> Result<Reply, DhtError> {
    let stream = tokio::net::TcpStream::connect(gateway)
        .await
        .map_err(|e| DhtError::Transport(format!("connect {gateway}: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| DhtError::Transport(format!("handshake {gateway}: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", gateway)
        .header("accept", "application/json")
        .header("user-agent", "shardwatch/0.1")
        .body(http_body_util::Empty::<Bytes>::new())
        .map_err(|e| DhtError::Transport(format!("build request: {e}")))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| DhtError::Transport(format!("request {gateway}{path}: {e}")))?;

    let status = resp.status();
    if status == http::StatusCode::NOT_FOUND {
        return Ok(Reply::Missing);
    }
    if !status.is_success() {
        return Err(DhtError::Transport(format!("{gateway}{path} returned {status}")));
    }

    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| DhtError::Transport(format!("read body from {gateway}: {e}")))?
        .to_bytes();
    Ok(Reply::Found(body))
}

/// Percent-encode one path segment (RFC 3986 unreserved characters pass through).
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl DhtClient for GatewayDht {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<DhtValue>, DhtError> {
        let path = format!("/dht/v1/get/{}", encode_segment(key));
        match self.fetch(&path, timeout).await? {
            Reply::Missing => Ok(None),
            Reply::Found(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| DhtError::Decode(format!("get {key}: {e}"))),
        }
    }

    async fn get_visible_maddrs(
        &self,
        peer: &PeerId,
        timeout: Duration,
    ) -> Result<Vec<Multiaddr>, DhtError> {
        let path = format!("/dht/v1/peers/{}/maddrs", peer.to_base58());
        let body = match self.fetch(&path, timeout).await? {
            Reply::Missing => return Err(DhtError::NotFound(format!("peer {peer}"))),
            Reply::Found(body) => body,
        };
        let reply: MaddrsReply = serde_json::from_slice(&body)
            .map_err(|e| DhtError::Decode(format!("maddrs of {peer}: {e}")))?;

        // Unparsable addresses are dropped; the rest stay dialable.
        Ok(reply
            .maddrs
            .iter()
            .filter_map(|s| match s.parse::<Multiaddr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    debug!(%peer, addr = %s, error = %e, "skipping malformed maddr");
                    None
                }
            })
            .collect())
    }
}
