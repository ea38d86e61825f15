//! Dial probe logic.
//!
//! Tries each TCP-dialable address of a peer in order and stops at the
//! first one that answers. With [`DialMode::Multistream`] the peer must
//! also complete the libp2p multistream-select greeting, which tells a
//! live node apart from a port that merely accepts connections.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use shardwatch_core::{Multiaddr, MultiaddrExt, PeerId};
use shardwatch_state::ReachabilityResult;

/// Length-prefixed multistream-select protocol header.
pub const MULTISTREAM_HEADER: &[u8] = b"\x13/multistream/1.0.0\n";

/// Message reported when a peer has no address we can dial.
pub const NO_DIALABLE_ADDRESS: &str = "no dialable address";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialMode {
    /// A completed TCP connect counts as reachable.
    TcpConnect,
    /// The peer must answer the multistream-select greeting.
    Multistream,
}

/// Probe one peer.
///
/// `timeout` bounds each address attempt separately.
pub async fn dial_probe(
    peer: &PeerId,
    addrs: &[Multiaddr],
    timeout: Duration,
    mode: DialMode,
) -> ReachabilityResult {
    let targets: Vec<(String, u16, &Multiaddr)> = addrs
        .iter()
        .filter_map(|a| a.tcp_dial_target().map(|(host, port)| (host, port, a)))
        .collect();

    if targets.is_empty() {
        debug!(%peer, known = addrs.len(), "no tcp-dialable address");
        return ReachabilityResult::unknown(*peer, NO_DIALABLE_ADDRESS);
    }

    let mut last_error = String::new();
    for (host, port, addr) in targets {
        let started = Instant::now();
        match tokio::time::timeout(timeout, attempt(&host, port, mode)).await {
            Ok(Ok(())) => {
                let rtt = started.elapsed();
                debug!(%peer, %addr, rtt_ms = rtt.as_millis() as u64, "peer reachable");
                return ReachabilityResult::reachable(*peer, addr.to_string(), rtt);
            }
            Ok(Err(e)) => {
                debug!(%peer, %addr, error = %e, "dial failed");
                last_error = format!("{addr}: {e}");
            }
            Err(_) => {
                debug!(%peer, %addr, "dial timed out");
                last_error = format!("{addr}: timed out after {timeout:?}");
            }
        }
    }

    ReachabilityResult::unreachable(*peer, last_error)
}

async fn attempt(host: &str, port: u16, mode: DialMode) -> std::io::Result<()> {
    let mut stream = TcpStream::connect((host, port)).await?;
    if mode == DialMode::TcpConnect {
        return Ok(());
    }

    stream.write_all(MULTISTREAM_HEADER).await?;
    let mut reply = [0u8; MULTISTREAM_HEADER.len()];
    stream.read_exact(&mut reply).await?;
    if &reply[..] != MULTISTREAM_HEADER {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "peer did not answer multistream-select",
        ));
    }
    Ok(())
}
