//! Dial targets inside peer multiaddrs.

use multiaddr::{Multiaddr, Protocol};

use crate::peer::PeerId;

/// What the monitor needs to know about a peer address.
pub trait MultiaddrExt {
    /// The peer id of the last `/p2p/` component, if any.
    fn peer_id(&self) -> Option<PeerId>;

    /// Host and port for a plain TCP dial.
    ///
    /// `None` for relayed (`p2p-circuit`) addresses and for transports
    /// other than bare TCP (QUIC, websockets, ...).
    fn tcp_dial_target(&self) -> Option<(String, u16)>;
}

impl MultiaddrExt for Multiaddr {
    fn peer_id(&self) -> Option<PeerId> {
        self.iter()
            .filter_map(|p| match p {
                Protocol::P2p(peer) => Some(peer),
                _ => None,
            })
            .last()
    }

    fn tcp_dial_target(&self) -> Option<(String, u16)> {
        let mut iter = self.iter();
        let host = match iter.next()? {
            Protocol::Ip4(ip) => ip.to_string(),
            Protocol::Ip6(ip) => ip.to_string(),
            Protocol::Dns(h) | Protocol::Dns4(h) | Protocol::Dns6(h) => h.into_owned(),
            _ => return None,
        };
        let port = match iter.next()? {
            Protocol::Tcp(port) => port,
            _ => return None,
        };
        // Only a trailing peer id may follow the port.
        iter.all(|p| matches!(p, Protocol::P2p(_)))
            .then_some((host, port))
    }
}
