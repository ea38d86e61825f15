//! Peer identities as they appear in the DHT.
//!
//! A peer id is a multihash of the peer's public key, written in base58
//! (`Qm...` for sha2-256 digests, `12D3Koo...` for inlined ed25519 keys).

pub use libp2p_identity::{ParseError as PeerIdError, PeerId};

/// Multihash code for sha2-256.
const SHA2_256: u8 = 0x12;

/// Peer id whose multihash is the sha2-256 `digest`.
///
/// Names a peer without holding its key, as DHT dumps do.
pub fn peer_id_from_digest(digest: [u8; 32]) -> Result<PeerId, PeerIdError> {
    let mut bytes = Vec::with_capacity(2 + digest.len());
    bytes.extend_from_slice(&[SHA2_256, 32]);
    bytes.extend_from_slice(&digest);
    PeerId::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOTSTRAP: &str = "QmRDEYd5HvKggXbHT8oudvNae4zDLE6bMQRcR8bhKxE4Ex";

    #[test]
    fn parse_sha256_peer_id() {
        let peer: PeerId = BOOTSTRAP.parse().unwrap();
        assert_eq!(peer.to_base58(), BOOTSTRAP);
        assert_eq!(peer.to_bytes().len(), 34);
        assert_eq!(peer.to_bytes()[0], SHA2_256);
    }

    #[test]
    fn digest_ids_are_qm_and_parse_back() {
        let peer = peer_id_from_digest([7; 32]).unwrap();
        assert!(peer.to_base58().starts_with("Qm"));
        let parsed: PeerId = peer.to_base58().parse().unwrap();
        assert_eq!(parsed, peer);
        assert_ne!(peer, peer_id_from_digest([8; 32]).unwrap());
    }

    #[test]
    fn rejects_invalid_base58_alphabet() {
        // '0', 'O', 'I' and 'l' are not in the base58 alphabet.
        assert!("Qm0OIl".parse::<PeerId>().is_err());
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn serde_uses_base58_string() {
        let peer: PeerId = BOOTSTRAP.parse().unwrap();
        let json = serde_json::to_string(&peer).unwrap();
        assert_eq!(json, format!("\"{BOOTSTRAP}\""));
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, peer);
    }
}
