//! shardwatch-core — shared configuration and identity types.
//!
//! Everything here is loaded once at startup and immutable afterwards:
//! the monitor configuration, the models it watches, and the peer
//! identities and addresses it reads out of the DHT.

pub mod addr;
pub mod config;
pub mod error;
pub mod model;
pub mod peer;

pub use addr::MultiaddrExt;
pub use config::{MonitorConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use model::ModelDescriptor;
pub use multiaddr::{Multiaddr, Protocol};
pub use peer::{PeerId, PeerIdError, peer_id_from_digest};
