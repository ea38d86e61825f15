//! DHT adapter errors.

use thiserror::Error;

use shardwatch_state::MonitorError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DhtError {
    #[error("dht query timed out: {0}")]
    Timeout(String),

    #[error("dht transport error: {0}")]
    Transport(String),

    /// The queried object does not exist (e.g. an unknown peer).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed dht reply: {0}")]
    Decode(String),
}

impl DhtError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DhtError::Timeout(_) | DhtError::Transport(_))
    }
}

impl From<DhtError> for MonitorError {
    fn from(e: DhtError) -> Self {
        match e {
            DhtError::Timeout(msg) => MonitorError::Timeout(msg),
            DhtError::Transport(msg) | DhtError::NotFound(msg) => MonitorError::Transport(msg),
            DhtError::Decode(msg) => MonitorError::Decode(msg),
        }
    }
}
