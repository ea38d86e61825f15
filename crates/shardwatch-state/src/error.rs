//! Error taxonomy shared by the discovery, probing and publishing stages.

use thiserror::Error;

/// Result type alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors raised while building or publishing a snapshot.
///
/// `Transport` and `Timeout` are recoverable: the next cycle retries.
/// `Decode` covers a reply that could not be read as a whole; single bad
/// records are skipped before they become errors. Configuration errors
/// never reach this type; they stop the daemon before it starts.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("generation {attempted} is not newer than published generation {current}")]
    StaleGeneration { current: u64, attempted: u64 },
}
