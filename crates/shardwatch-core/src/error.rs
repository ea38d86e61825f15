//! Startup configuration errors.

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that make the monitor refuse to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("invalid model descriptor {model:?}: {reason}")]
    Model { model: String, reason: String },

    #[error("invalid initial peer {addr:?}: {reason}")]
    InitialPeer { addr: String, reason: String },

    #[error("invalid setting {key}: {reason}")]
    Setting { key: &'static str, reason: String },
}
