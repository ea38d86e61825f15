//! shardwatch.toml configuration parser.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ConfigResult};
use crate::model::ModelDescriptor;
use multiaddr::Multiaddr;

use crate::addr::MultiaddrExt;

/// Monitor configuration, fixed for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Bootstrap peers of the swarm; their reachability is reported too.
    #[serde(default)]
    pub initial_peers: Vec<Multiaddr>,
    /// `host:port` of DHT gateway nodes, tried in order.
    #[serde(default)]
    pub dht_gateways: Vec<String>,
    pub models: Vec<ModelDescriptor>,

    #[serde(default = "default_update_period", deserialize_with = "de_duration")]
    pub update_period: Duration,
    /// Age after which a DHT declaration no longer counts as coverage.
    #[serde(default = "default_record_ttl", deserialize_with = "de_duration")]
    pub record_ttl: Duration,
    /// How long a periodic probe result is reused.
    #[serde(default = "default_reachability_ttl", deserialize_with = "de_duration")]
    pub reachability_ttl: Duration,
    #[serde(default = "default_probe_timeout", deserialize_with = "de_duration")]
    pub probe_timeout: Duration,
    /// Require the multistream-select greeting instead of a bare TCP connect.
    #[serde(default = "default_probe_handshake")]
    pub probe_handshake: bool,
    /// Hard limit for `/api/v1/is_reachable`.
    #[serde(default = "default_on_demand_timeout", deserialize_with = "de_duration")]
    pub on_demand_timeout: Duration,
    #[serde(default = "default_dht_timeout", deserialize_with = "de_duration")]
    pub dht_timeout: Duration,
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    #[serde(default = "default_dht_concurrency")]
    pub dht_concurrency: usize,
    /// Extra attempts per DHT key after a transport failure.
    #[serde(default = "default_dht_retries")]
    pub dht_retries: u32,
    #[serde(default = "default_dht_retry_backoff", deserialize_with = "de_duration")]
    pub dht_retry_backoff: Duration,

    #[serde(default = "default_frontend_dist")]
    pub frontend_dist: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

fn default_update_period() -> Duration {
    Duration::from_secs(60)
}
fn default_record_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_reachability_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_probe_handshake() -> bool {
    true
}
fn default_on_demand_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_dht_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_probe_concurrency() -> usize {
    64
}
fn default_dht_concurrency() -> usize {
    16
}
fn default_dht_retries() -> u32 {
    2
}
fn default_dht_retry_backoff() -> Duration {
    Duration::from_millis(500)
}
fn default_frontend_dist() -> PathBuf {
    PathBuf::from("frontend/health-ui/dist")
}
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

impl MonitorConfig {
    /// Config with defaults for everything except the model list.
    pub fn with_models(models: Vec<ModelDescriptor>) -> Self {
        Self {
            initial_peers: Vec::new(),
            dht_gateways: Vec::new(),
            models,
            update_period: default_update_period(),
            record_ttl: default_record_ttl(),
            reachability_ttl: default_reachability_ttl(),
            probe_timeout: default_probe_timeout(),
            probe_handshake: default_probe_handshake(),
            on_demand_timeout: default_on_demand_timeout(),
            dht_timeout: default_dht_timeout(),
            probe_concurrency: default_probe_concurrency(),
            dht_concurrency: default_dht_concurrency(),
            dht_retries: default_dht_retries(),
            dht_retry_backoff: default_dht_retry_backoff(),
            frontend_dist: default_frontend_dist(),
            listen: default_listen(),
        }
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: MonitorConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.models.is_empty() {
            return Err(ConfigError::Setting {
                key: "models",
                reason: "at least one model is required".to_string(),
            });
        }
        let mut prefixes = std::collections::HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !prefixes.insert(model.prefix()) {
                return Err(ConfigError::Model {
                    model: model.repository.clone(),
                    reason: format!("duplicate dht_prefix {:?}", model.prefix()),
                });
            }
        }
        for addr in &self.initial_peers {
            if addr.peer_id().is_none() {
                return Err(ConfigError::InitialPeer {
                    addr: addr.to_string(),
                    reason: "missing /p2p/<peer id> component".to_string(),
                });
            }
        }
        if self.update_period.is_zero() {
            return Err(ConfigError::Setting {
                key: "update_period",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.probe_concurrency == 0 {
            return Err(ConfigError::Setting {
                key: "probe_concurrency",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.dht_concurrency == 0 {
            return Err(ConfigError::Setting {
                key: "dht_concurrency",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h" or a bare number of seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => n.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
initial_peers = ["/ip4/172.16.51.60/tcp/31337/p2p/QmRDEYd5HvKggXbHT8oudvNae4zDLE6bMQRcR8bhKxE4Ex"]
dht_gateways = ["127.0.0.1:8088"]
update_period = "30s"
probe_timeout = "1500ms"
probe_concurrency = 8

[[models]]
dht_prefix = "meta-llama/Llama-3-2-1B-Instruct"
repository = "meta-llama/Llama-3.2-1B-Instruct"
num_blocks = 16
"#;

    #[test]
    fn parse_example() {
        let config = MonitorConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].num_blocks, 16);
        assert_eq!(config.initial_peers.len(), 1);
        assert_eq!(config.update_period, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_millis(1500));
        assert_eq!(config.probe_concurrency, 8);
        // Untouched keys fall back to defaults.
        assert_eq!(config.record_ttl, Duration::from_secs(300));
        assert_eq!(config.dht_retries, 2);
    }

    #[test]
    fn sample_config_parses() {
        let config =
            MonitorConfig::from_toml_str(include_str!("../../../shardwatch.toml")).unwrap();
        assert!(!config.models.is_empty());
        assert!(config.probe_handshake);
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let toml = format!("update_period = 90\n{}", EXAMPLE.replace("update_period = \"30s\"\n", ""));
        let config = MonitorConfig::from_toml_str(&toml).unwrap();
        assert_eq!(config.update_period, Duration::from_secs(90));
    }

    #[test]
    fn rejects_empty_model_list() {
        let err = MonitorConfig::from_toml_str("models = []").unwrap_err();
        assert!(matches!(err, ConfigError::Setting { key: "models", .. }));
    }

    #[test]
    fn rejects_bad_initial_peer() {
        let toml = EXAMPLE.replace("/ip4/172.16.51.60", "ip4/172.16.51.60");
        let err = MonitorConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_initial_peer_without_peer_id() {
        let toml = EXAMPLE.replace(
            "/p2p/QmRDEYd5HvKggXbHT8oudvNae4zDLE6bMQRcR8bhKxE4Ex",
            "",
        );
        let err = MonitorConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::InitialPeer { .. }));
    }

    #[test]
    fn rejects_duplicate_prefixes() {
        let toml = format!(
            "{EXAMPLE}\n[[models]]\ndht_prefix = \"meta-llama/Llama-3-2-1B-Instruct\"\nrepository = \"x/y\"\nnum_blocks = 2\n"
        );
        let err = MonitorConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Model { .. }));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let toml = EXAMPLE.replace("probe_concurrency = 8", "probe_concurrency = 0");
        let err = MonitorConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Setting {
                key: "probe_concurrency",
                ..
            }
        ));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shardwatch.toml");
        std::fs::write(&path, EXAMPLE).unwrap();
        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.models[0].short_name(), "Llama-3.2-1B-Instruct");
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let err = MonitorConfig::from_file(Path::new("/nonexistent/shardwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = parse_duration(&format!("{}h", u64::MAX / 60)).unwrap_err();
        assert!(matches!(err, ConfigError::Duration(_)));
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }
}
