//! Model descriptors: which models the monitor watches.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// A model whose blocks are served by peers in the swarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    /// Key prefix under which servers announce blocks (`{prefix}.{block}`).
    /// Derived from the repository name when omitted.
    #[serde(default)]
    pub dht_prefix: Option<String>,
    /// Source repository, either `org/name` or a full URL.
    pub repository: String,
    /// Number of transformer blocks the model is split into.
    pub num_blocks: u32,
    #[serde(default = "default_true")]
    pub official: bool,
    #[serde(default)]
    pub limited: bool,
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    pub fn new(repository: impl Into<String>, num_blocks: u32) -> Self {
        Self {
            dht_prefix: None,
            repository: repository.into(),
            num_blocks,
            official: true,
            limited: false,
        }
    }

    pub fn with_dht_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dht_prefix = Some(prefix.into());
        self
    }

    /// Repository path without scheme or host, e.g. `meta-llama/Llama-3.2-1B-Instruct`.
    pub fn name(&self) -> &str {
        let repo = self.repository.as_str();
        let path = match repo.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => repo,
        };
        path.trim_start_matches('/')
    }

    /// Last segment of [`name`](Self::name).
    pub fn short_name(&self) -> &str {
        let name = self.name();
        name.rsplit('/').next().unwrap_or(name)
    }

    /// The effective DHT prefix.
    ///
    /// Dots are not allowed in prefixes because they separate the block index.
    pub fn prefix(&self) -> String {
        match &self.dht_prefix {
            Some(prefix) => prefix.clone(),
            None => self.name().replace('.', "-"),
        }
    }

    /// DHT key announcing servers of one block.
    pub fn block_key(&self, block: u32) -> String {
        format!("{}.{}", self.prefix(), block)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |reason: &str| ConfigError::Model {
            model: self.repository.clone(),
            reason: reason.to_string(),
        };
        if self.name().is_empty() {
            return Err(fail("repository name is empty"));
        }
        if self.num_blocks == 0 {
            return Err(fail("num_blocks must be greater than zero"));
        }
        let prefix = self.prefix();
        if prefix.is_empty() {
            return Err(fail("dht_prefix is empty"));
        }
        if prefix.contains('.') {
            return Err(fail("dht_prefix must not contain '.'"));
        }
        Ok(())
    }
}
