use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings shared by the redis broker and backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,

    /// Prefix of every key; also the cluster hash tag
    pub namespace: String,

    /// Longest blocking pop before due delayed tasks are promoted again
    pub promote_interval_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "asq".to_string(),
            promote_interval_ms: 1000,
        }
    }
}

impl RedisConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RedisConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn promote_interval(&self) -> Duration {
        Duration::from_millis(self.promote_interval_ms.max(1))
    }
}
