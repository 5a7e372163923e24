use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: Option<String>,
    /// Number of independent poll/execute loops
    pub concurrency: usize,
    /// Upper bound of a single broker poll
    pub poll_timeout_ms: u64,
    /// Pause after a failed broker poll
    pub poll_error_pause_ms: u64,
    /// Task names to serve; empty serves every registered name
    pub queues: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: None,
            concurrency: 4,
            poll_timeout_ms: 1000,
            poll_error_pause_ms: 1000,
            queues: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_error_pause(&self) -> Duration {
        Duration::from_millis(self.poll_error_pause_ms)
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert!(config.queues.is_empty());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency: 8\nqueues: [double, inc]").unwrap();

        let config = WorkerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.queues, vec!["double".to_string(), "inc".to_string()]);
        assert_eq!(config.poll_error_pause_ms, 1000);
    }

    #[test]
    fn test_worker_id() {
        let mut config = WorkerConfig::default();
        let generated = config.generate_worker_id();
        assert!(generated.contains(&std::process::id().to_string()));

        config.worker_id = Some("worker-1".to_string());
        assert_eq!(config.generate_worker_id(), "worker-1");
    }
}
