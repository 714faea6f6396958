//! Engine configuration from YAML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

/// Message queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Snapshot file; `None` disables persistence
    #[serde(default)]
    pub persistence_file: Option<PathBuf>,

    /// Bound on the processed-message history
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Seconds between idle snapshots
    #[serde(default = "default_persistence_interval")]
    pub persistence_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            persistence_file: None,
            max_messages: default_max_messages(),
            persistence_interval_secs: default_persistence_interval(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between schedule-table scans
    #[serde(default = "default_tick")]
    pub tick_secs: u64,

    /// JSON file of schedules to load on start and for CLI edits
    #[serde(default)]
    pub schedules_file: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            schedules_file: None,
        }
    }
}

/// Webhook server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared bearer token; falls back to the WEBHOOK_TOKEN env var
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: None,
        }
    }
}

fn default_max_messages() -> usize {
    1000
}

fn default_persistence_interval() -> u64 {
    60
}

fn default_tick() -> u64 {
    1
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse engine config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    /// The snapshot path to use: configured, or the default location under
    /// the local data directory.
    pub fn snapshot_path(&self) -> PathBuf {
        self.queue.persistence_file.clone().unwrap_or_else(|| {
            let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
            data_dir.join("conveyor").join("queue.json")
        })
    }

    /// The effective webhook token: config value, else WEBHOOK_TOKEN
    pub fn webhook_token(&self) -> Option<String> {
        self.server
            .token
            .clone()
            .or_else(|| std::env::var("WEBHOOK_TOKEN").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.queue.max_messages, 1000);
        assert_eq!(config.queue.persistence_interval_secs, 60);
        assert_eq!(config.scheduler.tick_secs, 1);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
queue:
  persistence_file: /tmp/queue.json
server:
  port: 9090
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.queue.persistence_file,
            Some(PathBuf::from("/tmp/queue.json"))
        );
        assert_eq!(config.queue.max_messages, 1000);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(EngineConfig::from_yaml("queue: [not, a, map]").is_err());
    }
}
