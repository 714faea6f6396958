//! Queue snapshot persistence
//!
//! Snapshots are a single JSON object `{queue, processed, stats, timestamp}`
//! written to a temporary file and atomically renamed over the target, so a
//! crash mid-write never leaves a half-written file under the real name.

use crate::core::Message;
use crate::queue::QueueStats;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// On-disk snapshot of a queue's full state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Pending messages, in queue iteration order
    pub queue: Vec<Message>,

    /// Terminal messages (processed history)
    pub processed: Vec<Message>,

    pub stats: QueueStats,

    pub timestamp: DateTime<Utc>,
}

/// Write a snapshot via temp-file + atomic rename
pub fn write_snapshot(path: &Path, snapshot: &QueueSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_vec(snapshot).context("Failed to serialize queue snapshot")?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "queue.json".to_string());
    let temp_path = path.with_file_name(format!("{}.tmp", file_name));

    std::fs::write(&temp_path, &json)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    debug!(
        "persisted {} queued and {} processed messages",
        snapshot.queue.len(),
        snapshot.processed.len()
    );
    Ok(())
}

/// Read a snapshot back from disk
pub fn read_snapshot(path: &Path) -> Result<QueueSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse queue snapshot")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_snapshot_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join("conveyor-persistence-tests")
            .join(name)
    }

    #[test]
    fn test_snapshot_round_trip() {
        let path = temp_snapshot_path("round_trip.json");

        let snapshot = QueueSnapshot {
            queue: vec![Message::new("process_email", HashMap::new())],
            processed: vec![],
            stats: QueueStats::new(),
            timestamp: Utc::now(),
        };

        write_snapshot(&path, &snapshot).unwrap();
        let loaded = read_snapshot(&path).unwrap();

        assert_eq!(loaded.queue.len(), 1);
        assert_eq!(loaded.queue[0].id, snapshot.queue[0].id);
        assert_eq!(loaded.queue[0].kind, "process_email");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let path = temp_snapshot_path("clean.json");

        let snapshot = QueueSnapshot {
            queue: vec![],
            processed: vec![],
            stats: QueueStats::new(),
            timestamp: Utc::now(),
        };
        write_snapshot(&path, &snapshot).unwrap();

        assert!(path.exists());
        assert!(!path.with_file_name("clean.json.tmp").exists());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_missing_file_is_an_error() {
        assert!(read_snapshot(Path::new("/nonexistent/queue.json")).is_err());
    }
}
