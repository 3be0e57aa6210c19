//! Deduplicated, most-recent-first log of submitted shell commands.
//!
//! The whole document is read on every access and rewritten in full on every
//! append. Appends within one process are serialized; separate processes
//! sharing the file are not coordinated and the last writer wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Default cap on the number of remembered commands.
pub const MAX_HISTORY_ENTRIES: usize = 1000;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// On-disk shape of the history file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandHistory {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CommandHistory {
    /// Move `command` to the front, dropping any earlier copy, then evict
    /// from the tail past `max_entries`.
    pub fn push_front(&mut self, command: String, max_entries: usize) {
        self.commands.retain(|c| c != &command);
        self.commands.insert(0, command);
        self.commands.truncate(max_entries);
    }
}

#[derive(Debug)]
pub struct CommandHistoryStore {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl CommandHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, MAX_HISTORY_ENTRIES)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full document. A missing file is an empty history.
    pub async fn load(&self) -> Result<CommandHistory, HistoryError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(CommandHistory::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CommandHistory::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a trimmed, non-empty command and persist the result.
    pub async fn append(&self, command: &str) -> Result<CommandHistory, HistoryError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(HistoryError::EmptyCommand);
        }

        let _guard = self.write_lock.lock().await;
        let mut history = self.load().await?;
        history.push_front(command.to_string(), self.max_entries);
        history.last_updated = Some(Utc::now());
        self.save(&history).await?;

        debug!(path = %self.path.display(), len = history.commands.len(), "history appended");
        Ok(history)
    }

    async fn save(&self, history: &CommandHistory) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(history)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_front_dedups() {
        let mut h = CommandHistory::default();
        h.push_front("ls".into(), 10);
        h.push_front("pwd".into(), 10);
        h.push_front("ls".into(), 10);
        assert_eq!(h.commands, vec!["ls", "pwd"]);
    }

    #[test]
    fn test_push_front_caps() {
        let mut h = CommandHistory::default();
        for i in 0..5 {
            h.push_front(format!("cmd{i}"), 3);
        }
        assert_eq!(h.commands, vec!["cmd4", "cmd3", "cmd2"]);
    }

    #[test]
    fn test_document_shape() {
        let h = CommandHistory::default();
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v, serde_json::json!({"commands": [], "last_updated": null}));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CommandHistoryStore::new(dir.path().join("nope.json"));
        let h = store.load().await.unwrap();
        assert!(h.commands.is_empty());
        assert!(h.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_append_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        let store = CommandHistoryStore::new(dir.path().join("history.json"));
        let err = store.append("   \t").await.unwrap_err();
        assert!(matches!(err, HistoryError::EmptyCommand));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = CommandHistoryStore::new(&path);
        assert!(matches!(store.load().await, Err(HistoryError::Parse(_))));
    }
}
