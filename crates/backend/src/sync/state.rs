//! Resumable sync state, persisted with write-new-then-swap semantics.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Per-generation resume point. The continuation token marks a file that must
/// be reprocessed; `last_processed_file_id` marks the last one fully done.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_processed_file_id: Option<String>,
    pub continuation_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    generations: HashMap<String, SyncState>,
}

/// File-backed store keyed by generation date. Updates replace the whole file
/// atomically (write to a sibling, then rename over).
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> StateFile {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => StateFile::default(),
        }
    }

    fn write_all(&self, state: &StateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("tmp");
        let payload = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, payload)
            .with_context(|| format!("writing state file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("swapping state file {}", self.path.display()))?;
        Ok(())
    }

    pub fn load(&self, generation_date: &str) -> SyncState {
        self.read_all()
            .generations
            .get(generation_date)
            .cloned()
            .unwrap_or_default()
    }

    pub fn save(&self, generation_date: &str, mut state: SyncState) -> Result<()> {
        state.updated_at = Some(Utc::now());
        let mut file = self.read_all();
        file.generations.insert(generation_date.to_string(), state);
        self.write_all(&file)
    }

    /// Remove a generation's entry; the file disappears with its last entry.
    pub fn clear(&self, generation_date: &str) -> Result<()> {
        let mut file = self.read_all();
        if file.generations.remove(generation_date).is_none() {
            return Ok(());
        }
        if file.generations.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)
                    .with_context(|| format!("removing state file {}", self.path.display()))?;
            }
            return Ok(());
        }
        self.write_all(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SyncStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStateStore::new(dir.path().join("state/sync_state.json"));
        (dir, store)
    }

    #[test]
    fn load_returns_default_for_unknown_generations() {
        let (_dir, store) = store();
        assert_eq!(store.load("20250110"), SyncState::default());
    }

    #[test]
    fn save_and_load_round_trip_per_generation() {
        let (_dir, store) = store();
        store
            .save(
                "20250110",
                SyncState {
                    last_processed_file_id: Some("file-1".to_string()),
                    continuation_token: None,
                    updated_at: None,
                },
            )
            .unwrap();
        store
            .save(
                "20250117",
                SyncState {
                    last_processed_file_id: None,
                    continuation_token: Some("file-9".to_string()),
                    updated_at: None,
                },
            )
            .unwrap();

        let first = store.load("20250110");
        assert_eq!(first.last_processed_file_id.as_deref(), Some("file-1"));
        assert!(first.updated_at.is_some());

        let second = store.load("20250117");
        assert_eq!(second.continuation_token.as_deref(), Some("file-9"));
    }

    #[test]
    fn clear_removes_only_the_given_generation() {
        let (_dir, store) = store();
        store.save("20250110", SyncState::default()).unwrap();
        store.save("20250117", SyncState::default()).unwrap();

        store.clear("20250110").unwrap();
        assert_eq!(store.load("20250110"), SyncState::default());
        assert!(store.load("20250117").updated_at.is_some());
    }

    #[test]
    fn clearing_the_last_generation_deletes_the_file() {
        let (dir, store) = store();
        store.save("20250110", SyncState::default()).unwrap();
        store.clear("20250110").unwrap();
        assert!(!dir.path().join("state/sync_state.json").exists());
    }
}
