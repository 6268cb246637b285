//! Durable checkpoint storage for resume capability.
//!
//! Checkpoints are the only state that survives a process restart. Each key
//! names a migration pair, a resource kind, and the parent resource whose
//! items are being paged; the value is the ID of the last successfully
//! processed item. On resume, the executor fast-forwards each namespace
//! independently from its stored cursor. The whole namespace for a pair is
//! cleared only after a fully successful run.

use crate::error::{MigrateError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Composite checkpoint key:
/// `{source_project}:{dest_project}:{resource_kind}:{parent_resource_id}`.
pub fn checkpoint_key(
    source_project: &str,
    dest_project: &str,
    kind: &str,
    parent_id: &str,
) -> String {
    format!("{}:{}:{}:{}", source_project, dest_project, kind, parent_id)
}

/// Prefix covering every checkpoint of a migration pair.
pub fn pair_prefix(source_project: &str, dest_project: &str) -> String {
    format!("{}:{}:", source_project, dest_project)
}

/// Durable key-value persistence for resumable cursors.
///
/// Injected into the executor so tests can back it with memory and the CLI
/// with a file; the executor's logic is identical either way.
pub trait CheckpointStore: Send + Sync {
    /// Persist the cursor for a key, overwriting any previous value.
    fn save(&self, key: &str, cursor: &str) -> Result<()>;

    /// Last saved cursor for a key, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove every checkpoint whose key starts with `prefix`.
    fn clear_prefix(&self, prefix: &str) -> Result<()>;

    /// Whether any checkpoint exists under `prefix`. Presence of any
    /// checkpoint for a migration pair marks that pair as resumable.
    fn any_with_prefix(&self, prefix: &str) -> Result<bool>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, key: &str, cursor: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), cursor.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn any_with_prefix(&self, prefix: &str) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .any(|k| k.starts_with(prefix)))
    }
}

/// File-backed store: a single JSON object map, written atomically
/// (temp file + rename) on every save so a crash never leaves a torn file.
pub struct FileCheckpointStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileCheckpointStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| MigrateError::Checkpoint(format!("corrupt checkpoint file: {}", e)))?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, key: &str, cursor: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), cursor.to_string());
        self.flush(&entries)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|k, _| !k.starts_with(prefix));
        self.flush(&entries)
    }

    fn any_with_prefix(&self, prefix: &str) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .any(|k| k.starts_with(prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        let key = checkpoint_key("src", "dst", "document", "db1/posts");

        assert_eq!(store.get(&key).unwrap(), None);
        store.save(&key, "doc42").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some("doc42".to_string()));

        store.save(&key, "doc43").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some("doc43".to_string()));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");

        let key = checkpoint_key("src", "dst", "file", "photos");
        {
            let store = FileCheckpointStore::open(&path).unwrap();
            store.save(&key, "img-7").unwrap();
        }

        let reopened = FileCheckpointStore::open(&path).unwrap();
        assert_eq!(reopened.get(&key).unwrap(), Some("img-7".to_string()));
    }

    #[test]
    fn test_clear_prefix_scopes_to_pair() {
        let store = MemoryCheckpointStore::new();
        store
            .save(&checkpoint_key("a", "b", "document", "db1/posts"), "d1")
            .unwrap();
        store
            .save(&checkpoint_key("a", "b", "file", "photos"), "f1")
            .unwrap();
        store
            .save(&checkpoint_key("a", "c", "document", "db1/posts"), "d9")
            .unwrap();

        store.clear_prefix(&pair_prefix("a", "b")).unwrap();

        assert!(!store.any_with_prefix(&pair_prefix("a", "b")).unwrap());
        assert!(store.any_with_prefix(&pair_prefix("a", "c")).unwrap());
    }

    #[test]
    fn test_file_store_atomic_write_leaves_valid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");

        let store = FileCheckpointStore::open(&path).unwrap();
        store.save("k1", "v1").unwrap();
        store.save("k2", "v2").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: HashMap<String, String> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(FileCheckpointStore::open(&path).is_err());
    }
}
