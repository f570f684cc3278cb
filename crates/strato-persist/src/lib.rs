//! JSON file-backed state persistence for Strato stores.
//!
//! Provides [`StateFile`], a typed document store that keeps one serializable
//! value per domain file and snapshots it to disk on every write. The share
//! table and the per-server settings table persist through this.

#![forbid(unsafe_code)]

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One JSON document on disk, identified by a domain name under a state dir.
///
/// Writes go through a sibling temp file and a rename, so an interrupted
/// write leaves the previous snapshot intact rather than a truncated file.
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(state_dir: &Path, domain: &str) -> Self {
        let path = state_dir.join(format!("{domain}.json"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, falling back to `T::default()` when the file is
    /// missing or unreadable as JSON.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt state file, starting fresh");
                T::default()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no state file, starting fresh");
                T::default()
            }
        }
    }

    /// Snapshot the document to disk, creating parent directories as needed.
    pub fn save<T: Serialize>(&self, value: &T) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_state_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = StateFile::new(dir.path(), "shares");

        let mut data: HashMap<String, u64> = HashMap::new();
        data.insert("a".to_string(), 1);
        data.insert("b".to_string(), 2);
        file.save(&data).expect("save");

        let loaded: HashMap<String, u64> = file.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("a"), Some(&1));
    }

    #[test]
    fn test_state_file_missing_loads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = StateFile::new(dir.path(), "nonexistent");
        let loaded: HashMap<String, String> = file.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_state_file_corrupt_loads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("corrupt.json"), "not json").expect("write");

        let file = StateFile::new(dir.path(), "corrupt");
        let loaded: HashMap<String, String> = file.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_state_file_creates_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let deep = dir.path().join("a").join("b");
        let file = StateFile::new(&deep, "deep");

        file.save(&vec![1u32, 2, 3]).expect("save with nested dirs");
        let loaded: Vec<u32> = file.load();
        assert_eq!(loaded, vec![1, 2, 3]);
    }

    #[test]
    fn test_state_file_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = StateFile::new(dir.path(), "counter");

        file.save(&1u64).expect("save1");
        file.save(&2u64).expect("save2");

        let loaded: u64 = file.load();
        assert_eq!(loaded, 2);
    }

    #[test]
    fn test_state_file_leaves_no_temp_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = StateFile::new(dir.path(), "clean");
        file.save(&42u8).expect("save");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().into_string().expect("utf8"))
            .collect();
        assert_eq!(names, vec!["clean.json".to_string()]);
    }
}
