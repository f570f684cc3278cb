//! Per-server key/value settings store.
//!
//! Holds the catalog selections an operator curates for resale — chosen
//! images, flavors, disk tiers, display names, pricing overrides — as plain
//! JSON blobs scoped by server ID. Upsert semantics: one value per
//! `(server_id, key)` pair.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use strato_persist::StateFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRecord {
    pub value: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory settings table backed by JSON snapshots.
pub struct SettingsStore {
    entries: HashMap<String, SettingRecord>,
    file: StateFile,
}

fn entry_key(server_id: u64, key: &str) -> String {
    format!("{server_id}/{key}")
}

impl SettingsStore {
    pub fn new(state_dir: &Path) -> Self {
        let file = StateFile::new(state_dir, "server_settings");
        let entries: HashMap<String, SettingRecord> = file.load();
        debug!(count = entries.len(), "loaded server settings from disk");
        Self { entries, file }
    }

    /// Insert or replace the value for `(server_id, key)`.
    pub fn set(&mut self, server_id: u64, key: &str, value: Value) {
        let now = chrono::Utc::now();
        self.entries
            .entry(entry_key(server_id, key))
            .and_modify(|record| {
                record.value = value.clone();
                record.updated_at = now;
            })
            .or_insert(SettingRecord {
                value,
                created_at: now,
                updated_at: now,
            });
        self.snapshot();
    }

    pub fn get(&self, server_id: u64, key: &str) -> Option<&Value> {
        self.entries
            .get(&entry_key(server_id, key))
            .map(|record| &record.value)
    }

    pub fn delete(&mut self, server_id: u64, key: &str) -> bool {
        let removed = self.entries.remove(&entry_key(server_id, key)).is_some();
        if removed {
            self.snapshot();
        }
        removed
    }

    /// All keys (with records) for one server, sorted by key.
    pub fn list(&self, server_id: u64) -> Vec<(String, &SettingRecord)> {
        let prefix = format!("{server_id}/");
        let mut entries: Vec<(String, &SettingRecord)> = self
            .entries
            .iter()
            .filter_map(|(key, record)| {
                key.strip_prefix(&prefix)
                    .map(|bare| (bare.to_string(), record))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn snapshot(&self) {
        if let Err(e) = self.file.save(&self.entries) {
            warn!(error = %e, "failed to snapshot settings store");
        }
    }
}
