//! Persistent console-share table.

use crate::token::{constant_time_eq, hash_token};
use crate::{ConsoleShare, ShareError};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use strato_persist::StateFile;
use tracing::{debug, warn};

/// In-memory share table backed by JSON snapshots. Lookup is always by
/// token hash, never by raw token.
pub struct ShareStore {
    shares: HashMap<String, ConsoleShare>,
    file: StateFile,
}

impl ShareStore {
    pub fn new(state_dir: &Path) -> Self {
        let file = StateFile::new(state_dir, "console_shares");
        let shares: HashMap<String, ConsoleShare> = file.load();
        debug!(count = shares.len(), "loaded console shares from disk");
        Self { shares, file }
    }

    /// Insert a new share. Token hashes are unique across all shares.
    pub fn insert(&mut self, share: ConsoleShare) -> Result<(), ShareError> {
        if self
            .shares
            .values()
            .any(|existing| existing.token_hash == share.token_hash)
        {
            return Err(ShareError::Storage("token hash collision".to_string()));
        }
        if self.shares.contains_key(&share.id) {
            return Err(ShareError::Storage(format!(
                "share '{}' already exists",
                share.id
            )));
        }
        self.shares.insert(share.id.clone(), share);
        self.snapshot();
        Ok(())
    }

    pub fn get(&self, share_id: &str) -> Option<&ConsoleShare> {
        self.shares.get(share_id)
    }

    /// Find a share by raw token: hash it, then compare against stored
    /// hashes in constant time.
    pub fn find_by_raw_token(&self, raw_token: &str) -> Option<ConsoleShare> {
        let hash = hash_token(raw_token);
        self.shares
            .values()
            .find(|share| constant_time_eq(&share.token_hash, &hash))
            .cloned()
    }

    /// Record one redemption: bump the counter and stamp last-use metadata.
    pub fn record_usage(&mut self, share_id: &str, ip: Option<&str>) -> Result<(), ShareError> {
        let share = self
            .shares
            .get_mut(share_id)
            .ok_or_else(|| ShareError::ShareNotFound(share_id.to_string()))?;

        let now = Utc::now();
        share.use_count += 1;
        share.last_used_at = Some(now);
        share.last_used_ip = ip.map(|ip| ip.chars().take(45).collect());
        share.updated_at = now;
        self.snapshot();
        Ok(())
    }

    /// Soft-revoke. Revoking an already-revoked share is a reported failure,
    /// not a silent success.
    pub fn revoke(&mut self, share_id: &str, reason: &str) -> Result<(), ShareError> {
        let share = self
            .shares
            .get_mut(share_id)
            .ok_or_else(|| ShareError::ShareNotFound(share_id.to_string()))?;

        if share.revoked {
            return Err(ShareError::AlreadyRevoked(share_id.to_string()));
        }

        let now = Utc::now();
        share.revoked = true;
        share.revoked_at = Some(now);
        share.revoked_reason = Some(reason.to_string());
        share.updated_at = now;
        self.snapshot();
        Ok(())
    }

    pub fn list_for_service(&self, service_id: u64) -> Vec<&ConsoleShare> {
        let mut shares: Vec<&ConsoleShare> = self
            .shares
            .values()
            .filter(|share| share.service_id == service_id)
            .collect();
        shares.sort_by_key(|share| share.created_at);
        shares
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    fn snapshot(&self) {
        if let Err(e) = self.file.save(&self.shares) {
            warn!(error = %e, "failed to snapshot share store");
        }
    }
}
