//! Durable record of the last completed sync.
//!
//! A single JSON scalar record at a configured path. Writes go through a
//! temp file and an atomic rename so a crash mid-write leaves either the old
//! record or none; unreadable or partially-written files are treated as "no
//! prior sync".

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCacheRecord {
    /// ISO-8601 start time of the last completed run.
    pub last_sync_time: String,
    pub file_count: u64,
}

/// Load the record, tolerating absence and corruption.
pub fn load(path: &Path) -> Option<SyncCacheRecord> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "sync cache unreadable, treating as absent");
            None
        }
    }
}

/// Write the record atomically (tmp + rename), creating parent directories.
pub fn store(path: &Path, record: &SyncCacheRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(record)?;
    std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}
