use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::TARGET_LINKING;

/// A (source, target) suggestion an editor turned down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedSuggestion {
    pub source_id: String,
    pub target_id: String,
    /// Milliseconds since the Unix epoch
    pub rejected_at: i64,
    pub rejected_by: String,
}

/// Rejection memory consulted by the suggestion engine.
pub trait RejectionStore {
    fn is_rejected(&self, source_id: &str, target_id: &str) -> bool;

    /// Recording a pair that is already rejected is a no-op.
    fn reject(&mut self, source_id: &str, target_id: &str, rejected_by: &str) -> Result<()>;

    fn rejections(&self) -> &[RejectedSuggestion];
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRejectionStore {
    entries: Vec<RejectedSuggestion>,
    pairs: HashSet<(String, String)>,
}

impl MemoryRejectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<RejectedSuggestion>) -> Self {
        let mut store = MemoryRejectionStore::new();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    fn insert(&mut self, entry: RejectedSuggestion) -> bool {
        let pair = (entry.source_id.clone(), entry.target_id.clone());
        if self.pairs.insert(pair) {
            self.entries.push(entry);
            true
        } else {
            false
        }
    }
}

impl RejectionStore for MemoryRejectionStore {
    fn is_rejected(&self, source_id: &str, target_id: &str) -> bool {
        self.pairs
            .contains(&(source_id.to_string(), target_id.to_string()))
    }

    fn reject(&mut self, source_id: &str, target_id: &str, rejected_by: &str) -> Result<()> {
        self.insert(RejectedSuggestion {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            rejected_at: Utc::now().timestamp_millis(),
            rejected_by: rejected_by.to_string(),
        });
        Ok(())
    }

    fn rejections(&self) -> &[RejectedSuggestion] {
        &self.entries
    }
}

/// Rejection memory persisted as a JSON array of
/// `{sourceId, targetId, rejectedAt, rejectedBy}` records.
#[derive(Debug)]
pub struct JsonRejectionStore {
    path: PathBuf,
    inner: MemoryRejectionStore,
}

impl JsonRejectionStore {
    /// Loads the file at `path`. A missing file starts an empty list; an
    /// unreadable one is logged and also starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read rejections file {}", path.display()))?;
            match serde_json::from_str::<Vec<RejectedSuggestion>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        target: TARGET_LINKING,
                        "Ignoring unparseable rejections file {}: {}", path.display(), e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        debug!(
            target: TARGET_LINKING,
            "Loaded {} rejected suggestion(s) from {}", entries.len(), path.display()
        );

        Ok(JsonRejectionStore {
            path,
            inner: MemoryRejectionStore::from_entries(entries),
        })
    }

    fn persist(&self, entries: &[RejectedSuggestion]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write rejections file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace rejections file {}", self.path.display()))?;
        Ok(())
    }
}

impl RejectionStore for JsonRejectionStore {
    fn is_rejected(&self, source_id: &str, target_id: &str) -> bool {
        self.inner.is_rejected(source_id, target_id)
    }

    fn reject(&mut self, source_id: &str, target_id: &str, rejected_by: &str) -> Result<()> {
        if self.inner.is_rejected(source_id, target_id) {
            return Ok(());
        }
        // Memory only changes once the file holds the new entry
        let mut updated = self.inner.clone();
        updated.reject(source_id, target_id, rejected_by)?;
        self.persist(updated.rejections())?;
        self.inner = updated;
        info!(
            target: TARGET_LINKING,
            "Rejected suggestion {} → {} by {}", source_id, target_id, rejected_by
        );
        Ok(())
    }

    fn rejections(&self) -> &[RejectedSuggestion] {
        self.inner.rejections()
    }
}
