// ── Offline cache ──
//
// Everything a sign needs to keep working without its hub: the templates
// and schedule pushed in the last `cache_sync`, the data-feed bindings
// that came with them, the last server message, and reports of local
// emergency commands waiting to be sent. Persisted as one JSON file,
// replaced atomically on every save.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cityarray_proto::wire::{CachePayload, MessagePayload, SchedulePayload, TemplatePayload};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// A local emergency command the hub has not been told about yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReport {
    pub content: String,
    pub occurred_at: DateTime<Utc>,
}

/// On-disk cache contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheContents {
    #[serde(default)]
    pub templates: BTreeMap<String, TemplatePayload>,
    #[serde(default)]
    pub schedule: Vec<SchedulePayload>,
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePayload>,
    #[serde(default)]
    pub pending_reports: Vec<PendingReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

pub struct LocalCache {
    path: PathBuf,
    contents: CacheContents,
}

impl LocalCache {
    /// Load the cache at `path`. A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(text) => {
                serde_json::from_str(&text).map_err(|source| AgentError::CacheCorrupt {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => CacheContents::default(),
            Err(source) => return Err(AgentError::CacheIo { path, source }),
        };
        Ok(Self { path, contents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &CacheContents {
        &self.contents
    }

    /// Write the cache through a sibling temp file so a crash mid-write
    /// leaves the previous version intact.
    pub fn save(&self) -> Result<(), AgentError> {
        let io_err = |source| AgentError::CacheIo {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(&self.contents).map_err(|source| {
            AgentError::CacheCorrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Replace templates, schedule and bindings with a fresh sync.
    pub fn apply_sync(&mut self, payload: CachePayload, now: DateTime<Utc>) {
        self.contents.templates = payload
            .templates
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        self.contents.schedule = payload.schedule;
        self.contents.bindings = payload.bindings;
        self.contents.synced_at = Some(now);
    }

    pub fn remember(&mut self, message: MessagePayload) {
        self.contents.last_message = Some(message);
    }

    /// Drop the remembered hub message if it is `message_id`. Returns
    /// whether anything was dropped.
    pub fn forget(&mut self, message_id: &str) -> bool {
        if self
            .contents
            .last_message
            .as_ref()
            .is_some_and(|m| m.id == message_id)
        {
            self.contents.last_message = None;
            true
        } else {
            false
        }
    }

    pub fn queue_report(&mut self, content: String, occurred_at: DateTime<Utc>) {
        self.contents.pending_reports.push(PendingReport {
            content,
            occurred_at,
        });
    }

    pub fn pending_reports(&self) -> &[PendingReport] {
        &self.contents.pending_reports
    }

    /// Forget the oldest `count` reports once the hub has them.
    pub fn drop_reports(&mut self, count: usize) {
        let count = count.min(self.contents.pending_reports.len());
        self.contents.pending_reports.drain(..count);
    }
}
