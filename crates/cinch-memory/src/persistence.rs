//! Best-effort hand-off of generated summaries to mid-term memory.
//!
//! When tier compaction produces a summary and a session is configured, the
//! [`MemoryManager`](crate::MemoryManager) forwards the digest once through a
//! [`PersistenceBridge`]. Failures are logged and dropped: losing a mid-term
//! entry never affects the compacted history returned for the current
//! request.
//!
//! The engine calls the store on the caller's thread. Stores backed by slow
//! I/O should hand the write off (e.g. to a channel) and return immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Port to an external session memory store.
pub trait MidTermStore: Send + Sync {
    /// Append one entry to a session's mid-term memory.
    fn add_mid_term_entry(&self, session_id: &str, text: &str) -> Result<(), String>;
}

/// Binds a store to the session whose summaries it receives.
#[derive(Clone)]
pub struct PersistenceBridge {
    store: Arc<dyn MidTermStore>,
    session_id: String,
}

impl std::fmt::Debug for PersistenceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceBridge")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl PersistenceBridge {
    pub fn new(store: Arc<dyn MidTermStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Forward `summary` to the store. Never fails; errors are logged.
    pub fn persist(&self, summary: &str) {
        if self.session_id.is_empty() {
            return;
        }
        match self.store.add_mid_term_entry(&self.session_id, summary) {
            Ok(()) => debug!(
                "persisted {}-char summary for session {}",
                summary.len(),
                self.session_id
            ),
            Err(e) => warn!(
                "failed to persist summary for session {}: {e}",
                self.session_id
            ),
        }
    }
}

// ── In-memory store ────────────────────────────────────────────────

/// Process-local store, one entry list per session.
#[derive(Debug, Default)]
pub struct InMemoryMidTermStore {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryMidTermStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded for `session_id`, oldest first.
    pub fn entries(&self, session_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .map(|map| map.get(session_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl MidTermStore for InMemoryMidTermStore {
    fn add_mid_term_entry(&self, session_id: &str, text: &str) -> Result<(), String> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| format!("mid-term store lock poisoned: {e}"))?;
        map.entry(session_id.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}

// ── File store ─────────────────────────────────────────────────────

/// One persisted summary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MidTermEntry {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// On-disk shape of a session's mid-term memory.
#[derive(Serialize, Deserialize, Debug, Default)]
struct MidTermLog {
    session_id: String,
    medium_term: Vec<MidTermEntry>,
}

/// Store with one JSON file per session.
///
/// Directory layout:
/// ```text
/// root/
///   th-abc123.json
///   th-def456.json
/// ```
///
/// Writes are atomic (temp file + rename) and serialized within a process.
#[derive(Debug)]
pub struct FileMidTermStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMidTermStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, String> {
        let valid = !session_id.is_empty()
            && !session_id.starts_with('.')
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(format!("invalid session id {session_id:?}"));
        }
        Ok(self.root.join(format!("{session_id}.json")))
    }

    /// Entries recorded for `session_id`, oldest first. Empty if none.
    pub fn entries(&self, session_id: &str) -> Result<Vec<MidTermEntry>, String> {
        Ok(self.load(session_id)?.medium_term)
    }

    fn load(&self, session_id: &str) -> Result<MidTermLog, String> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Ok(MidTermLog {
                session_id: session_id.to_string(),
                medium_term: Vec::new(),
            });
        }
        let json = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read mid-term memory: {e}"))?;
        serde_json::from_str(&json).map_err(|e| format!("Failed to parse mid-term memory: {e}"))
    }

    fn save(&self, log: &MidTermLog) -> Result<(), String> {
        let final_path = self.session_path(&log.session_id)?;
        let tmp_path = self.root.join(format!(".{}.json.tmp", log.session_id));

        let json = serde_json::to_string_pretty(log)
            .map_err(|e| format!("Failed to serialize mid-term memory: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("Failed to write temp mid-term memory: {e}"))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| format!("Failed to rename mid-term memory: {e}"))?;
        Ok(())
    }
}

impl MidTermStore for FileMidTermStore {
    fn add_mid_term_entry(&self, session_id: &str, text: &str) -> Result<(), String> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| format!("mid-term store lock poisoned: {e}"))?;
        let mut log = self.load(session_id)?;
        log.medium_term.push(MidTermEntry {
            text: text.to_string(),
            created_at: Utc::now(),
        });
        self.save(&log)
    }
}
