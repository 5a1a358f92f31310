use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use folio_types::{Change, Deletion};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{ChangeLedger, LedgerSnapshot};

/// A single string slot that outlives the process.
pub trait StateStore: Send + Sync {
    fn load(&self) -> LedgerResult<Option<String>>;
    fn save(&self, state: &str) -> LedgerResult<()>;
    fn clear(&self) -> LedgerResult<()>;
}

/// Keeps the state in memory. For tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> LedgerResult<Option<String>> {
        Ok(self.slot.lock().expect("lock poisoned").clone())
    }

    fn save(&self, state: &str) -> LedgerResult<()> {
        *self.slot.lock().expect("lock poisoned") = Some(state.to_string());
        Ok(())
    }

    fn clear(&self) -> LedgerResult<()> {
        *self.slot.lock().expect("lock poisoned") = None;
        Ok(())
    }
}

/// Keeps the state in one file, creating parent directories on save.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::State(format!("{}: {e}", path.display()))
}

impl StateStore for FileStateStore {
    fn load(&self) -> LedgerResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    fn save(&self, state: &str) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::write(&self.path, state).map_err(|e| io_error(&self.path, e))
    }

    fn clear(&self) -> LedgerResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }
}

/// Editor session state carried between runs: the repository selection and
/// the pending ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default, rename = "repo")]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub deletions: Vec<Deletion>,
}

impl PersistedState {
    pub fn new(repository: Option<String>, branch: Option<String>, ledger: &ChangeLedger) -> Self {
        let LedgerSnapshot { changes, deletions } = ledger.snapshot();
        Self {
            repository,
            branch,
            changes,
            deletions,
        }
    }

    /// Load from `store`. A missing, unreadable or malformed state yields
    /// the empty state.
    pub fn load(store: &dyn StateStore) -> Self {
        let text = match store.load() {
            Ok(Some(text)) => text,
            Ok(None) => return Self::default(),
            Err(e) => {
                warn!(error = %e, "cannot read persisted state, starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "discarding malformed persisted state");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &dyn StateStore) -> LedgerResult<()> {
        let text = serde_json::to_string(self).map_err(|e| LedgerError::State(e.to_string()))?;
        store.save(&text)?;
        debug!(changes = self.changes.len(), deletions = self.deletions.len(), "state saved");
        Ok(())
    }

    /// Rebuild the ledger. Entries that fail validation invalidate the whole
    /// persisted ledger, which then degrades to empty.
    pub fn ledger(&self) -> ChangeLedger {
        let snapshot = LedgerSnapshot {
            changes: self.changes.clone(),
            deletions: self.deletions.clone(),
        };
        ChangeLedger::from_snapshot(snapshot).unwrap_or_else(|e| {
            warn!(error = %e, "discarding invalid persisted ledger");
            ChangeLedger::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_types::{ChangeKey, ObjectId};

    fn ledger() -> ChangeLedger {
        let mut ledger = ChangeLedger::new();
        let id = ObjectId::new_temp();
        ledger
            .record_change(Change::new(ChangeKey::field(id, "title"), "post", "Hi".into()))
            .unwrap();
        ledger.record_deletion(Deletion::object(ObjectId::digest(b"x"))).unwrap();
        ledger
    }

    #[test]
    fn save_then_load() {
        let store = MemoryStateStore::new();
        let state = PersistedState::new(Some("acme/site".into()), Some("main".into()), &ledger());
        state.save(&store).unwrap();
        let loaded = PersistedState::load(&store);
        assert_eq!(loaded, state);
        let rebuilt = loaded.ledger().snapshot();
        assert_eq!(rebuilt.changes, state.changes);
        assert_eq!(rebuilt.deletions, state.deletions);
    }

    #[test]
    fn wire_names_match_editor_layout() {
        let state = PersistedState::new(Some("acme/site".into()), None, &ChangeLedger::new());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["repo"], "acme/site");
        assert!(json["changes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn missing_or_malformed_state_degrades_to_empty() {
        let store = MemoryStateStore::new();
        assert_eq!(PersistedState::load(&store), PersistedState::default());
        store.save("{not json").unwrap();
        assert_eq!(PersistedState::load(&store), PersistedState::default());
        store.save(r#"{"changes":[{"changeKey":"bogus"}]}"#).unwrap();
        assert_eq!(PersistedState::load(&store), PersistedState::default());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join(".folio/state.json"));
        assert_eq!(store.load().unwrap(), None);
        let state = PersistedState::new(None, Some("main".into()), &ledger());
        state.save(&store).unwrap();
        assert_eq!(PersistedState::load(&store), state);
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
