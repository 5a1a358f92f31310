use std::collections::{BTreeMap, HashMap};

use folio_store::ObjectStore;
use folio_types::{Change, ChangeKey, Deletion, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConsistencyError, LedgerError, LedgerResult};
use crate::overlay::{materialize, MaterializedObjects};

/// The pending edits of a ledger at one point in time. This is what a sync
/// ships to the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub changes: Vec<Change>,
    pub deletions: Vec<Deletion>,
}

impl LedgerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletions.is_empty()
    }
}

/// Pending field edits and deletions.
///
/// Changes are kept in insertion order and deduplicated by key: recording a
/// change whose key is already present overwrites it in place. Deletions are
/// kept as recorded.
///
/// While frozen (a sync is replaying the ledger) every mutation fails with
/// [`LedgerError::SyncInProgress`].
#[derive(Clone, Debug, Default)]
pub struct ChangeLedger {
    changes: Vec<Change>,
    positions: HashMap<ChangeKey, usize>,
    deletions: Vec<Deletion>,
    frozen: bool,
    version: u64,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from a snapshot, replaying each change so duplicate
    /// keys collapse as they would have when recorded.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> LedgerResult<Self> {
        let mut ledger = Self::new();
        for change in snapshot.changes {
            ledger.record_change(change)?;
        }
        for deletion in snapshot.deletions {
            ledger.record_deletion(deletion)?;
        }
        Ok(ledger)
    }

    fn ensure_writable(&self) -> LedgerResult<()> {
        if self.frozen {
            return Err(LedgerError::SyncInProgress);
        }
        Ok(())
    }

    pub fn record_change(&mut self, change: Change) -> LedgerResult<()> {
        self.ensure_writable()?;
        change.validate()?;
        match self.positions.get(&change.change_key) {
            Some(&pos) => self.changes[pos] = change,
            None => {
                self.positions
                    .insert(change.change_key.clone(), self.changes.len());
                self.changes.push(change);
            }
        }
        self.version += 1;
        Ok(())
    }

    pub fn record_deletion(&mut self, deletion: Deletion) -> LedgerResult<()> {
        self.ensure_writable()?;
        deletion.validate()?;
        self.deletions.push(deletion);
        self.version += 1;
        Ok(())
    }

    /// Drop every pending change and deletion.
    pub fn reset(&mut self) -> LedgerResult<()> {
        self.ensure_writable()?;
        self.clear();
        Ok(())
    }

    fn clear(&mut self) {
        self.changes.clear();
        self.positions.clear();
        self.deletions.clear();
        self.version += 1;
    }

    pub fn has_pending(&self) -> bool {
        !self.changes.is_empty() || !self.deletions.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn deletions(&self) -> &[Deletion] {
        &self.deletions
    }

    pub fn get(&self, key: &ChangeKey) -> Option<&Change> {
        self.positions.get(key).map(|&pos| &self.changes[pos])
    }

    /// Pending changes to one object, in recording order.
    pub fn changed_fields<'a>(&'a self, id: &'a ObjectId) -> impl Iterator<Item = &'a Change> + 'a {
        self.changes.iter().filter(move |c| c.object_id() == *id)
    }

    /// Incremented by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            changes: self.changes.clone(),
            deletions: self.deletions.clone(),
        }
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Remove exactly the entries `shipped` contained. A change re-recorded
    /// with a different value since the snapshot stays pending, as do edits
    /// made after it.
    pub fn remove_shipped(&mut self, shipped: &LedgerSnapshot) {
        let before = self.changes.len() + self.deletions.len();
        self.changes.retain(|c| !shipped.changes.contains(c));
        let mut remaining = shipped.deletions.clone();
        self.deletions.retain(|d| match remaining.iter().position(|s| s == d) {
            Some(pos) => {
                remaining.swap_remove(pos);
                false
            }
            None => true,
        });
        self.positions = self
            .changes
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.change_key.clone(), pos))
            .collect();
        self.version += 1;
        debug!(
            removed = before - self.changes.len() - self.deletions.len(),
            kept = self.changes.len() + self.deletions.len(),
            "removed synced entries"
        );
    }

    /// Re-address entries whose object a sync gave a new id, so edits made
    /// while it ran follow the rewritten object. Changes that now share a
    /// key collapse, the later one winning.
    pub fn remap(&mut self, renamed: &BTreeMap<ObjectId, ObjectId>) {
        if renamed.is_empty() {
            return;
        }
        let mut moved = 0;
        let changes = std::mem::take(&mut self.changes);
        self.positions.clear();
        for mut change in changes {
            if let Some(new) = renamed.get(&change.change_key.object_id) {
                change.change_key.object_id = *new;
                moved += 1;
            }
            match self.positions.get(&change.change_key) {
                Some(&pos) => self.changes[pos] = change,
                None => {
                    self.positions
                        .insert(change.change_key.clone(), self.changes.len());
                    self.changes.push(change);
                }
            }
        }
        for deletion in &mut self.deletions {
            if let Some(new) = renamed.get(&deletion.object_id) {
                deletion.object_id = *new;
                moved += 1;
            }
        }
        self.version += 1;
        debug!(moved, "re-addressed pending entries");
    }

    /// Materialize the overlay. A consistency failure resets the ledger,
    /// frozen or not, before the error is returned.
    pub fn materialize(&mut self, store: &ObjectStore) -> Result<MaterializedObjects, ConsistencyError> {
        materialize(store, &self.changes, &self.deletions).inspect_err(|e| {
            warn!(error = %e, changes = self.changes.len(), "ledger inconsistent with store, resetting");
            self.clear();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_types::{FieldValue, TypeError};
    use proptest::prelude::*;

    fn id() -> ObjectId {
        ObjectId::digest(b"post")
    }

    fn change(field: &str, value: &str) -> Change {
        Change::new(ChangeKey::field(id(), field), "post", value.into())
    }

    #[test]
    fn same_key_overwrites_in_place() {
        let mut ledger = ChangeLedger::new();
        ledger.record_change(change("title", "one")).unwrap();
        ledger.record_change(change("body", "b")).unwrap();
        ledger.record_change(change("title", "two")).unwrap();
        assert_eq!(ledger.changes().len(), 2);
        assert_eq!(ledger.changes()[0].value, FieldValue::string("two"));
        assert_eq!(ledger.changes()[1].field, "body");
    }

    #[test]
    fn lookup_by_key_and_object() {
        let mut ledger = ChangeLedger::new();
        ledger.record_change(change("title", "t")).unwrap();
        let other = Change::new(ChangeKey::field(ObjectId::new_temp(), "title"), "post", "x".into());
        ledger.record_change(other).unwrap();
        assert!(ledger.get(&ChangeKey::field(id(), "title")).is_some());
        assert_eq!(ledger.changed_fields(&id()).count(), 1);
    }

    #[test]
    fn malformed_entries_are_rejected_without_mutation() {
        let mut ledger = ChangeLedger::new();
        let mut bad = change("title", "x");
        bad.field = "other".into();
        assert!(matches!(
            ledger.record_change(bad),
            Err(LedgerError::Malformed(TypeError::MalformedChange(_)))
        ));
        let bad_deletion = Deletion {
            object_id: id(),
            field: None,
            index: Some(1),
        };
        assert!(ledger.record_deletion(bad_deletion).is_err());
        assert!(!ledger.has_pending());
        assert_eq!(ledger.version(), 0);
    }

    #[test]
    fn frozen_ledger_refuses_edits() {
        let mut ledger = ChangeLedger::new();
        ledger.record_change(change("title", "x")).unwrap();
        ledger.freeze();
        assert_eq!(
            ledger.record_change(change("title", "y")),
            Err(LedgerError::SyncInProgress)
        );
        assert_eq!(
            ledger.record_deletion(Deletion::object(id())),
            Err(LedgerError::SyncInProgress)
        );
        assert_eq!(ledger.reset(), Err(LedgerError::SyncInProgress));
        ledger.thaw();
        ledger.reset().unwrap();
        assert!(!ledger.has_pending());
    }

    #[test]
    fn remove_shipped_keeps_later_edits() {
        let mut ledger = ChangeLedger::new();
        ledger.record_change(change("title", "shipped")).unwrap();
        ledger.record_change(change("body", "shipped")).unwrap();
        ledger.record_deletion(Deletion::child(id(), "sections", 0)).unwrap();
        let shipped = ledger.snapshot();

        ledger.record_change(change("title", "edited again")).unwrap();
        ledger.record_change(change("summary", "new")).unwrap();
        ledger.record_deletion(Deletion::child(id(), "sections", 0)).unwrap();
        ledger.remove_shipped(&shipped);

        let fields: Vec<&str> = ledger.changes().iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "summary"]);
        assert_eq!(ledger.deletions().len(), 1);
        assert_eq!(
            ledger.get(&ChangeKey::field(id(), "summary")).unwrap().value,
            FieldValue::string("new")
        );
    }

    #[test]
    fn remap_follows_renamed_objects() {
        let mut ledger = ChangeLedger::new();
        let other = ObjectId::digest(b"other");
        let new = ObjectId::digest(b"post v2");
        ledger.record_change(change("title", "old")).unwrap();
        ledger
            .record_change(Change::new(ChangeKey::field(other, "title"), "post", "x".into()))
            .unwrap();
        ledger
            .record_change(Change::new(ChangeKey::field(new, "title"), "post", "new".into()))
            .unwrap();
        ledger.record_deletion(Deletion::child(id(), "sections", 0)).unwrap();

        ledger.remap(&BTreeMap::from([(id(), new)]));
        assert_eq!(ledger.changes().len(), 2);
        assert!(ledger.changed_fields(&id()).next().is_none());
        let key = ChangeKey::field(new, "title");
        assert_eq!(ledger.get(&key).unwrap().value, FieldValue::string("new"));
        assert_eq!(ledger.changes()[0].change_key, key);
        assert_eq!(ledger.deletions()[0].object_id, new);
        assert!(ledger.get(&ChangeKey::field(other, "title")).is_some());
    }

    #[test]
    fn snapshot_roundtrip_through_json() {
        let mut ledger = ChangeLedger::new();
        ledger.record_change(change("title", "x")).unwrap();
        ledger.record_deletion(Deletion::object(ObjectId::new_temp())).unwrap();
        let json = serde_json::to_string(&ledger.snapshot()).unwrap();
        let back = ChangeLedger::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(back.snapshot(), ledger.snapshot());
    }

    proptest! {
        #[test]
        fn last_write_wins(values in proptest::collection::vec("[a-z]{0,6}", 1..10)) {
            let mut ledger = ChangeLedger::new();
            for v in &values {
                ledger.record_change(change("title", v)).unwrap();
            }
            prop_assert_eq!(ledger.changes().len(), 1);
            prop_assert_eq!(
                &ledger.changes()[0].value,
                &FieldValue::string(values.last().unwrap().clone())
            );
        }
    }
}
