use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use folio_crypto::ContentHasher;
use folio_ledger::{apply_change, LedgerSnapshot};
use folio_schema::TypeRegistry;
use folio_store::{ObjectCodec, ObjectStore, StoreLayout};
use folio_types::{is_meta_key, Change, FieldMap, FieldValue, Object, ObjectId};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// One object file to write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileWrite {
    pub location: String,
    pub contents: String,
}

/// The working-tree mutations a replay produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WritePlan {
    pub writes: Vec<FileWrite>,
    pub removals: Vec<String>,
    /// The ledger id each written object was addressed by, with its
    /// location.
    pub targets: Vec<(ObjectId, String)>,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.removals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len() + self.removals.len()
    }

    /// Every path the plan touches.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.writes
            .iter()
            .map(|w| w.location.as_str())
            .chain(self.removals.iter().map(String::as_str))
    }
}

struct Touched {
    object: Object,
    /// Created by the ledger rather than loaded from the store.
    new: bool,
}

/// Replays a ledger snapshot over a freshly pulled store.
///
/// Touched objects are tracked by the id the ledger addresses them with,
/// while their `id` field is rehashed after every mutation.
struct Replay<'a> {
    store: &'a ObjectStore,
    registry: &'a TypeRegistry,
    touched: HashMap<ObjectId, Touched>,
    order: Vec<ObjectId>,
}

impl<'a> Replay<'a> {
    fn new(store: &'a ObjectStore) -> Self {
        Self {
            store,
            registry: store.registry(),
            touched: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The scratch copy of `id`, loading it from the store on first touch.
    /// `create` names the type for ids the ledger minted itself.
    fn target(&mut self, id: ObjectId, create: Option<&str>) -> SyncResult<&mut Touched> {
        match self.touched.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let touched = match (id.is_temp(), create) {
                    (true, Some(object_type)) => {
                        if !self.registry.contains(object_type) {
                            return Err(SyncError::validation(format!(
                                "{id}: unknown object type {object_type}"
                            )));
                        }
                        Touched {
                            object: Object::provisional(id, object_type),
                            new: true,
                        }
                    }
                    (true, None) => {
                        return Err(SyncError::validation(format!(
                            "{id}: new object has no pending fields"
                        )))
                    }
                    (false, _) => Touched {
                        object: self
                            .store
                            .get(&id)
                            .cloned()
                            .ok_or(SyncError::MissingObject(id))?,
                        new: false,
                    },
                };
                self.order.push(id);
                Ok(entry.insert(touched))
            }
        }
    }

    fn change(&mut self, change: &Change) -> SyncResult<()> {
        let id = change.object_id();
        let registry = self.registry;
        let target = self.target(id, Some(&change.object_type))?;
        let object = &mut target.object;
        if object.object_type != change.object_type {
            return Err(SyncError::validation(format!(
                "{id}: change for type {} on a {} object",
                change.object_type, object.object_type
            )));
        }
        registry
            .check_change(change)
            .map_err(|e| SyncError::validation(format!("{id}: {e}")))?;

        let key = &change.change_key;
        if key.index.is_none() && is_meta_key(&key.field) {
            // Only the name of a new object is taken from the ledger; its
            // location is derived from the name when written.
            if let ("name", true, Some(name)) = (key.field.as_str(), target.new, change.value.as_str()) {
                object.name = name.to_string();
            }
            return Ok(());
        }
        apply_change(object, change, registry);
        ContentHasher::rehash(object).map_err(SyncError::validation)?;
        Ok(())
    }

    /// Splice `indices` out of child list `field`, highest index first.
    fn delete_children(&mut self, id: ObjectId, field: &str, mut indices: Vec<usize>) -> SyncResult<()> {
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();
        let object = &mut self.target(id, None)?.object;
        let children = match object.fields.get_mut(field) {
            Some(FieldValue::Children(children)) => children,
            Some(FieldValue::List(items)) if items.is_empty() => {
                return Err(SyncError::validation(format!(
                    "{id}: {field}[{}] is out of range",
                    indices[0]
                )))
            }
            Some(_) => {
                return Err(SyncError::validation(format!("{id}: {field} is not a child list")))
            }
            None => return Err(SyncError::validation(format!("{id}: no field {field}"))),
        };
        for index in indices {
            if index >= children.len() {
                return Err(SyncError::validation(format!(
                    "{id}: {field}[{index}] is out of range"
                )));
            }
            children.remove(index);
        }
        ContentHasher::rehash(object).map_err(SyncError::validation)?;
        Ok(())
    }

    fn forget(&mut self, id: &ObjectId) {
        if self.touched.remove(id).is_some() {
            self.order.retain(|o| o != id);
        }
    }
}

fn check_name(object: &Object) -> SyncResult<()> {
    let name = object.name.trim();
    if name.is_empty() {
        return Err(SyncError::validation(format!(
            "new {} object has no name",
            object.object_type
        )));
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(SyncError::validation(format!("invalid object name {name:?}")));
    }
    Ok(())
}

fn content_fields(fields: &FieldMap) -> FieldMap {
    fields
        .iter()
        .filter(|(k, _)| !is_meta_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Replay `ledger` over `store` and work out the files to write and remove.
///
/// Changes to whole-deleted objects are dropped first. Changes compose per
/// object, then child deletions are spliced out. Nothing is written here.
pub fn plan(
    store: &ObjectStore,
    ledger: &LedgerSnapshot,
    layout: &StoreLayout,
    codec: &dyn ObjectCodec,
) -> SyncResult<WritePlan> {
    let whole: HashSet<ObjectId> = ledger
        .deletions
        .iter()
        .filter(|d| d.is_whole_object())
        .map(|d| d.object_id)
        .collect();

    let mut replay = Replay::new(store);
    for change in &ledger.changes {
        if whole.contains(&change.object_id()) {
            debug!(id = %change.object_id().short(), field = %change.field, "skipping change to deleted object");
            continue;
        }
        replay.change(change)?;
    }

    let mut child_deletions: Vec<((ObjectId, String), Vec<usize>)> = Vec::new();
    for deletion in &ledger.deletions {
        let (Some(field), Some(index)) = (&deletion.field, deletion.index) else {
            continue;
        };
        if whole.contains(&deletion.object_id) {
            continue;
        }
        let key = (deletion.object_id, field.clone());
        match child_deletions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, indices)) => indices.push(index),
            None => child_deletions.push((key, vec![index])),
        }
    }
    for ((id, field), indices) in child_deletions {
        replay.delete_children(id, &field, indices)?;
    }

    let mut removals = Vec::new();
    let mut seen = HashSet::new();
    for deletion in ledger.deletions.iter().filter(|d| d.is_whole_object()) {
        let id = deletion.object_id;
        if !seen.insert(id) {
            continue;
        }
        replay.forget(&id);
        match store.get(&id).and_then(|o| o.location.clone()) {
            Some(location) if !id.is_temp() => removals.push(location),
            _ => debug!(id = %id.short(), "deleted object has no file"),
        }
    }

    let mut writes: Vec<FileWrite> = Vec::new();
    let mut targets = Vec::new();
    for id in &replay.order {
        let Some(touched) = replay.touched.get(id) else {
            continue;
        };
        let object = &touched.object;
        let location = if touched.new {
            check_name(object)?;
            let location =
                layout.object_location(&object.object_type, object.name.trim(), codec.extension());
            let taken = store.location_taken(&location) && !removals.contains(&location);
            if taken || writes.iter().any(|w| w.location == location) {
                return Err(SyncError::validation(format!("{location} already exists")));
            }
            location
        } else {
            object
                .location
                .clone()
                .ok_or_else(|| SyncError::validation(format!("{id}: object has no location")))?
        };
        let contents = codec
            .stringify(&content_fields(&object.fields))
            .map_err(|e| SyncError::validation(format!("cannot serialize {location}: {e}")))?;
        targets.push((*id, location.clone()));
        writes.push(FileWrite { location, contents });
    }

    Ok(WritePlan {
        writes,
        removals,
        targets,
    })
}
