use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use folio_schema::{FieldDefinition, TypeRegistry};
use folio_store::ObjectStore;
use folio_types::{Change, Deletion, FieldValue, Object, ObjectId};
use tracing::debug;

use crate::error::ConsistencyError;

/// The edit-applied view of every object.
///
/// Objects keep the ids they have in the store, so later edits can keep
/// addressing them. Provisional objects follow the persisted ones in their
/// type's bucket, in creation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedObjects {
    buckets: BTreeMap<String, Vec<Object>>,
}

impl MaterializedObjects {
    pub fn all(&self, object_type: &str) -> &[Object] {
        self.buckets
            .get(object_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Object> {
        self.iter().find(|o| o.id == *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.buckets.values().flatten()
    }

    pub fn buckets(&self) -> &BTreeMap<String, Vec<Object>> {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply one change to `object` in place. Metadata edits only land on
/// provisional objects; `id` edits are always ignored.
pub fn apply_change(object: &mut Object, change: &Change, registry: &TypeRegistry) {
    let key = &change.change_key;
    match (key.index, key.child_field.as_deref()) {
        (None, _) if folio_types::is_meta_key(&key.field) => {
            if !object.is_provisional() {
                debug!(id = %object.id.short(), field = %key.field, "ignoring metadata edit");
                return;
            }
            let text = change.value.as_str().map(str::to_string);
            match (key.field.as_str(), text) {
                ("name", Some(name)) => object.name = name,
                ("location", Some(location)) => object.location = Some(location),
                _ => {}
            }
        }
        (None, _) => {
            let is_child = matches!(
                registry.field(&object.object_type, &key.field),
                Some(FieldDefinition::Children(_))
            );
            let value = match &change.value {
                FieldValue::List(items) if is_child && items.is_empty() => FieldValue::empty_children(),
                value => value.clone(),
            };
            object.fields.insert(key.field.clone(), value);
        }
        (Some(index), Some(child)) => {
            object
                .fields
                .entry(key.field.clone())
                .or_insert_with(FieldValue::empty_children)
                .set_child(index, child, change.value.clone());
        }
        (Some(index), None) => {
            let element = match &change.value {
                FieldValue::Children(c) => c.first().cloned().flatten(),
                _ => None,
            };
            object
                .fields
                .entry(key.field.clone())
                .or_insert_with(FieldValue::empty_children)
                .set_element(index, element);
        }
    }
}

/// Null out child slots without shifting their siblings.
fn tombstone(object: &mut Object, deletions: &[(String, usize)]) {
    for (field, index) in deletions {
        if let Some(FieldValue::Children(children)) = object.fields.get_mut(field) {
            if let Some(slot) = children.get_mut(*index) {
                *slot = None;
            }
        }
    }
}

/// Derive the effective object set by replaying pending edits over `store`.
///
/// The store is not modified. With no pending edits the result equals the
/// store's contents.
pub fn materialize(
    store: &ObjectStore,
    changes: &[Change],
    deletions: &[Deletion],
) -> Result<MaterializedObjects, ConsistencyError> {
    let registry = store.registry();

    let mut whole: HashSet<ObjectId> = HashSet::new();
    let mut child_deletions: HashMap<ObjectId, Vec<(String, usize)>> = HashMap::new();
    for deletion in deletions {
        match (&deletion.field, deletion.index) {
            (Some(field), Some(index)) => child_deletions
                .entry(deletion.object_id)
                .or_default()
                .push((field.clone(), index)),
            _ => {
                whole.insert(deletion.object_id);
            }
        }
    }

    let mut edited: HashMap<ObjectId, Object> = HashMap::new();
    let mut provisional: Vec<ObjectId> = Vec::new();

    for change in changes {
        let id = change.object_id();
        if whole.contains(&id) {
            continue;
        }

        let target = match edited.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let object = match store.get(&id).filter(|_| !id.is_temp()) {
                    Some(persisted) => persisted.clone(),
                    None => {
                        if !registry.contains(&change.object_type) {
                            return Err(ConsistencyError::UnknownType {
                                object_id: id,
                                object_type: change.object_type.clone(),
                            });
                        }
                        provisional.push(id);
                        Object::provisional(id, change.object_type.clone())
                    }
                };
                entry.insert(object)
            }
        };

        if target.object_type != change.object_type {
            return Err(ConsistencyError::TypeMismatch {
                object_id: id,
                expected: target.object_type.clone(),
                found: change.object_type.clone(),
            });
        }
        registry
            .check_change(change)
            .map_err(|source| ConsistencyError::InvalidChange {
                object_id: id,
                source,
            })?;
        apply_change(target, change, registry);
    }

    let mut buckets: BTreeMap<String, Vec<Object>> = BTreeMap::new();
    for (object_type, bucket) in store.buckets() {
        let out = buckets.entry(object_type.clone()).or_default();
        for object in bucket {
            if whole.contains(&object.id) {
                continue;
            }
            let mut object = edited.get(&object.id).unwrap_or(object).clone();
            if let Some(dels) = child_deletions.get(&object.id) {
                tombstone(&mut object, dels);
            }
            out.push(object);
        }
    }
    for id in provisional {
        if let Some(mut object) = edited.remove(&id) {
            if let Some(dels) = child_deletions.get(&id) {
                tombstone(&mut object, dels);
            }
            buckets
                .entry(object.object_type.clone())
                .or_default()
                .push(object);
        }
    }

    Ok(MaterializedObjects { buckets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_crypto::ContentHasher;
    use folio_schema::TypeRegistry;
    use folio_store::ObjectsData;
    use folio_types::{ChangeKey, FieldMap};

    const TYPES: &str = r#"
[post]
title = "string"

[[post.sections]]
heading = "string"
"#;

    fn section(heading: &str) -> Option<FieldMap> {
        Some(FieldMap::from([("heading".to_string(), FieldValue::string(heading))]))
    }

    fn persisted(name: &str, title: &str, sections: &[&str]) -> Object {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), FieldValue::string(title));
        fields.insert(
            "sections".into(),
            FieldValue::Children(sections.iter().map(|h| section(h)).collect()),
        );
        let id = ContentHasher::hash_fields(&fields).unwrap();
        Object {
            id,
            object_type: "post".into(),
            name: name.into(),
            location: Some(format!("objects/post/{name}.toml")),
            fields,
        }
    }

    fn store(objects: Vec<Object>) -> ObjectStore {
        ObjectStore::from_snapshot(ObjectsData {
            types: TypeRegistry::parse(TYPES).unwrap(),
            objects: BTreeMap::from([("post".to_string(), objects)]),
        })
    }

    fn set(id: ObjectId, field: &str, value: &str) -> Change {
        Change::new(ChangeKey::field(id, field), "post", value.into())
    }

    #[test]
    fn empty_ledger_reproduces_store() {
        let s = store(vec![persisted("a", "A", &["x", "y"])]);
        let out = materialize(&s, &[], &[]).unwrap();
        assert_eq!(out.buckets(), s.buckets());
    }

    #[test]
    fn scalar_edit_overlays_without_touching_store() {
        let post = persisted("a", "A", &[]);
        let s = store(vec![post.clone()]);
        let out = materialize(&s, &[set(post.id, "title", "B")], &[]).unwrap();
        assert_eq!(out.get(&post.id).unwrap().fields["title"], FieldValue::string("B"));
        assert_eq!(s.get(&post.id).unwrap().fields["title"], FieldValue::string("A"));
    }

    #[test]
    fn whole_deletion_beats_edits_in_any_order() {
        let post = persisted("a", "A", &[]);
        let s = store(vec![post.clone()]);
        let edit = set(post.id, "title", "B");
        let delete = Deletion::object(post.id);
        let out = materialize(&s, &[edit.clone()], &[delete.clone()]).unwrap();
        assert!(out.get(&post.id).is_none());
        assert!(out.all("post").is_empty());
    }

    #[test]
    fn child_deletion_tombstones_without_shifting() {
        let post = persisted("a", "A", &["zero", "one", "two"]);
        let s = store(vec![post.clone()]);
        let out = materialize(&s, &[], &[Deletion::child(post.id, "sections", 1)]).unwrap();
        let children = out.get(&post.id).unwrap().fields["sections"]
            .as_children()
            .unwrap()
            .to_vec();
        assert_eq!(children, vec![section("zero"), None, section("two")]);
    }

    #[test]
    fn child_edits_grow_with_absent_slots() {
        let post = persisted("a", "A", &["zero"]);
        let s = store(vec![post.clone()]);
        let change = Change::new(
            ChangeKey::child(post.id, "sections", 2, "heading"),
            "post",
            "two".into(),
        );
        let out = materialize(&s, &[change], &[]).unwrap();
        let children = out.get(&post.id).unwrap().fields["sections"]
            .as_children()
            .unwrap()
            .to_vec();
        assert_eq!(children, vec![section("zero"), None, section("two")]);
    }

    #[test]
    fn provisional_objects_join_their_bucket() {
        let existing = persisted("a", "A", &[]);
        let s = store(vec![existing.clone()]);
        let temp = ObjectId::new_temp();
        let changes = vec![
            set(temp, "title", "Hello"),
            set(temp, "name", "hello"),
            set(temp, "id", "ignored"),
        ];
        let out = materialize(&s, &changes, &[]).unwrap();
        let bucket = out.all("post");
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket[0].id, existing.id);
        assert_eq!(bucket[1].id, temp);
        assert_eq!(bucket[1].name, "hello");
        assert!(bucket[1].location.is_none());
        assert_eq!(bucket[1].fields.len(), 1);
    }

    #[test]
    fn provisional_type_mismatch_is_inconsistent() {
        let s = store(vec![]);
        let temp = ObjectId::new_temp();
        let changes = vec![
            set(temp, "title", "Hello"),
            Change::new(ChangeKey::field(temp, "title"), "page", "x".into()),
        ];
        let err = materialize(&s, &changes, &[]).unwrap_err();
        assert!(matches!(err, ConsistencyError::TypeMismatch { .. }));
        assert_eq!(err.object_id(), temp);
    }

    #[test]
    fn unknown_field_is_inconsistent() {
        let s = store(vec![]);
        let temp = ObjectId::new_temp();
        let err = materialize(&s, &[set(temp, "subtitle", "x")], &[]).unwrap_err();
        assert!(matches!(err, ConsistencyError::InvalidChange { .. }));
    }

    #[test]
    fn unknown_type_is_inconsistent() {
        let s = store(vec![]);
        let temp = ObjectId::new_temp();
        let change = Change::new(ChangeKey::field(temp, "title"), "page", "x".into());
        let err = materialize(&s, &[change], &[]).unwrap_err();
        assert!(matches!(err, ConsistencyError::UnknownType { .. }));
    }

    #[test]
    fn metadata_edits_on_persisted_objects_are_ignored() {
        let post = persisted("a", "A", &[]);
        let s = store(vec![post.clone()]);
        let out = materialize(&s, &[set(post.id, "name", "renamed")], &[]).unwrap();
        assert_eq!(out.get(&post.id).unwrap().name, "a");
    }

    #[test]
    fn empty_list_on_child_field_becomes_children() {
        let temp = ObjectId::new_temp();
        let s = store(vec![]);
        let change = Change::new(ChangeKey::field(temp, "sections"), "post", FieldValue::List(vec![]));
        let out = materialize(&s, &[change], &[]).unwrap();
        assert_eq!(out.get(&temp).unwrap().fields["sections"], FieldValue::empty_children());
    }
}
