use folio_types::{is_meta_key, FieldMap, Object, ObjectId};
use sha2::{Digest, Sha256};

/// Canonical SHA-256 hasher for object content.
///
/// The canonical form is the compact JSON encoding of the field map. Field
/// maps are key-ordered, so two logically equal maps hash identically no
/// matter how they were built. Array order is significant.
pub struct ContentHasher;

impl ContentHasher {
    /// Canonical byte encoding of a field map, with any stray metadata keys
    /// removed from the top level.
    pub fn canonical_bytes(fields: &FieldMap) -> Result<Vec<u8>, HasherError> {
        let encode = |map: &FieldMap| {
            serde_json::to_vec(map).map_err(|e| HasherError::Serialization(e.to_string()))
        };
        if fields.keys().any(|k| is_meta_key(k)) {
            let content: FieldMap = fields
                .iter()
                .filter(|(k, _)| !is_meta_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            encode(&content)
        } else {
            encode(fields)
        }
    }

    /// Content id for a field map.
    pub fn hash_fields(fields: &FieldMap) -> Result<ObjectId, HasherError> {
        let bytes = Self::canonical_bytes(fields)?;
        Ok(ObjectId::Content(Sha256::digest(&bytes).into()))
    }

    /// Recompute `object.id` from its current fields.
    ///
    /// Must run after every field mutation; a stale id would address content
    /// that no longer exists.
    pub fn rehash(object: &mut Object) -> Result<ObjectId, HasherError> {
        object.id = Self::hash_fields(&object.fields)?;
        Ok(object.id)
    }

    /// Returns `true` if `object.id` matches its content.
    pub fn verify(object: &Object) -> Result<bool, HasherError> {
        Ok(Self::hash_fields(&object.fields)? == object.id)
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
