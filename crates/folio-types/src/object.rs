use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::TypeError;
use crate::value::FieldMap;

/// Field names reserved for object metadata. They never take part in hashing
/// and never appear in type definitions.
pub const META_KEYS: [&str; 3] = ["id", "name", "location"];

/// Returns `true` if `field` is one of the reserved metadata names.
pub fn is_meta_key(field: &str) -> bool {
    META_KEYS.contains(&field)
}

const TEMP_PREFIX: &str = "temp:";

/// Identifier for a content object.
///
/// Persisted objects are addressed by the SHA-256 digest of their
/// content-bearing fields. Objects created locally and not yet synchronized
/// carry a client-minted `temp:<uuid>` placeholder until the sync engine
/// writes them and they are re-read with a real digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Content([u8; 32]),
    Temp(Uuid),
}

impl ObjectId {
    /// Compute a content id from raw bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self::Content(Sha256::digest(data).into())
    }

    /// Mint a fresh placeholder id for a not-yet-persisted object.
    pub fn new_temp() -> Self {
        Self::Temp(Uuid::new_v4())
    }

    /// Returns `true` for `temp:` placeholder ids.
    pub fn is_temp(&self) -> bool {
        matches!(self, Self::Temp(_))
    }

    /// Short representation for logs (first 8 hex characters).
    pub fn short(&self) -> String {
        match self {
            Self::Content(hash) => hex::encode(&hash[..4]),
            Self::Temp(uuid) => format!("{TEMP_PREFIX}{}", &uuid.simple().to_string()[..8]),
        }
    }

    /// Parse from the wire form: 64 hex characters or `temp:<uuid>`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if let Some(rest) = s.strip_prefix(TEMP_PREFIX) {
            let uuid = Uuid::parse_str(rest)
                .map_err(|e| TypeError::InvalidObjectId(format!("{s}: {e}")))?;
            return Ok(Self::Temp(uuid));
        }
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidObjectId(format!("{s}: {e}")))?;
        let hash: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            TypeError::InvalidObjectId(format!("{s}: expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::Content(hash))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content(hash) => write!(f, "{}", hex::encode(hash)),
            Self::Temp(uuid) => write!(f, "{TEMP_PREFIX}{}", uuid.hyphenated()),
        }
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A content object: a typed field map plus its metadata.
///
/// `id`, `object_type`, `name` and `location` are metadata. Only `fields`
/// is content-bearing, so only `fields` contributes to the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub object_type: String,
    pub name: String,
    /// Backing file path. `None` until a provisional object is first written.
    pub location: Option<String>,
    pub fields: FieldMap,
}

impl Object {
    /// A provisional object with no fields yet.
    pub fn provisional(id: ObjectId, object_type: impl Into<String>) -> Self {
        Self {
            id,
            object_type: object_type.into(),
            name: String::new(),
            location: None,
            fields: FieldMap::new(),
        }
    }

    /// Returns `true` if this object has never been persisted.
    pub fn is_provisional(&self) -> bool {
        self.id.is_temp() || self.location.is_none()
    }
}
