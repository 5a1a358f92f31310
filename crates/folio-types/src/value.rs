use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

/// Content-bearing fields of an object or of one child element.
///
/// Ordered by key, so two maps with the same entries serialize identically
/// regardless of insertion order.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single scalar value.
///
/// Datetimes travel as `{"$__toml_private_datetime": "<rfc3339>"}`, the same
/// marker `toml` uses, so they stay distinct from strings in JSON. Floats
/// must be finite; JSON has no spelling for `inf` or `nan`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Integer(i64),
    #[serde(serialize_with = "serialize_finite")]
    Float(f64),
    Boolean(bool),
    /// RFC 3339 date/time kept in its textual form.
    #[serde(with = "datetime_wire")]
    Datetime(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Datetime(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(serde::ser::Error::custom(format!("float {value} has no JSON form")));
    }
    serializer.serialize_f64(*value)
}

mod datetime_wire {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    struct Out<'a> {
        #[serde(rename = "$__toml_private_datetime")]
        value: &'a str,
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct In {
        #[serde(rename = "$__toml_private_datetime")]
        value: String,
    }

    pub fn serialize<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
        Out { value }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        In::deserialize(deserializer).map(|wire| wire.value)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Tagged field value.
///
/// Child lists hold one optional field map per element; `None` marks a slot
/// that is absent (never written, or tombstoned by a pending deletion).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
    Children(Vec<Option<FieldMap>>),
}

impl FieldValue {
    pub fn string(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::String(s.into()))
    }

    pub fn empty_children() -> Self {
        Self::Children(Vec::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => s.as_str(),
            _ => None,
        }
    }

    /// False if any float inside, at any depth, is `inf` or `nan`.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Scalar(s) => s.is_finite(),
            Self::List(items) => items.iter().all(Scalar::is_finite),
            Self::Children(children) => children
                .iter()
                .flatten()
                .all(|child| child.values().all(FieldValue::is_finite)),
        }
    }

    pub fn as_children(&self) -> Option<&[Option<FieldMap>]> {
        match self {
            Self::Children(c) => Some(c),
            _ => None,
        }
    }

    /// Reinterpret as a child list.
    ///
    /// An empty scalar list is indistinguishable from an empty child list
    /// once serialized, so it converts. Any other non-child value yields
    /// `None`.
    pub fn into_children(self) -> Option<Vec<Option<FieldMap>>> {
        match self {
            Self::Children(c) => Some(c),
            Self::List(l) if l.is_empty() => Some(Vec::new()),
            _ => None,
        }
    }

    /// Set `child_field` of element `index`, growing the list with absent
    /// slots as needed. Non-child values are replaced by a fresh child list.
    pub fn set_child(&mut self, index: usize, child_field: &str, value: FieldValue) {
        let mut children = std::mem::replace(self, Self::empty_children())
            .into_children()
            .unwrap_or_default();
        if children.len() <= index {
            children.resize(index + 1, None);
        }
        children[index]
            .get_or_insert_with(FieldMap::new)
            .insert(child_field.to_string(), value);
        *self = Self::Children(children);
    }

    /// Replace element `index` wholesale, growing the list as needed.
    pub fn set_element(&mut self, index: usize, element: Option<FieldMap>) {
        let mut children = std::mem::replace(self, Self::empty_children())
            .into_children()
            .unwrap_or_default();
        if children.len() <= index {
            children.resize(index + 1, None);
        }
        children[index] = element;
        *self = Self::Children(children);
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<Scalar> for FieldValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}
