use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;
use crate::object::ObjectId;
use crate::value::FieldValue;

/// Composite address of one editable field.
///
/// A plain field edit addresses `(object_id, field)`. An edit inside a child
/// list additionally carries the element index and the child field name.
///
/// The string form is a sequence of length-prefixed components,
/// `<len>:<object_id><len>:<field>[<index>]<len>:<child_field>`, so names may
/// contain any character without ambiguity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeKey {
    pub object_id: ObjectId,
    pub field: String,
    pub index: Option<usize>,
    pub child_field: Option<String>,
}

impl ChangeKey {
    /// Key for a top-level field.
    pub fn field(object_id: ObjectId, field: impl Into<String>) -> Self {
        Self {
            object_id,
            field: field.into(),
            index: None,
            child_field: None,
        }
    }

    /// Key for `child_field` of element `index` in child list `field`.
    pub fn child(
        object_id: ObjectId,
        field: impl Into<String>,
        index: usize,
        child_field: impl Into<String>,
    ) -> Self {
        Self {
            object_id,
            field: field.into(),
            index: Some(index),
            child_field: Some(child_field.into()),
        }
    }

    /// The field name the change value is written to.
    pub fn leaf_field(&self) -> &str {
        self.child_field.as_deref().unwrap_or(&self.field)
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        push_component(&mut out, &self.object_id.to_string());
        push_component(&mut out, &self.field);
        if let Some(index) = self.index {
            out.push('[');
            out.push_str(&index.to_string());
            out.push(']');
        }
        if let Some(child) = &self.child_field {
            push_component(&mut out, child);
        }
        out
    }

    pub fn decode(key: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidChangeKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = key;
        let object_id = take_component(&mut rest).ok_or_else(|| invalid("missing object id"))?;
        let object_id = ObjectId::parse(object_id).map_err(|e| invalid(&e.to_string()))?;
        let field = take_component(&mut rest)
            .ok_or_else(|| invalid("missing field"))?
            .to_string();

        let index = match rest.strip_prefix('[') {
            Some(after) => {
                let end = after.find(']').ok_or_else(|| invalid("unterminated index"))?;
                let digits = &after[..end];
                let index = parse_canonical_usize(digits).ok_or_else(|| invalid("bad index"))?;
                rest = &after[end + 1..];
                Some(index)
            }
            None => None,
        };

        let child_field = if rest.is_empty() {
            None
        } else {
            if index.is_none() {
                return Err(invalid("child field without index"));
            }
            let child = take_component(&mut rest)
                .ok_or_else(|| invalid("bad child field"))?
                .to_string();
            Some(child)
        };

        if !rest.is_empty() {
            return Err(invalid("trailing data"));
        }

        Ok(Self {
            object_id,
            field,
            index,
            child_field,
        })
    }
}

fn push_component(out: &mut String, text: &str) {
    out.push_str(&text.len().to_string());
    out.push(':');
    out.push_str(text);
}

fn take_component<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let colon = rest.find(':')?;
    let len = parse_canonical_usize(&rest[..colon])?;
    let body = &rest[colon + 1..];
    let text = body.get(..len)?;
    *rest = &body[len..];
    Some(text)
}

fn parse_canonical_usize(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ChangeKey");
        d.field("object_id", &self.object_id).field("field", &self.field);
        if let Some(index) = self.index {
            d.field("index", &index);
        }
        if let Some(child) = &self.child_field {
            d.field("child_field", child);
        }
        d.finish()
    }
}

impl FromStr for ChangeKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for ChangeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ChangeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A pending field edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub change_key: ChangeKey,
    pub object_type: String,
    /// The field written by this change; equals `change_key.leaf_field()`.
    pub field: String,
    pub value: FieldValue,
}

impl Change {
    pub fn new(change_key: ChangeKey, object_type: impl Into<String>, value: FieldValue) -> Self {
        let field = change_key.leaf_field().to_string();
        Self {
            change_key,
            object_type: object_type.into(),
            field,
            value,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.change_key.object_id
    }

    pub fn validate(&self) -> Result<(), TypeError> {
        if self.object_type.is_empty() {
            return Err(TypeError::MalformedChange(format!(
                "{}: empty object type",
                self.change_key
            )));
        }
        if self.field != self.change_key.leaf_field() {
            return Err(TypeError::MalformedChange(format!(
                "{}: field {:?} does not match key",
                self.change_key, self.field
            )));
        }
        if self.change_key.child_field.is_some() && self.change_key.index.is_none() {
            return Err(TypeError::MalformedChange(format!(
                "{}: child field without index",
                self.change_key
            )));
        }
        Ok(())
    }
}

/// A pending deletion: a whole object, or one element of a child list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    pub object_id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl Deletion {
    pub fn object(object_id: ObjectId) -> Self {
        Self {
            object_id,
            field: None,
            index: None,
        }
    }

    pub fn child(object_id: ObjectId, field: impl Into<String>, index: usize) -> Self {
        Self {
            object_id,
            field: Some(field.into()),
            index: Some(index),
        }
    }

    pub fn is_whole_object(&self) -> bool {
        self.field.is_none()
    }

    pub fn validate(&self) -> Result<(), TypeError> {
        match (&self.field, self.index) {
            (None, None) | (Some(_), Some(_)) => Ok(()),
            _ => Err(TypeError::MalformedDeletion(format!(
                "{}: field and index must be given together",
                self.object_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id() -> ObjectId {
        ObjectId::digest(b"post")
    }

    #[test]
    fn plain_key_roundtrip() {
        let key = ChangeKey::field(id(), "title");
        let decoded = ChangeKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.index, None);
        assert_eq!(decoded.child_field, None);
    }

    #[test]
    fn child_key_roundtrip() {
        let key = ChangeKey::child(ObjectId::new_temp(), "sections", 4, "heading");
        let decoded = ChangeKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.leaf_field(), "heading");
    }

    #[test]
    fn delimiters_inside_names_survive() {
        let key = ChangeKey::child(id(), "a#b/c.d", 1, "3:x[2]");
        let decoded = ChangeKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded.field, "a#b/c.d");
        assert_eq!(decoded.child_field.as_deref(), Some("3:x[2]"));
    }

    #[test]
    fn decode_rejects_malformed() {
        let good = ChangeKey::field(id(), "title").encode();
        assert!(ChangeKey::decode("").is_err());
        assert!(ChangeKey::decode(&format!("{good}x")).is_err());
        assert!(ChangeKey::decode(&good[..good.len() - 1]).is_err());
        assert!(ChangeKey::decode(&format!("{good}[01]")).is_err());
        assert!(ChangeKey::decode(&format!("{good}5:child")).is_err());
    }

    #[test]
    fn serde_uses_encoded_form() {
        let key = ChangeKey::field(id(), "title");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.encode()));
        let back: ChangeKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn change_new_derives_field() {
        let change = Change::new(
            ChangeKey::child(id(), "sections", 0, "heading"),
            "post",
            "Intro".into(),
        );
        assert_eq!(change.field, "heading");
        assert!(change.validate().is_ok());
    }

    #[test]
    fn change_validate_catches_mismatch() {
        let mut change = Change::new(ChangeKey::field(id(), "title"), "post", "x".into());
        change.field = "body".into();
        assert!(matches!(change.validate(), Err(TypeError::MalformedChange(_))));
    }

    #[test]
    fn deletion_validate() {
        assert!(Deletion::object(id()).validate().is_ok());
        assert!(Deletion::child(id(), "sections", 1).validate().is_ok());
        let bad = Deletion {
            object_id: id(),
            field: Some("sections".into()),
            index: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn deletion_json_omits_absent_parts() {
        let json = serde_json::to_string(&Deletion::object(id())).unwrap();
        assert!(!json.contains("field"));
        assert!(!json.contains("index"));
    }

    proptest! {
        #[test]
        fn encoding_is_bijective(
            field in "\\PC{0,12}",
            child in proptest::option::of(("\\PC{0,12}", 0usize..10_000)),
        ) {
            let key = match child {
                Some((child_field, index)) => ChangeKey::child(id(), field, index, child_field),
                None => ChangeKey::field(id(), field),
            };
            let encoded = key.encode();
            let decoded = ChangeKey::decode(&encoded).unwrap();
            prop_assert_eq!(&decoded, &key);
            prop_assert_eq!(decoded.encode(), encoded);
        }
    }
}
