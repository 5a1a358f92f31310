use std::collections::BTreeMap;
use std::fmt;

use folio_types::{is_meta_key, Change, FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};

/// Keys stripped from type tables because they configure presentation, not content.
pub const PRESENTATION_KEYS: [&str; 1] = ["template"];

/// Kind of a scalar field. Unrecognized kinds are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScalarKind {
    String,
    Markdown,
    Image,
    Other(String),
}

impl ScalarKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Markdown => "markdown",
            Self::Image => "image",
            Self::Other(s) => s,
        }
    }

    /// Value a freshly created field of this kind starts with.
    pub fn default_value(&self) -> FieldValue {
        FieldValue::string("")
    }
}

impl From<String> for ScalarKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "string" => Self::String,
            "markdown" => Self::Markdown,
            "image" => Self::Image,
            _ => Self::Other(s),
        }
    }
}

impl From<ScalarKind> for String {
    fn from(kind: ScalarKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field layout of one element of a child list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildDefinition {
    pub fields: BTreeMap<String, ScalarKind>,
}

impl ChildDefinition {
    pub fn get(&self, field: &str) -> Option<&ScalarKind> {
        self.fields.get(field)
    }

    /// A child element with every field at its default value.
    pub fn default_element(&self) -> FieldMap {
        self.fields
            .iter()
            .map(|(name, kind)| (name.clone(), kind.default_value()))
            .collect()
    }
}

/// Definition of one top-level field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub enum FieldDefinition {
    Scalar(ScalarKind),
    Children(ChildDefinition),
}

impl FieldDefinition {
    pub fn as_children(&self) -> Option<&ChildDefinition> {
        match self {
            Self::Children(c) => Some(c),
            Self::Scalar(_) => None,
        }
    }

    pub fn default_value(&self) -> FieldValue {
        match self {
            Self::Scalar(kind) => kind.default_value(),
            Self::Children(_) => FieldValue::empty_children(),
        }
    }

    /// Whether `value` has a shape this field can hold.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Self::Scalar(_), FieldValue::Scalar(_) | FieldValue::List(_)) => true,
            (Self::Children(_), FieldValue::Children(_)) => true,
            (Self::Children(_), FieldValue::List(l)) => l.is_empty(),
            _ => false,
        }
    }
}

/// Wire form: a kind string, or a one-element array holding the child layout.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawField {
    Scalar(ScalarKind),
    Children(Vec<ChildDefinition>),
}

impl TryFrom<RawField> for FieldDefinition {
    type Error = String;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        match raw {
            RawField::Scalar(kind) => Ok(Self::Scalar(kind)),
            RawField::Children(mut defs) if defs.len() == 1 => Ok(Self::Children(defs.remove(0))),
            RawField::Children(defs) => Err(format!(
                "child list must declare exactly one element layout, found {}",
                defs.len()
            )),
        }
    }
}

impl From<FieldDefinition> for RawField {
    fn from(def: FieldDefinition) -> Self {
        match def {
            FieldDefinition::Scalar(kind) => Self::Scalar(kind),
            FieldDefinition::Children(child) => Self::Children(vec![child]),
        }
    }
}

/// Field layout of one object type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeDefinition {
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl TypeDefinition {
    pub fn get(&self, field: &str) -> Option<&FieldDefinition> {
        self.fields.get(field)
    }

    /// A field map with every field at its default value.
    pub fn default_fields(&self) -> FieldMap {
        self.fields
            .iter()
            .map(|(name, def)| (name.clone(), def.default_value()))
            .collect()
    }
}

/// All object types of one repository snapshot. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDefinition>,
}

impl TypeRegistry {
    /// Parse the TOML type-definition source.
    pub fn parse(source: &str) -> SchemaResult<Self> {
        let table: toml::Table =
            toml::from_str(source).map_err(|e| SchemaError::Parse(e.to_string()))?;

        let mut types = BTreeMap::new();
        for (type_name, value) in table {
            let toml::Value::Table(fields) = value else {
                return Err(SchemaError::InvalidType {
                    type_name,
                    reason: "expected a table".into(),
                });
            };
            let definition = parse_type(&type_name, fields)?;
            types.insert(type_name, definition);
        }

        debug!(types = types.len(), "parsed type registry");
        Ok(Self { types })
    }

    pub fn from_types(types: BTreeMap<String, TypeDefinition>) -> Self {
        Self { types }
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDefinition> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Lookup by `(type, field)`.
    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.get(field)
    }

    /// Lookup of a field inside a child list element.
    pub fn child_field(&self, type_name: &str, field: &str, child: &str) -> Option<&ScalarKind> {
        self.field(type_name, field)?.as_children()?.get(child)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeDefinition)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Coerce empty scalar lists to empty child lists wherever `type_name`
    /// declares a child field. Codecs cannot tell the two apart.
    pub fn normalize(&self, type_name: &str, fields: &mut FieldMap) {
        let Some(definition) = self.get(type_name) else {
            return;
        };
        for (name, value) in fields.iter_mut() {
            let is_child = matches!(definition.get(name), Some(FieldDefinition::Children(_)));
            if is_child && matches!(value, FieldValue::List(l) if l.is_empty()) {
                *value = FieldValue::empty_children();
            }
        }
    }

    /// Check that `change` addresses a field its type declares and carries a
    /// value of the right shape. Metadata fields are always addressable.
    pub fn check_change(&self, change: &Change) -> SchemaResult<()> {
        let type_name = change.object_type.as_str();
        let key = &change.change_key;
        let definition = self
            .get(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?;

        if key.index.is_none() && is_meta_key(&key.field) {
            return Ok(());
        }

        let unknown = |field: &str| SchemaError::UnknownField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        };
        let mismatch = |field: &str| SchemaError::ValueMismatch {
            type_name: type_name.to_string(),
            field: field.to_string(),
        };

        let field_def = definition.get(&key.field).ok_or_else(|| unknown(&key.field))?;
        if !change.value.is_finite() {
            return Err(mismatch(&key.field));
        }

        match (key.index, &key.child_field) {
            (None, _) => {
                if !field_def.accepts(&change.value) {
                    return Err(mismatch(&key.field));
                }
            }
            (Some(_), child) => {
                let child_def = field_def.as_children().ok_or_else(|| SchemaError::NotChildField {
                    type_name: type_name.to_string(),
                    field: key.field.clone(),
                })?;
                match child {
                    Some(child) => {
                        if child_def.get(child).is_none() {
                            return Err(unknown(&format!("{}.{child}", key.field)));
                        }
                        if !matches!(change.value, FieldValue::Scalar(_) | FieldValue::List(_)) {
                            return Err(mismatch(&format!("{}.{child}", key.field)));
                        }
                    }
                    None => {
                        // Whole-element replacement carries the element as a
                        // one-element child list.
                        if !matches!(&change.value, FieldValue::Children(c) if c.len() == 1) {
                            return Err(mismatch(&key.field));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_type(type_name: &str, fields: toml::Table) -> SchemaResult<TypeDefinition> {
    let mut definition = TypeDefinition::default();
    for (field, value) in fields {
        if PRESENTATION_KEYS.contains(&field.as_str()) || is_meta_key(&field) {
            continue;
        }
        let invalid = |reason: &str| SchemaError::InvalidField {
            type_name: type_name.to_string(),
            field: field.clone(),
            reason: reason.to_string(),
        };
        let parsed = match value {
            toml::Value::String(kind) => FieldDefinition::Scalar(ScalarKind::from(kind)),
            toml::Value::Array(mut items) => {
                if items.len() != 1 {
                    return Err(invalid("child list must declare exactly one element layout"));
                }
                let toml::Value::Table(child_fields) = items.remove(0) else {
                    return Err(invalid("child element layout must be a table"));
                };
                let mut child = ChildDefinition::default();
                for (child_field, kind) in child_fields {
                    if is_meta_key(&child_field) {
                        continue;
                    }
                    let toml::Value::String(kind) = kind else {
                        return Err(invalid(&format!("child field {child_field} must name a kind")));
                    };
                    child.fields.insert(child_field, ScalarKind::from(kind));
                }
                FieldDefinition::Children(child)
            }
            _ => return Err(invalid("expected a kind string or a child list")),
        };
        definition.fields.insert(field, parsed);
    }
    Ok(definition)
}
