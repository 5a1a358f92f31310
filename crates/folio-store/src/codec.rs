use folio_types::{FieldMap, FieldValue, Scalar};

use crate::error::{CodecError, CodecResult};

/// Text format of object files.
pub trait ObjectCodec: Send + Sync {
    /// File extension, without the dot.
    fn extension(&self) -> &'static str;

    fn parse(&self, text: &str) -> CodecResult<FieldMap>;

    /// Serialize `fields`. Absent child slots are dropped, so the written
    /// list is compacted.
    fn stringify(&self, fields: &FieldMap) -> CodecResult<String>;
}

/// TOML object files.
///
/// Arrays of tables map to child lists; arrays of scalars map to scalar
/// lists. A bare nested table is not a valid field value.
#[derive(Clone, Copy, Debug, Default)]
pub struct TomlCodec;

impl ObjectCodec for TomlCodec {
    fn extension(&self) -> &'static str {
        "toml"
    }

    fn parse(&self, text: &str) -> CodecResult<FieldMap> {
        let table: toml::Table = toml::from_str(text).map_err(|e| CodecError::Parse(e.to_string()))?;
        fields_from_table(table)
    }

    fn stringify(&self, fields: &FieldMap) -> CodecResult<String> {
        let table = table_from_fields(fields)?;
        toml::to_string(&table).map_err(|e| CodecError::Serialize(e.to_string()))
    }
}

fn fields_from_table(table: toml::Table) -> CodecResult<FieldMap> {
    table
        .into_iter()
        .map(|(field, value)| {
            let value = value_from_toml(&field, value)?;
            Ok((field, value))
        })
        .collect()
}

fn scalar_from_toml(field: &str, value: toml::Value) -> CodecResult<Scalar> {
    Ok(match value {
        toml::Value::String(s) => Scalar::String(s),
        toml::Value::Integer(i) => Scalar::Integer(i),
        toml::Value::Float(f) if !f.is_finite() => {
            return Err(CodecError::Unsupported {
                field: field.to_string(),
                reason: format!("non-finite float {f}"),
            })
        }
        toml::Value::Float(f) => Scalar::Float(f),
        toml::Value::Boolean(b) => Scalar::Boolean(b),
        toml::Value::Datetime(d) => Scalar::Datetime(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => {
            return Err(CodecError::Unsupported {
                field: field.to_string(),
                reason: "nested arrays and tables are not scalars".into(),
            })
        }
    })
}

fn value_from_toml(field: &str, value: toml::Value) -> CodecResult<FieldValue> {
    match value {
        toml::Value::Array(items) if items.iter().all(toml::Value::is_table) && !items.is_empty() => {
            let children = items
                .into_iter()
                .filter_map(|item| match item {
                    toml::Value::Table(t) => Some(fields_from_table(t).map(Some)),
                    _ => None,
                })
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(FieldValue::Children(children))
        }
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| scalar_from_toml(field, item))
            .collect::<CodecResult<Vec<_>>>()
            .map(FieldValue::List),
        toml::Value::Table(_) => Err(CodecError::Unsupported {
            field: field.to_string(),
            reason: "nested tables are only allowed inside child lists".into(),
        }),
        scalar => scalar_from_toml(field, scalar).map(FieldValue::Scalar),
    }
}

fn scalar_to_toml(scalar: &Scalar) -> toml::Value {
    match scalar {
        Scalar::String(s) => toml::Value::String(s.clone()),
        Scalar::Integer(i) => toml::Value::Integer(*i),
        Scalar::Float(f) => toml::Value::Float(*f),
        Scalar::Boolean(b) => toml::Value::Boolean(*b),
        Scalar::Datetime(s) => s
            .parse::<toml::value::Datetime>()
            .map(toml::Value::Datetime)
            .unwrap_or_else(|_| toml::Value::String(s.clone())),
    }
}

fn table_from_fields(fields: &FieldMap) -> CodecResult<toml::Table> {
    let mut table = toml::Table::new();
    for (field, value) in fields {
        let value = match value {
            FieldValue::Scalar(s) => scalar_to_toml(s),
            FieldValue::List(items) => toml::Value::Array(items.iter().map(scalar_to_toml).collect()),
            FieldValue::Children(children) => toml::Value::Array(
                children
                    .iter()
                    .flatten()
                    .map(|child| table_from_fields(child).map(toml::Value::Table))
                    .collect::<CodecResult<Vec<_>>>()?,
            ),
        };
        table.insert(field.clone(), value);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &str = r#"
title = "Hello"
views = 12
rating = 4.5
draft = false
published = 2024-03-01T10:00:00Z
tags = ["a", "b"]

[[sections]]
heading = "Intro"

[[sections]]
heading = "Body"
"#;

    #[test]
    fn parses_every_value_shape() {
        let fields = TomlCodec.parse(POST).unwrap();
        assert_eq!(fields["title"], FieldValue::string("Hello"));
        assert_eq!(fields["views"], FieldValue::Scalar(Scalar::Integer(12)));
        assert_eq!(fields["rating"], FieldValue::Scalar(Scalar::Float(4.5)));
        assert_eq!(fields["draft"], FieldValue::Scalar(Scalar::Boolean(false)));
        assert_eq!(
            fields["published"],
            FieldValue::Scalar(Scalar::Datetime("2024-03-01T10:00:00Z".into()))
        );
        assert_eq!(fields["tags"], FieldValue::List(vec!["a".into(), "b".into()]));
        let sections = fields["sections"].as_children().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(
            sections[1].as_ref().unwrap()["heading"],
            FieldValue::string("Body")
        );
    }

    #[test]
    fn stringify_then_parse_is_lossless() {
        let fields = TomlCodec.parse(POST).unwrap();
        let text = TomlCodec.stringify(&fields).unwrap();
        assert_eq!(TomlCodec.parse(&text).unwrap(), fields);
    }

    #[test]
    fn holes_are_compacted() {
        let mut child = FieldMap::new();
        child.insert("heading".into(), FieldValue::string("kept"));
        let mut fields = FieldMap::new();
        fields.insert(
            "sections".into(),
            FieldValue::Children(vec![None, Some(child), None]),
        );
        let reparsed = TomlCodec.parse(&TomlCodec.stringify(&fields).unwrap()).unwrap();
        let sections = reparsed["sections"].as_children().unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].is_some());
    }

    #[test]
    fn empty_child_list_reads_back_as_empty_list() {
        let mut fields = FieldMap::new();
        fields.insert("sections".into(), FieldValue::empty_children());
        let reparsed = TomlCodec.parse(&TomlCodec.stringify(&fields).unwrap()).unwrap();
        assert_eq!(reparsed["sections"], FieldValue::List(vec![]));
    }

    #[test]
    fn bare_nested_table_is_rejected() {
        let err = TomlCodec.parse("[meta]\nkey = \"v\"\n").unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { .. }));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        for text in ["rating = inf\n", "rating = nan\n", "[[sections]]\nweight = -inf\n"] {
            let err = TomlCodec.parse(text).unwrap_err();
            assert!(matches!(err, CodecError::Unsupported { .. }), "{text}: {err:?}");
        }
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        assert!(matches!(
            TomlCodec.parse("title = "),
            Err(CodecError::Parse(_))
        ));
    }
}
