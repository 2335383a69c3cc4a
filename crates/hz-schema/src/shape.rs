//! Declarative shape descriptions and the recursive validator that checks a
//! parsed TOML value against them.
//!
//! The validator returns a normalized copy of the input with defaults filled,
//! or the first violation with its dotted path.

use toml::{Table, Value};

use crate::error::SchemaValidationError;

pub(crate) const DOCUMENT_PATH: &str = "<document>";

#[derive(Debug, Clone)]
pub(crate) enum Shape {
    /// Fixed-key table; keys not listed are rejected.
    Table(Vec<Field>),
    /// Free-key table: keys are data, every value has the inner shape.
    Map(Box<Shape>),
    Array(Box<Shape>),
    String { non_empty: bool },
}

#[derive(Debug, Clone)]
pub(crate) enum Presence {
    Required,
    Optional,
    Default(Value),
}

#[derive(Debug, Clone)]
pub(crate) struct Field {
    key: &'static str,
    shape: Shape,
    presence: Presence,
}

impl Field {
    pub(crate) fn required(key: &'static str, shape: Shape) -> Self {
        Self {
            key,
            shape,
            presence: Presence::Required,
        }
    }

    pub(crate) fn optional(key: &'static str, shape: Shape) -> Self {
        Self {
            key,
            shape,
            presence: Presence::Optional,
        }
    }

    pub(crate) fn with_default(key: &'static str, shape: Shape, default: Value) -> Self {
        Self {
            key,
            shape,
            presence: Presence::Default(default),
        }
    }
}

impl Shape {
    pub(crate) fn map(inner: Shape) -> Self {
        Shape::Map(Box::new(inner))
    }

    pub(crate) fn array(inner: Shape) -> Self {
        Shape::Array(Box::new(inner))
    }

    pub(crate) fn validate(&self, value: &Value, path: &str) -> Result<Value, SchemaValidationError> {
        match self {
            Shape::Table(fields) => {
                let table = expect_table(value, path)?;

                for key in table.keys() {
                    if !fields.iter().any(|f| f.key == key) {
                        return Err(SchemaValidationError::new(
                            join(path, key),
                            format!("unknown key `{key}`"),
                        ));
                    }
                }

                let mut out = Table::new();
                for field in fields {
                    let field_path = join(path, field.key);
                    match (table.get(field.key), &field.presence) {
                        (Some(v), _) => {
                            out.insert(field.key.to_string(), field.shape.validate(v, &field_path)?);
                        }
                        (None, Presence::Required) => {
                            return Err(SchemaValidationError::new(
                                field_path,
                                "required key is missing",
                            ));
                        }
                        (None, Presence::Optional) => {}
                        (None, Presence::Default(d)) => {
                            out.insert(field.key.to_string(), d.clone());
                        }
                    }
                }
                Ok(Value::Table(out))
            }

            Shape::Map(inner) => {
                let table = expect_table(value, path)?;
                let mut out = Table::new();
                for (key, v) in table {
                    out.insert(key.clone(), inner.validate(v, &join(path, key))?);
                }
                Ok(Value::Table(out))
            }

            Shape::Array(inner) => {
                let items = value.as_array().ok_or_else(|| {
                    SchemaValidationError::new(
                        display_path(path),
                        format!("expected an array, found {}", value.type_str()),
                    )
                })?;
                let mut out = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    out.push(inner.validate(v, &format!("{}[{i}]", display_path(path)))?);
                }
                Ok(Value::Array(out))
            }

            Shape::String { non_empty } => match value {
                Value::String(s) if *non_empty && s.is_empty() => Err(SchemaValidationError::new(
                    display_path(path),
                    "must be a non-empty string",
                )),
                Value::String(_) => Ok(value.clone()),
                other => Err(SchemaValidationError::new(
                    display_path(path),
                    format!("expected a string, found {}", other.type_str()),
                )),
            },
        }
    }
}

/// Shape of the desired-schema document.
pub(crate) fn desired_schema() -> Shape {
    let empty_table = || Value::Table(Table::new());

    let collection = Shape::Table(vec![Field::with_default(
        "indexes",
        Shape::array(Shape::String { non_empty: true }),
        Value::Array(Vec::new()),
    )]);

    let rule = Shape::Table(vec![
        Field::required("template", Shape::String { non_empty: true }),
        Field::optional("validator", Shape::String { non_empty: false }),
    ]);

    let group = Shape::Table(vec![Field::with_default(
        "rules",
        Shape::map(rule),
        empty_table(),
    )]);

    Shape::Table(vec![
        Field::with_default("collections", Shape::map(collection), empty_table()),
        Field::with_default("groups", Shape::map(group), empty_table()),
    ])
}

fn expect_table<'a>(value: &'a Value, path: &str) -> Result<&'a Table, SchemaValidationError> {
    value.as_table().ok_or_else(|| {
        SchemaValidationError::new(
            display_path(path),
            format!("expected a table, found {}", value.type_str()),
        )
    })
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        DOCUMENT_PATH.to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str) -> Result<Value, SchemaValidationError> {
        let doc: Table = text.parse().unwrap();
        desired_schema().validate(&Value::Table(doc), "")
    }

    #[test]
    fn fills_defaults() {
        let v = check("[collections.posts]\n[groups.admin]\n").unwrap();
        assert_eq!(
            v["collections"]["posts"]["indexes"],
            Value::Array(Vec::new())
        );
        assert!(v["groups"]["admin"]["rules"].as_table().unwrap().is_empty());
    }

    #[test]
    fn reports_nested_path() {
        let err = check("[groups.admin.rules.read]\nvalidator = \"x\"\n").unwrap_err();
        assert_eq!(err.path, "groups.admin.rules.read.template");
    }

    #[test]
    fn reports_array_element_path() {
        let err = check("[collections.posts]\nindexes = [\"a\", \"\"]\n").unwrap_err();
        assert_eq!(err.path, "collections.posts.indexes[1]");
    }

    #[test]
    fn rejects_wrong_type() {
        let err = check("collections = 3\n").unwrap_err();
        assert_eq!(err.path, "collections");
        assert!(err.message.contains("expected a table"));
    }
}
