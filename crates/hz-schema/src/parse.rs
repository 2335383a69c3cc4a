use std::collections::BTreeMap;

use serde::Deserialize;
use toml::{Table, Value};

use crate::error::SchemaValidationError;
use crate::model::{Collection, Group, Rule, Schema, MAX_COLLECTION_NAME_BYTES, RESERVED_PREFIX};
use crate::shape::{self, DOCUMENT_PATH};

#[derive(Deserialize)]
struct RawSchema {
    collections: BTreeMap<String, RawCollection>,
    groups: BTreeMap<String, RawGroup>,
}

#[derive(Deserialize)]
struct RawCollection {
    indexes: Vec<String>,
}

#[derive(Deserialize)]
struct RawGroup {
    rules: BTreeMap<String, Rule>,
}

/// Parse and validate a desired-schema document.
///
/// Fails before anything else happens; callers must not touch the database
/// until this returns `Ok`.
pub fn parse(text: &str) -> Result<Schema, SchemaValidationError> {
    let doc = text
        .parse::<Table>()
        .map_err(|e: toml::de::Error| SchemaValidationError::new(DOCUMENT_PATH, e.message()))?;

    let normalized = shape::desired_schema().validate(&Value::Table(doc), "")?;

    let raw = normalized
        .try_into::<RawSchema>()
        .map_err(|e: toml::de::Error| SchemaValidationError::new(DOCUMENT_PATH, e.message()))?;

    let mut schema = Schema::new();

    for (id, c) in raw.collections {
        if id.starts_with(RESERVED_PREFIX) {
            return Err(SchemaValidationError::new(
                format!("collections.{id}"),
                format!("collection names starting with `{RESERVED_PREFIX}` are reserved"),
            ));
        }
        if id.len() > MAX_COLLECTION_NAME_BYTES {
            return Err(SchemaValidationError::new(
                format!("collections.{id}"),
                format!(
                    "collection name is {} bytes; the limit is {MAX_COLLECTION_NAME_BYTES}",
                    id.len()
                ),
            ));
        }
        schema = schema.with_collection(Collection::new(id, c.indexes));
    }

    for (id, g) in raw.groups {
        // An empty validator means "no validator".
        let rules = g
            .rules
            .into_iter()
            .map(|(name, mut rule)| {
                rule.validator = rule.validator.filter(|v| !v.is_empty());
                (name, rule)
            })
            .collect();
        schema = schema.with_group(Group { id, rules });
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_empty_schema() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn names_become_ids() {
        let s = parse(
            r#"
[collections.posts]
indexes = ["byDate", "author_date"]

[groups.default.rules.everyone]
template = "true"
validator = "v"
"#,
        )
        .unwrap();

        let posts = &s.collections["posts"];
        assert_eq!(posts.id, "posts");
        assert_eq!(posts.indexes.len(), 2);

        let g = &s.groups["default"];
        assert_eq!(g.id, "default");
        assert_eq!(
            g.rules["everyone"],
            Rule::new("true").with_validator("v")
        );
    }

    #[test]
    fn syntax_error_is_validation_error() {
        let err = parse("[collections.posts\n").unwrap_err();
        assert_eq!(err.path, DOCUMENT_PATH);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = parse("[collections.posts]\n[collections.posts]\n").unwrap_err();
        assert_eq!(err.path, DOCUMENT_PATH);
    }

    #[test]
    fn reserved_collection_name_rejected() {
        let err = parse("[collections.hz_collections]\n").unwrap_err();
        assert_eq!(err.path, "collections.hz_collections");
    }

    #[test]
    fn collection_names_past_the_table_name_limit_rejected() {
        let longest = "c".repeat(MAX_COLLECTION_NAME_BYTES);
        assert!(parse(&format!("[collections.{longest}]\n")).is_ok());

        let too_long = format!("{longest}_alpha");
        let err = parse(&format!("[collections.{too_long}]\n")).unwrap_err();
        assert_eq!(err.path, format!("collections.{too_long}"));
        assert!(err.message.contains("limit is 63"), "{}", err.message);
    }

    #[test]
    fn empty_validator_is_no_validator() {
        let s = parse("[groups.g.rules.r]\ntemplate = \"true\"\nvalidator = \"\"\n").unwrap();
        assert_eq!(s.groups["g"].rules["r"], Rule::new("true"));
        assert_eq!(parse(&crate::render(&s)).unwrap(), s);
    }
}
