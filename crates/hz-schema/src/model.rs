use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Collection names with this prefix belong to the metadata layer.
pub const RESERVED_PREFIX: &str = "hz_";

/// Longest collection name in bytes. Collections become tables, and the
/// backing store truncates longer table names.
pub const MAX_COLLECTION_NAME_BYTES: usize = 63;

/// A collection and the secondary indexes declared on its table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    /// Index names are opaque identifiers: two names that decode to the same
    /// fields are still two indexes.
    pub indexes: BTreeSet<String>,
}

impl Collection {
    pub fn new<I, S>(id: impl Into<String>, indexes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            indexes: indexes.into_iter().map(Into::into).collect(),
        }
    }
}

/// One authorization rule. Replaced as a unit, never field by field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

impl Rule {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = Some(validator.into());
        self
    }
}

/// A named bundle of rules. Serializes to the group metadata record shape:
/// `{"id": .., "rules": {..}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
}

impl Group {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.rules.insert(name.into(), rule);
        self
    }
}

/// Desired (or exported live) schema.
///
/// Keyed by identifier, so uniqueness holds by construction and iteration is
/// sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    pub collections: BTreeMap<String, Collection>,
    pub groups: BTreeMap<String, Group>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collections.insert(collection.id.clone(), collection);
        self
    }

    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.insert(group.id.clone(), group);
        self
    }

    pub fn collection_ids(&self) -> BTreeSet<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn group_ids(&self) -> BTreeSet<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.groups.is_empty()
    }
}
