//! Pure diffs between a desired [`Schema`] and live state.
//!
//! Nothing here touches the database; results are sorted so that the engine
//! issues writes in a stable order.

use std::collections::{BTreeMap, BTreeSet};

use hz_schema::{name_to_fields, Group, IndexNameError, Schema};

/// Decoded field lists, keyed by collection id then index name.
pub type IndexFields = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Live collection ids the schema does not declare.
pub fn obsolete_collections<'a>(
    live: impl IntoIterator<Item = &'a str>,
    desired: &Schema,
) -> Vec<String> {
    obsolete(live, &desired.collections)
}

/// Live group ids the schema does not declare.
pub fn obsolete_groups<'a>(live: impl IntoIterator<Item = &'a str>, desired: &Schema) -> Vec<String> {
    obsolete(live, &desired.groups)
}

fn obsolete<'a, V>(live: impl IntoIterator<Item = &'a str>, desired: &BTreeMap<String, V>) -> Vec<String> {
    let out: BTreeSet<String> = live
        .into_iter()
        .filter(|id| !desired.contains_key(*id))
        .map(str::to_string)
        .collect();
    out.into_iter().collect()
}

/// Incremental merge of one group: rules present in `desired` overwrite the
/// live rule of the same name wholesale; other live rules are kept.
pub fn merge_group(live: &Group, desired: &Group) -> Group {
    let mut merged = live.clone();
    merged.id = desired.id.clone();
    merged
        .rules
        .extend(desired.rules.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Decode every declared index name into its field list.
///
/// Fails on the first undecodable name so that no index is created when any
/// name in the schema is invalid.
pub fn index_fields(schema: &Schema) -> Result<IndexFields, IndexNameError> {
    let mut out = IndexFields::new();
    for (id, collection) in &schema.collections {
        let mut per = BTreeMap::new();
        for name in &collection.indexes {
            per.insert(name.clone(), name_to_fields(name)?);
        }
        out.insert(id.clone(), per);
    }
    Ok(out)
}

/// Declared indexes that are not live, with their decoded fields.
pub fn missing_indexes<'a>(
    declared: &'a BTreeMap<String, Vec<String>>,
    live: &[String],
) -> Vec<(&'a str, &'a [String])> {
    declared
        .iter()
        .filter(|(name, _)| !live.contains(*name))
        .map(|(name, fields)| (name.as_str(), fields.as_slice()))
        .collect()
}

/// Live indexes that are not declared.
pub fn undeclared_indexes(declared: &BTreeSet<String>, live: &[String]) -> Vec<String> {
    let out: BTreeSet<&String> = live.iter().filter(|name| !declared.contains(*name)).collect();
    out.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hz_schema::{Collection, Rule};

    fn schema() -> Schema {
        Schema::new()
            .with_collection(Collection::new("posts", ["byDate", "author_date"]))
            .with_collection(Collection::new("users", Vec::<String>::new()))
            .with_group(Group::new("admin").with_rule("all", Rule::new("any()")))
    }

    #[test]
    fn obsolete_collections_are_sorted_and_deduped() {
        let live = ["zeta", "posts", "alpha", "zeta"];
        assert_eq!(obsolete_collections(live, &schema()), vec!["alpha", "zeta"]);
    }

    #[test]
    fn obsolete_groups_ignores_declared() {
        assert_eq!(obsolete_groups(["admin", "guest"], &schema()), vec!["guest"]);
        assert!(obsolete_groups(["admin"], &schema()).is_empty());
    }

    #[test]
    fn merge_group_overwrites_named_rules_only() {
        let live = Group::new("g")
            .with_rule("a", Rule::new("1").with_validator("v"))
            .with_rule("b", Rule::new("2"));
        let desired = Group::new("g").with_rule("a", Rule::new("3"));

        let merged = merge_group(&live, &desired);
        assert_eq!(merged.rules["a"], Rule::new("3"));
        assert_eq!(merged.rules["b"], Rule::new("2"));
    }

    #[test]
    fn merge_group_is_identity_when_already_converged() {
        let live = Group::new("g").with_rule("a", Rule::new("1"));
        assert_eq!(merge_group(&live, &live.clone()), live);
    }

    #[test]
    fn index_fields_decodes_composites() {
        let fields = index_fields(&schema()).unwrap();
        assert_eq!(fields["posts"]["author_date"], vec!["author", "date"]);
        assert_eq!(fields["posts"]["byDate"], vec!["byDate"]);
        assert!(fields["users"].is_empty());
    }

    #[test]
    fn index_fields_rejects_any_bad_name() {
        let bad = schema().with_collection(Collection::new("c", ["ok", "a__b"]));
        assert!(index_fields(&bad).is_err());
    }

    #[test]
    fn index_diffs() {
        let schema = Schema::new().with_collection(Collection::new("c", ["a", "b_c"]));
        let fields = index_fields(&schema).unwrap();
        let live = vec!["a".to_string(), "z".to_string()];

        let missing = missing_indexes(&fields["c"], &live);
        assert_eq!(missing, vec![("b_c", &["b".to_string(), "c".to_string()][..])]);
        assert_eq!(
            undeclared_indexes(&schema.collections["c"].indexes, &live),
            vec!["z"]
        );
    }
}
