//! Schemas and documents shared by scenario tests.

use hz_schema::{Collection, Group, Rule, Schema};

/// The smallest useful project: one indexed collection, one permissive group.
pub const BLOG_DOCUMENT: &str = r#"
[collections.posts]
indexes = ["byDate"]

[groups.default.rules.everyone]
template = "true"
"#;

pub fn blog_schema() -> Schema {
    Schema::new()
        .with_collection(Collection::new("posts", ["byDate"]))
        .with_group(Group::new("default").with_rule("everyone", Rule::new("true")))
}

/// Several collections, a composite index and groups with validators.
pub fn shop_schema() -> Schema {
    Schema::new()
        .with_collection(Collection::new("orders", ["customer_placedAt", "status"]))
        .with_collection(Collection::new("products", ["sku"]))
        .with_collection(Collection::new("carts", Vec::<String>::new()))
        .with_group(
            Group::new("admin")
                .with_rule("anything", Rule::new("any()"))
                .with_rule(
                    "write_products",
                    Rule::new("collection('products').store(any())")
                        .with_validator("newValue.price > 0"),
                ),
        )
        .with_group(Group::new("guest"))
}
