//! Editing a schema and re-applying it in Replace mode.
//!
//! Asserts:
//!   - the live state converges to the edited schema (tables, indexes, groups).
//!   - a later save from a fresh connection reads back exactly the edited schema.

use hz_db::{internal_namespace, GROUPS_TABLE};
use hz_reconcile::{apply, save, ApplyOptions, Interrupt, SaveOptions};
use hz_schema::{Collection, Group, Rule, Schema};
use hz_testkit::fixtures::shop_schema;
use hz_testkit::MemoryDb;

fn edited_shop() -> Schema {
    Schema::new()
        .with_collection(Collection::new("orders", ["customer_placedAt", "total"]))
        .with_collection(Collection::new("products", ["sku"]))
        .with_group(
            Group::new("admin")
                .with_rule("anything", Rule::new("any()"))
                .with_rule(
                    "write_products",
                    Rule::new("collection('products').store(any())")
                        .with_validator("newValue.price > 0"),
                ),
        )
}

#[tokio::test]
async fn forced_replace_converges_to_edited_schema() -> anyhow::Result<()> {
    let db = MemoryDb::new();
    apply(&db.connect(), &shop_schema(), &ApplyOptions::new("shop"), &Interrupt::never()).await?;

    let opts = ApplyOptions::new("shop").with_force(true);
    let report = apply(&db.connect(), &edited_shop(), &opts, &Interrupt::never()).await?;

    assert_eq!(report.collections_removed, vec!["carts"]);
    assert_eq!(report.groups_deleted, vec!["guest"]);
    let created: Vec<String> = report.indexes_created.iter().map(|i| i.to_string()).collect();
    let dropped: Vec<String> = report.indexes_dropped.iter().map(|i| i.to_string()).collect();
    assert_eq!(created, vec!["orders.total"]);
    assert_eq!(dropped, vec!["orders.status"]);

    assert!(!db.has_table("shop", "carts").await);
    let orders = db.indexes("shop", "orders").await;
    assert_eq!(
        orders.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["customer_placedAt", "total"]
    );
    assert_eq!(orders["customer_placedAt"], vec!["customer", "placedAt"]);
    assert!(db
        .record(&internal_namespace("shop"), GROUPS_TABLE, "guest")
        .await
        .is_none());

    let saved = save(&db.connect(), &SaveOptions::new("shop"), &Interrupt::never()).await?;
    assert_eq!(saved, edited_shop());
    Ok(())
}
