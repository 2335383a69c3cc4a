//! Bounded waits and cancellation.
//!
//! Asserts:
//!   - a metadata table that never becomes ready fails with ReadinessTimeout.
//!   - an interrupt raised before or during a run yields Interrupted.
//!   - the connection is closed on both paths.

use std::time::Duration;

use hz_db::GROUPS_TABLE;
use hz_reconcile::{
    apply, interrupt_channel, save, ApplyOptions, Interrupt, ReconcileError, SaveOptions,
};
use hz_testkit::fixtures::blog_schema;
use hz_testkit::{MemoryDb, Op};

#[tokio::test]
async fn apply_times_out_waiting_for_metadata() {
    let db = MemoryDb::new();
    db.never_ready(GROUPS_TABLE).await;

    let conn = db.connect();
    let opts = ApplyOptions::new("blog").with_ready_timeout(Duration::from_millis(50));
    let err = apply(&conn, &blog_schema(), &opts, &Interrupt::never())
        .await
        .unwrap_err();

    match err {
        ReconcileError::ReadinessTimeout { namespace, waited } => {
            assert_eq!(namespace, "blog_internal");
            assert_eq!(waited, Duration::from_millis(50));
        }
        other => panic!("expected ReadinessTimeout, got {other:?}"),
    }
    assert!(conn.is_closed());
    assert!(!db.has_table("blog", "posts").await);
}

#[tokio::test]
async fn save_times_out_waiting_for_metadata() {
    let db = MemoryDb::new();
    apply(&db.connect(), &blog_schema(), &ApplyOptions::new("blog"), &Interrupt::never())
        .await
        .unwrap();
    db.never_ready(GROUPS_TABLE).await;

    let opts = SaveOptions::new("blog").with_ready_timeout(Duration::from_millis(50));
    let err = save(&db.connect(), &opts, &Interrupt::never())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::ReadinessTimeout { .. }), "{err:?}");
}

#[tokio::test]
async fn interrupt_before_start_touches_nothing() {
    let db = MemoryDb::new();
    let (handle, interrupt) = interrupt_channel();
    handle.raise();

    let conn = db.connect();
    let err = apply(&conn, &blog_schema(), &ApplyOptions::new("blog"), &interrupt)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Interrupted), "{err:?}");
    assert!(conn.is_closed());
    assert!(db.ops().await.is_empty());
}

#[tokio::test]
async fn interrupt_during_wait_stops_the_run() {
    let db = MemoryDb::new();
    db.never_ready(GROUPS_TABLE).await;
    let (handle, interrupt) = interrupt_channel();

    let conn = db.connect();
    let schema = blog_schema();
    let options = ApplyOptions::new("blog");
    let run = apply(&conn, &schema, &options, &interrupt);
    let raise = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.raise();
    };
    let (result, ()) = tokio::join!(run, raise);

    assert!(matches!(result, Err(ReconcileError::Interrupted)), "{result:?}");
    assert!(conn.is_closed());
    assert_eq!(
        db.ops().await,
        vec![Op::InitMetadata {
            project: "blog".to_string()
        }]
    );
}
