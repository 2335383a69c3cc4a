use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use hz_db::{
    document_id, internal_namespace, Conflict, Connection, DbResult, Readiness, WriteOptions,
    WriteSummary, COLLECTIONS_TABLE, GROUPS_TABLE,
};
use hz_schema::{Collection, Group, Schema};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Cause, ReconcileError, WriteFailure};
use crate::interrupt::Interrupt;
use crate::plan::{self, IndexFields};
use crate::report::{ApplyReport, IndexRef};

/// Upper bound on each metadata readiness wait.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Add and update only. Nothing live is ever removed.
    Update,
    /// Converge exactly: also remove what the schema does not declare.
    #[default]
    Replace,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub project: String,
    pub mode: Mode,
    /// Allow Replace mode to remove live collections (and their data).
    pub force: bool,
    pub ready_timeout: Duration,
}

impl ApplyOptions {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            mode: Mode::default(),
            force: false,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub project: String,
    pub ready_timeout: Duration,
}

impl SaveOptions {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Converge the live database to `schema`.
///
/// Steps run in order and each completes before the next starts:
/// metadata bootstrap, readiness, removal guard, groups, collections,
/// obsolete collections, index name decoding, index creation, index removal.
/// The connection is closed on every exit path.
pub async fn apply<C>(
    conn: &C,
    schema: &Schema,
    opts: &ApplyOptions,
    interrupt: &Interrupt,
) -> Result<ApplyReport, ReconcileError>
where
    C: Connection + ?Sized,
{
    let run = ApplyRun {
        conn,
        schema,
        opts,
        interrupt,
        internal: internal_namespace(&opts.project),
        report: ApplyReport::default(),
    };
    let out = run.execute().await;
    close_quietly(conn).await;
    out
}

/// Read the live database back as a [`Schema`]. Live records are trusted and
/// not re-validated. The connection is closed before this returns.
pub async fn save<C>(conn: &C, opts: &SaveOptions, interrupt: &Interrupt) -> Result<Schema, ReconcileError>
where
    C: Connection + ?Sized,
{
    let out = read_schema(conn, opts, interrupt).await;
    close_quietly(conn).await;
    out
}

struct ApplyRun<'a, C: ?Sized> {
    conn: &'a C,
    schema: &'a Schema,
    opts: &'a ApplyOptions,
    interrupt: &'a Interrupt,
    internal: String,
    report: ApplyReport,
}

impl<'a, C> ApplyRun<'a, C>
where
    C: Connection + ?Sized,
{
    async fn execute(mut self) -> Result<ApplyReport, ReconcileError> {
        let opts = self.opts;
        info!(
            project = %opts.project,
            mode = ?opts.mode,
            force = opts.force,
            collections = self.schema.collections.len(),
            groups = self.schema.groups.len(),
            "apply started"
        );

        self.report.metadata_created = guarded(self.interrupt, self.conn.init_metadata(&opts.project))
            .await?
            .map_err(|e| ReconcileError::write(format!("metadata in {}", self.internal), e))?;
        debug!(created = self.report.metadata_created, "metadata bootstrap done");

        wait_metadata(
            self.conn,
            &self.internal,
            Readiness::Writes,
            opts.ready_timeout,
            self.interrupt,
        )
        .await?;

        let obsolete = self.guard_removals().await?;

        match opts.mode {
            Mode::Update => self.merge_groups().await?,
            Mode::Replace => self.replace_groups().await?,
        }

        self.materialize_collections().await?;
        self.remove_collections(&obsolete).await?;

        let fields = plan::index_fields(self.schema)?;
        self.report.indexes_created = self.create_indexes(&fields).await?;
        if opts.mode == Mode::Replace {
            self.report.indexes_dropped = self.drop_indexes().await?;
        }

        self.report.normalize();
        info!(project = %opts.project, noop = self.report.is_noop(), "apply finished");
        Ok(self.report)
    }

    /// Obsolete collections in Replace mode; refuses them unless forced.
    async fn guard_removals(&self) -> Result<Vec<String>, ReconcileError> {
        if self.opts.mode == Mode::Update {
            return Ok(Vec::new());
        }
        let records = guarded(self.interrupt, self.conn.list(&self.internal, COLLECTIONS_TABLE))
            .await?
            .map_err(|e| ReconcileError::read("collection records", e))?;
        let live = records
            .iter()
            .map(document_id)
            .collect::<DbResult<Vec<_>>>()
            .map_err(|e| ReconcileError::read("collection records", e))?;

        let obsolete = plan::obsolete_collections(live, self.schema);
        if !obsolete.is_empty() && !self.opts.force {
            warn!(collections = ?obsolete, "obsolete collections present and force not set");
            return Err(ReconcileError::DestructiveChange {
                collections: obsolete,
            });
        }
        Ok(obsolete)
    }

    async fn merge_groups(&mut self) -> Result<(), ReconcileError> {
        let (conn, schema) = (self.conn, self.schema);
        for group in schema.groups.values() {
            let entity = format!("group {}", group.id);
            let live = guarded(self.interrupt, conn.get(&self.internal, GROUPS_TABLE, &group.id))
                .await?
                .map_err(|e| ReconcileError::read(&entity, e))?;

            let Some(live) = live else {
                let record = group_record(group)?;
                let opts = WriteOptions::new(Conflict::Error);
                let written = guarded(
                    self.interrupt,
                    conn.insert(&self.internal, GROUPS_TABLE, vec![record], opts),
                )
                .await?;
                checked(&entity, written)?;
                info!(group = %group.id, "group inserted");
                self.report.groups_inserted.push(group.id.clone());
                continue;
            };

            let live: Group =
                serde_json::from_value(live).map_err(|e| ReconcileError::read(&entity, e))?;
            let merged = plan::merge_group(&live, group);
            if merged == live {
                debug!(group = %group.id, "group unchanged");
                continue;
            }
            let written = guarded(
                self.interrupt,
                conn.replace(&self.internal, GROUPS_TABLE, group_record(&merged)?),
            )
            .await?;
            checked(&entity, written)?;
            info!(group = %group.id, rules = group.rules.len(), "group rules merged");
            self.report.groups_updated.push(group.id.clone());
        }
        Ok(())
    }

    async fn replace_groups(&mut self) -> Result<(), ReconcileError> {
        let (conn, schema, internal) = (self.conn, self.schema, self.internal.as_str());
        let records = guarded(self.interrupt, conn.list(internal, GROUPS_TABLE))
            .await?
            .map_err(|e| ReconcileError::read("group records", e))?;
        let live = records
            .iter()
            .map(document_id)
            .collect::<DbResult<Vec<_>>>()
            .map_err(|e| ReconcileError::read("group records", e))?;
        let obsolete = plan::obsolete_groups(live, schema);

        // Disjoint record sets: deletes and upserts may interleave.
        let deletes = async {
            let mut deleted = Vec::new();
            for id in &obsolete {
                let entity = format!("group {id}");
                let summary = checked(&entity, conn.delete(internal, GROUPS_TABLE, id, false).await)?;
                if summary.deleted > 0 {
                    info!(group = %id, "group deleted");
                    deleted.push(id.clone());
                }
            }
            Ok::<_, ReconcileError>(deleted)
        };
        let upserts = async {
            let (mut inserted, mut replaced) = (Vec::new(), Vec::new());
            for group in schema.groups.values() {
                let entity = format!("group {}", group.id);
                let record = group_record(group)?;
                let summary = checked(&entity, conn.replace(internal, GROUPS_TABLE, record).await)?;
                if summary.inserted > 0 {
                    info!(group = %group.id, "group inserted");
                    inserted.push(group.id.clone());
                } else if summary.replaced > 0 {
                    info!(group = %group.id, "group replaced");
                    replaced.push(group.id.clone());
                }
            }
            Ok::<_, ReconcileError>((inserted, replaced))
        };

        let (deleted, upserted) = guarded(self.interrupt, async { tokio::join!(deletes, upserts) }).await?;
        self.report.groups_deleted = deleted?;
        let (inserted, replaced) = upserted?;
        self.report.groups_inserted = inserted;
        self.report.groups_updated = replaced;
        Ok(())
    }

    async fn materialize_collections(&mut self) -> Result<(), ReconcileError> {
        let (conn, schema) = (self.conn, self.schema);
        for id in schema.collections.keys() {
            let entity = format!("collection {id}");
            let created = guarded(self.interrupt, conn.table_create(&self.opts.project, id))
                .await?
                .map_err(|e| ReconcileError::write(&entity, e))?;
            if created {
                info!(collection = %id, "table created");
                self.report.tables_created.push(id.clone());
            }

            let opts = WriteOptions::new(Conflict::Update);
            let written = guarded(
                self.interrupt,
                conn.insert(&self.internal, COLLECTIONS_TABLE, vec![json!({ "id": id })], opts),
            )
            .await?;
            if checked(&entity, written)?.inserted > 0 {
                self.report.collection_records_created.push(id.clone());
            }
        }
        Ok(())
    }

    async fn remove_collections(&mut self, obsolete: &[String]) -> Result<(), ReconcileError> {
        let conn = self.conn;
        for id in obsolete {
            let entity = format!("collection {id}");
            let written = guarded(
                self.interrupt,
                conn.delete(&self.internal, COLLECTIONS_TABLE, id, true),
            )
            .await?;
            if checked(&entity, written)?.deleted == 0 {
                // Removed concurrently by someone else; their run owns the table.
                debug!(collection = %id, "metadata record already gone, table kept");
                continue;
            }
            guarded(self.interrupt, conn.table_drop(&self.opts.project, id))
                .await?
                .map_err(|e| ReconcileError::write(&entity, e))?;
            info!(collection = %id, "collection removed");
            self.report.collections_removed.push(id.clone());
        }
        Ok(())
    }

    async fn create_indexes(&self, fields: &IndexFields) -> Result<Vec<IndexRef>, ReconcileError> {
        let batch = fields
            .iter()
            .map(|(collection, declared)| self.create_indexes_on(collection, declared));
        let results = guarded(self.interrupt, join_all(batch)).await?;
        collect_batch(results)
    }

    async fn create_indexes_on(
        &self,
        collection: &str,
        declared: &BTreeMap<String, Vec<String>>,
    ) -> (Vec<IndexRef>, Vec<WriteFailure>) {
        let project = self.opts.project.as_str();
        let live = match self.conn.index_list(project, collection).await {
            Ok(live) => live,
            Err(e) => return (Vec::new(), vec![failure(format!("collection {collection}"), e)]),
        };

        let (mut created, mut failures) = (Vec::new(), Vec::new());
        for (name, index_fields) in plan::missing_indexes(declared, &live) {
            let index = IndexRef::new(collection, name);
            match self.conn.index_create(project, collection, name, index_fields).await {
                Ok(()) => {
                    info!(index = %index, fields = ?index_fields, "index created");
                    created.push(index);
                }
                Err(e) => failures.push(failure(index.to_string(), e)),
            }
        }
        (created, failures)
    }

    async fn drop_indexes(&self) -> Result<Vec<IndexRef>, ReconcileError> {
        let batch = self
            .schema
            .collections
            .values()
            .map(|collection| self.drop_indexes_on(collection));
        let results = guarded(self.interrupt, join_all(batch)).await?;
        collect_batch(results)
    }

    async fn drop_indexes_on(&self, collection: &Collection) -> (Vec<IndexRef>, Vec<WriteFailure>) {
        let project = self.opts.project.as_str();
        let id = collection.id.as_str();
        let live = match self.conn.index_list(project, id).await {
            Ok(live) => live,
            Err(e) => return (Vec::new(), vec![failure(format!("collection {id}"), e)]),
        };

        let (mut dropped, mut failures) = (Vec::new(), Vec::new());
        for name in plan::undeclared_indexes(&collection.indexes, &live) {
            let index = IndexRef::new(id, name);
            match self.conn.index_drop(project, id, &index.index).await {
                Ok(()) => {
                    info!(index = %index, "index dropped");
                    dropped.push(index);
                }
                Err(e) => failures.push(failure(index.to_string(), e)),
            }
        }
        (dropped, failures)
    }
}

async fn read_schema<C>(conn: &C, opts: &SaveOptions, interrupt: &Interrupt) -> Result<Schema, ReconcileError>
where
    C: Connection + ?Sized,
{
    let internal = internal_namespace(&opts.project);
    wait_metadata(conn, &internal, Readiness::Reads, opts.ready_timeout, interrupt).await?;

    let mut schema = Schema::new();
    let records = guarded(interrupt, conn.list(&internal, COLLECTIONS_TABLE))
        .await?
        .map_err(|e| ReconcileError::read("collection records", e))?;
    for record in &records {
        let id = document_id(record).map_err(|e| ReconcileError::read("collection records", e))?;
        let indexes = guarded(interrupt, conn.index_list(&opts.project, id))
            .await?
            .map_err(|e| ReconcileError::read(format!("indexes of {id}"), e))?;
        schema = schema.with_collection(Collection::new(id, indexes));
    }

    let records = guarded(interrupt, conn.list(&internal, GROUPS_TABLE))
        .await?
        .map_err(|e| ReconcileError::read("group records", e))?;
    for record in records {
        let what = match record.get("id").and_then(Value::as_str) {
            Some(id) => format!("group {id}"),
            None => "group record".to_string(),
        };
        let group: Group = serde_json::from_value(record).map_err(|e| ReconcileError::read(what, e))?;
        schema = schema.with_group(group);
    }

    info!(
        project = %opts.project,
        collections = schema.collections.len(),
        groups = schema.groups.len(),
        "live schema read"
    );
    Ok(schema)
}

/// Wait for both metadata tables, bounded by `limit` overall.
async fn wait_metadata<C>(
    conn: &C,
    internal: &str,
    readiness: Readiness,
    limit: Duration,
    interrupt: &Interrupt,
) -> Result<(), ReconcileError>
where
    C: Connection + ?Sized,
{
    let both = async {
        conn.wait_ready(internal, COLLECTIONS_TABLE, readiness).await?;
        conn.wait_ready(internal, GROUPS_TABLE, readiness).await
    };
    match guarded(interrupt, tokio::time::timeout(limit, both)).await? {
        Ok(Ok(())) => {
            debug!(namespace = internal, ?readiness, "metadata tables ready");
            Ok(())
        }
        Ok(Err(e)) => Err(ReconcileError::read(format!("readiness of {internal}"), e)),
        Err(_) => Err(ReconcileError::ReadinessTimeout {
            namespace: internal.to_string(),
            waited: limit,
        }),
    }
}

/// Race `fut` against the interrupt. Dropping `fut` abandons the operation.
async fn guarded<F: Future>(interrupt: &Interrupt, fut: F) -> Result<F::Output, ReconcileError> {
    if interrupt.is_raised() {
        return Err(ReconcileError::Interrupted);
    }
    tokio::select! {
        biased;
        _ = interrupt.raised() => Err(ReconcileError::Interrupted),
        out = fut => Ok(out),
    }
}

async fn close_quietly<C: Connection + ?Sized>(conn: &C) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "closing connection failed");
    }
}

/// A write succeeds only when the call succeeded and no record was refused.
fn checked(entity: &str, written: DbResult<WriteSummary>) -> Result<WriteSummary, ReconcileError> {
    let summary = written.map_err(|e| ReconcileError::write(entity, e))?;
    if summary.is_ok() {
        return Ok(summary);
    }
    let message = summary
        .first_error
        .unwrap_or_else(|| format!("{} record(s) refused", summary.errors));
    Err(ReconcileError::write(entity, Cause::Rejected(message)))
}

fn group_record(group: &Group) -> Result<Value, ReconcileError> {
    serde_json::to_value(group).map_err(|e| ReconcileError::write(format!("group {}", group.id), e))
}

fn failure(entity: String, cause: impl Into<Cause>) -> WriteFailure {
    WriteFailure {
        entity,
        cause: cause.into(),
    }
}

fn collect_batch(
    results: Vec<(Vec<IndexRef>, Vec<WriteFailure>)>,
) -> Result<Vec<IndexRef>, ReconcileError> {
    let (mut done, mut failures) = (Vec::new(), Vec::new());
    for (ok, failed) in results {
        done.extend(ok);
        failures.extend(failed);
    }
    if failures.is_empty() {
        Ok(done)
    } else {
        warn!(failed = failures.len(), "index batch failed");
        Err(ReconcileError::IndexWrites { failures })
    }
}
