//! In-memory document database.
//!
//! Namespaces hold tables; a table holds records keyed by `id` plus named
//! composite indexes. Semantics follow the Postgres connection: missing tables
//! are errors, inserts report per-record outcomes, and a closed connection
//! refuses every call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hz_db::{
    document_id, internal_namespace, merge_documents, Change, Conflict, Connection, DbError,
    DbResult, Readiness, WriteOptions, WriteSummary, COLLECTIONS_TABLE, GROUPS_TABLE,
};
use serde_json::Value;
use tokio::sync::RwLock;

/// One table: records by id and index name -> fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub records: BTreeMap<String, Value>,
    pub indexes: BTreeMap<String, Vec<String>>,
}

/// A mutating call, in the order it reached the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    InitMetadata { project: String },
    TableCreate { namespace: String, table: String },
    TableDrop { namespace: String, table: String },
    IndexCreate { namespace: String, table: String, name: String },
    IndexDrop { namespace: String, table: String, name: String },
    Insert { namespace: String, table: String, ids: Vec<String> },
    Delete { namespace: String, table: String, id: String },
}

#[derive(Debug, Default)]
struct Faults {
    /// `table` never becomes ready.
    never_ready: BTreeSet<String>,
    /// `(table, index)` creations fail.
    failing_indexes: BTreeSet<(String, String)>,
    /// `(table, id)` records are refused by inserts.
    refused_records: BTreeSet<(String, String)>,
    /// `(table, id)` records disappear just before a delete reaches them.
    vanishing_records: BTreeSet<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, BTreeMap<String, Table>>,
    faults: Faults,
    ops: Vec<Op>,
}

impl State {
    fn table(&self, namespace: &str, table: &str) -> DbResult<&Table> {
        self.namespaces
            .get(namespace)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| no_such_table(namespace, table))
    }

    fn table_mut(&mut self, namespace: &str, table: &str) -> DbResult<&mut Table> {
        self.namespaces
            .get_mut(namespace)
            .and_then(|tables| tables.get_mut(table))
            .ok_or_else(|| no_such_table(namespace, table))
    }

    /// Returns `true` when the table was created.
    fn ensure_table(&mut self, namespace: &str, table: &str) -> bool {
        let tables = self.namespaces.entry(namespace.to_string()).or_default();
        if tables.contains_key(table) {
            return false;
        }
        tables.insert(table.to_string(), Table::default());
        true
    }
}

fn no_such_table(namespace: &str, table: &str) -> DbError {
    DbError::NoSuchTable {
        namespace: namespace.to_string(),
        table: table.to_string(),
    }
}

fn key(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

/// Shared in-memory database. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryDb {
    state: Arc<RwLock<State>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new connection with its own closed flag.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            db: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    // --- fault injection ---

    pub async fn never_ready(&self, table: &str) {
        self.state.write().await.faults.never_ready.insert(table.to_string());
    }

    pub async fn fail_index_create(&self, table: &str, index: &str) {
        let mut st = self.state.write().await;
        st.faults.failing_indexes.insert(key(table, index));
    }

    pub async fn refuse_record(&self, table: &str, id: &str) {
        let mut st = self.state.write().await;
        st.faults.refused_records.insert(key(table, id));
    }

    /// Simulates a concurrent remover winning the race for `(table, id)`.
    pub async fn vanish_before_delete(&self, table: &str, id: &str) {
        let mut st = self.state.write().await;
        st.faults.vanishing_records.insert(key(table, id));
    }

    // --- seeding and inspection ---

    pub async fn create_table(&self, namespace: &str, table: &str) {
        self.state.write().await.ensure_table(namespace, table);
    }

    /// Store `doc` as-is, creating the table when missing.
    pub async fn put_record(&self, namespace: &str, table: &str, doc: Value) -> DbResult<()> {
        let id = document_id(&doc)?.to_string();
        let mut st = self.state.write().await;
        st.ensure_table(namespace, table);
        st.table_mut(namespace, table)?.records.insert(id, doc);
        Ok(())
    }

    pub async fn put_index(&self, namespace: &str, table: &str, name: &str, fields: &[&str]) {
        let mut st = self.state.write().await;
        st.ensure_table(namespace, table);
        if let Ok(t) = st.table_mut(namespace, table) {
            let fields = fields.iter().map(|f| f.to_string()).collect();
            t.indexes.insert(name.to_string(), fields);
        }
    }

    pub async fn table(&self, namespace: &str, table: &str) -> Option<Table> {
        self.state.read().await.table(namespace, table).ok().cloned()
    }

    pub async fn has_table(&self, namespace: &str, table: &str) -> bool {
        self.table(namespace, table).await.is_some()
    }

    pub async fn record(&self, namespace: &str, table: &str, id: &str) -> Option<Value> {
        self.table(namespace, table)
            .await
            .and_then(|t| t.records.get(id).cloned())
    }

    /// Index name -> fields of `table`; empty when the table is missing.
    pub async fn indexes(&self, namespace: &str, table: &str) -> BTreeMap<String, Vec<String>> {
        self.table(namespace, table)
            .await
            .map(|t| t.indexes)
            .unwrap_or_default()
    }

    /// Full copy of every namespace, for before/after comparisons.
    pub async fn dump(&self) -> BTreeMap<String, BTreeMap<String, Table>> {
        self.state.read().await.namespaces.clone()
    }

    /// Every mutating call so far.
    pub async fn ops(&self) -> Vec<Op> {
        self.state.read().await.ops.clone()
    }

    pub async fn clear_ops(&self) {
        self.state.write().await.ops.clear();
    }

    /// Seed `project` with an existing live collection as a previous apply
    /// would have left it.
    pub async fn seed_collection(
        &self,
        project: &str,
        id: &str,
        indexes: &[(&str, &[&str])],
    ) -> DbResult<()> {
        let internal = internal_namespace(project);
        self.create_table(&internal, GROUPS_TABLE).await;
        self.put_record(&internal, COLLECTIONS_TABLE, serde_json::json!({ "id": id }))
            .await?;
        self.create_table(project, id).await;
        for (name, fields) in indexes {
            self.put_index(project, id, name, fields).await;
        }
        Ok(())
    }
}

/// [`Connection`] over a [`MemoryDb`].
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    db: MemoryDb,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn init_metadata(&self, project: &str) -> DbResult<bool> {
        self.open()?;
        let internal = internal_namespace(project);
        let mut st = self.db.state.write().await;
        st.ops.push(Op::InitMetadata {
            project: project.to_string(),
        });
        st.namespaces.entry(project.to_string()).or_default();
        let collections = st.ensure_table(&internal, COLLECTIONS_TABLE);
        let groups = st.ensure_table(&internal, GROUPS_TABLE);
        Ok(collections || groups)
    }

    async fn wait_ready(&self, namespace: &str, table: &str, _readiness: Readiness) -> DbResult<()> {
        self.open()?;
        let stuck = {
            let st = self.db.state.read().await;
            st.table(namespace, table)?;
            st.faults.never_ready.contains(table)
        };
        if stuck {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn table_create(&self, namespace: &str, table: &str) -> DbResult<bool> {
        self.open()?;
        let mut st = self.db.state.write().await;
        st.ops.push(Op::TableCreate {
            namespace: namespace.to_string(),
            table: table.to_string(),
        });
        Ok(st.ensure_table(namespace, table))
    }

    async fn table_drop(&self, namespace: &str, table: &str) -> DbResult<bool> {
        self.open()?;
        let mut st = self.db.state.write().await;
        st.ops.push(Op::TableDrop {
            namespace: namespace.to_string(),
            table: table.to_string(),
        });
        Ok(st
            .namespaces
            .get_mut(namespace)
            .is_some_and(|tables| tables.remove(table).is_some()))
    }

    async fn index_list(&self, namespace: &str, table: &str) -> DbResult<Vec<String>> {
        self.open()?;
        let st = self.db.state.read().await;
        Ok(st.table(namespace, table)?.indexes.keys().cloned().collect())
    }

    async fn index_create(
        &self,
        namespace: &str,
        table: &str,
        name: &str,
        fields: &[String],
    ) -> DbResult<()> {
        self.open()?;
        let mut st = self.db.state.write().await;
        st.ops.push(Op::IndexCreate {
            namespace: namespace.to_string(),
            table: table.to_string(),
            name: name.to_string(),
        });
        if st.faults.failing_indexes.contains(&key(table, name)) {
            return Err(DbError::Backend {
                context: format!("create index {name} on {namespace}.{table}"),
                message: "injected failure".to_string(),
            });
        }
        let t = st.table_mut(namespace, table)?;
        if t.indexes.contains_key(name) {
            return Err(DbError::Backend {
                context: format!("create index {name} on {namespace}.{table}"),
                message: "index already exists".to_string(),
            });
        }
        t.indexes.insert(name.to_string(), fields.to_vec());
        Ok(())
    }

    async fn index_drop(&self, namespace: &str, table: &str, name: &str) -> DbResult<()> {
        self.open()?;
        let mut st = self.db.state.write().await;
        st.ops.push(Op::IndexDrop {
            namespace: namespace.to_string(),
            table: table.to_string(),
            name: name.to_string(),
        });
        st.table_mut(namespace, table)?.indexes.remove(name);
        Ok(())
    }

    async fn get(&self, namespace: &str, table: &str, id: &str) -> DbResult<Option<Value>> {
        self.open()?;
        let st = self.db.state.read().await;
        Ok(st.table(namespace, table)?.records.get(id).cloned())
    }

    async fn list(&self, namespace: &str, table: &str) -> DbResult<Vec<Value>> {
        self.open()?;
        let st = self.db.state.read().await;
        Ok(st.table(namespace, table)?.records.values().cloned().collect())
    }

    async fn insert(
        &self,
        namespace: &str,
        table: &str,
        docs: Vec<Value>,
        opts: WriteOptions,
    ) -> DbResult<WriteSummary> {
        self.open()?;
        let mut st = self.db.state.write().await;
        let ids = docs
            .iter()
            .filter_map(|d| document_id(d).ok().map(str::to_string))
            .collect();
        st.ops.push(Op::Insert {
            namespace: namespace.to_string(),
            table: table.to_string(),
            ids,
        });

        let refused: BTreeSet<String> = st
            .faults
            .refused_records
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, id)| id.clone())
            .collect();
        let t = st.table_mut(namespace, table)?;

        let mut summary = WriteSummary::default();
        for doc in docs {
            let id = match document_id(&doc) {
                Ok(id) => id.to_string(),
                Err(e) => {
                    summary.record_error(e.to_string());
                    continue;
                }
            };
            if refused.contains(&id) {
                summary.record_error(format!("record `{id}` refused"));
                continue;
            }

            let old = t.records.get(&id).cloned();
            let new = match (&old, opts.conflict) {
                (None, _) => doc,
                (Some(_), Conflict::Error) => {
                    summary.record_error(format!("duplicate primary key `id`: {id}"));
                    continue;
                }
                (Some(_), Conflict::Replace) => doc,
                (Some(old), Conflict::Update) => merge_documents(old.clone(), doc),
            };

            match &old {
                None => summary.inserted += 1,
                Some(old) if *old == new => summary.unchanged += 1,
                Some(_) => summary.replaced += 1,
            }
            if opts.return_changes && old.as_ref() != Some(&new) {
                summary.changes.push(Change {
                    old_val: old,
                    new_val: Some(new.clone()),
                });
            }
            t.records.insert(id, new);
        }
        Ok(summary)
    }

    async fn delete(
        &self,
        namespace: &str,
        table: &str,
        id: &str,
        return_changes: bool,
    ) -> DbResult<WriteSummary> {
        self.open()?;
        let mut st = self.db.state.write().await;
        st.ops.push(Op::Delete {
            namespace: namespace.to_string(),
            table: table.to_string(),
            id: id.to_string(),
        });
        let vanished = st.faults.vanishing_records.remove(&key(table, id));
        let t = st.table_mut(namespace, table)?;
        if vanished {
            t.records.remove(id);
        }

        let mut summary = WriteSummary::default();
        if let Some(old) = t.records.remove(id) {
            summary.deleted = 1;
            if return_changes {
                summary.changes.push(Change {
                    old_val: Some(old),
                    new_val: None,
                });
            }
        }
        Ok(summary)
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
