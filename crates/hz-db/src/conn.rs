use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DbError, DbResult};

/// Which kind of traffic a table must accept before a readiness wait returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Reads,
    Writes,
}

/// What an insert does when a record with the same `id` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Leave the existing record; count the write as an error in the summary.
    Error,
    /// Replace the existing record wholesale.
    Replace,
    /// Deep-merge the new fields into the existing record.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub conflict: Conflict,
    pub return_changes: bool,
}

impl WriteOptions {
    pub fn new(conflict: Conflict) -> Self {
        Self {
            conflict,
            return_changes: false,
        }
    }

    pub fn returning_changes(mut self) -> Self {
        self.return_changes = true;
        self
    }
}

/// Before/after image of one written record.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub old_val: Option<Value>,
    pub new_val: Option<Value>,
}

/// Per-call write outcome counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub inserted: u64,
    pub replaced: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub errors: u64,
    pub first_error: Option<String>,
    /// Populated only when the write asked for `return_changes`.
    pub changes: Vec<Change>,
}

impl WriteSummary {
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }

    pub fn record_error(&mut self, message: String) {
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(message);
        }
    }
}

/// Connection to a document database.
///
/// Namespaces are independent databases; tables live inside a namespace.
/// Records are JSON objects keyed by a string `id` field.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Ensure the project namespace, its internal namespace, and both
    /// metadata tables exist. Returns `true` when the metadata tables were
    /// created by this call.
    async fn init_metadata(&self, project: &str) -> DbResult<bool>;

    /// Block until `table` accepts the given kind of traffic. No deadline:
    /// callers bound this with their own timeout.
    async fn wait_ready(&self, namespace: &str, table: &str, readiness: Readiness)
        -> DbResult<()>;

    /// Create `table` unless it exists. Returns `true` when it was created.
    async fn table_create(&self, namespace: &str, table: &str) -> DbResult<bool>;

    /// Drop `table` if it exists. Returns `true` when it was dropped.
    async fn table_drop(&self, namespace: &str, table: &str) -> DbResult<bool>;

    async fn index_list(&self, namespace: &str, table: &str) -> DbResult<Vec<String>>;

    /// Create a composite index named `name` over `fields`, in order.
    async fn index_create(
        &self,
        namespace: &str,
        table: &str,
        name: &str,
        fields: &[String],
    ) -> DbResult<()>;

    async fn index_drop(&self, namespace: &str, table: &str, name: &str) -> DbResult<()>;

    async fn get(&self, namespace: &str, table: &str, id: &str) -> DbResult<Option<Value>>;

    /// All records of `table`, ordered by `id`.
    async fn list(&self, namespace: &str, table: &str) -> DbResult<Vec<Value>>;

    async fn insert(
        &self,
        namespace: &str,
        table: &str,
        docs: Vec<Value>,
        opts: WriteOptions,
    ) -> DbResult<WriteSummary>;

    /// Replace the record with `doc`'s id wholesale, inserting it when absent.
    async fn replace(&self, namespace: &str, table: &str, doc: Value) -> DbResult<WriteSummary> {
        self.insert(namespace, table, vec![doc], WriteOptions::new(Conflict::Replace))
            .await
    }

    async fn delete(
        &self,
        namespace: &str,
        table: &str,
        id: &str,
        return_changes: bool,
    ) -> DbResult<WriteSummary>;

    /// Close the connection. In-flight and later calls fail.
    async fn close(&self) -> DbResult<()>;
}

/// The string `id` of a record.
pub fn document_id(doc: &Value) -> DbResult<&str> {
    doc.get("id").and_then(Value::as_str).ok_or(DbError::MissingId)
}

/// Deep merge: objects merge key by key, anything else is replaced by `patch`.
pub fn merge_documents(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (k, pv) in patch {
                let bv = base.remove(&k).unwrap_or(Value::Null);
                base.insert(k, merge_documents(bv, pv));
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_untouched_nested_keys() {
        let base = json!({"id": "g", "rules": {"a": {"template": "1"}, "b": {"template": "2"}}});
        let patch = json!({"rules": {"b": {"template": "3"}}});
        assert_eq!(
            merge_documents(base, patch),
            json!({"id": "g", "rules": {"a": {"template": "1"}, "b": {"template": "3"}}})
        );
    }

    #[test]
    fn document_id_requires_string() {
        assert_eq!(document_id(&json!({"id": "x"})).unwrap(), "x");
        assert!(matches!(document_id(&json!({"id": 1})), Err(DbError::MissingId)));
    }

    #[test]
    fn summary_keeps_first_error() {
        let mut s = WriteSummary::default();
        s.record_error("one".into());
        s.record_error("two".into());
        assert_eq!(s.errors, 2);
        assert_eq!(s.first_error.as_deref(), Some("one"));
        assert!(!s.is_ok());
    }
}
