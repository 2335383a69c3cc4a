//! hz-db
//!
//! The document-database collaborator used by the reconciliation engine.
//!
//! - [`Connection`] is the contract: metadata bootstrap, readiness waits,
//!   table and index DDL, and record reads/writes with conflict modes.
//! - [`PgConnection`] implements it on PostgreSQL: a namespace is a schema,
//!   a collection is a `(id text primary key, doc jsonb)` table, and an index
//!   is an expression index over `doc -> 'field'`.
//!
//! Write calls report per-record outcomes in a [`WriteSummary`] instead of
//! failing the whole call; `Err` is reserved for transport and query failures.

mod conn;
mod error;
mod pg;
mod target;

pub use conn::{
    document_id, merge_documents, Change, Conflict, Connection, Readiness, WriteOptions,
    WriteSummary,
};
pub use error::{DbError, DbResult};
pub use pg::{physical_index_name, PgConnection, MAX_IDENTIFIER_BYTES};
pub use target::{connect, DbTarget, DEFAULT_HOST, DEFAULT_PORT};

/// Metadata table holding one record per live collection.
pub const COLLECTIONS_TABLE: &str = "hz_collections";

/// Metadata table holding one record per live group.
pub const GROUPS_TABLE: &str = "hz_groups";

/// Namespace that holds the metadata tables for `project`.
pub fn internal_namespace(project: &str) -> String {
    format!("{project}_internal")
}
