use std::time::Duration;

use hz_db::DbError;
use hz_schema::IndexNameError;
use thiserror::Error;

/// Why a single database operation failed.
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Db(#[from] DbError),

    /// The database accepted the call but refused the record.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("malformed record")]
    Decode(#[from] serde_json::Error),
}

/// One failed member of a batched step.
#[derive(Debug, Error)]
#[error("{entity}: {cause}")]
pub struct WriteFailure {
    pub entity: String,
    #[source]
    pub cause: Cause,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Replace mode would remove live collections and `force` was not set.
    /// Nothing has been written when this is returned.
    #[error(
        "refusing to remove collections not in the schema without force: {}",
        .collections.join(", ")
    )]
    DestructiveChange { collections: Vec<String> },

    #[error("metadata tables in {namespace} not ready within {waited:?}")]
    ReadinessTimeout { namespace: String, waited: Duration },

    #[error(transparent)]
    InvalidIndexName(#[from] IndexNameError),

    #[error("write to {entity} failed")]
    Write {
        entity: String,
        #[source]
        cause: Cause,
    },

    /// Aggregate of every failed member of an index batch.
    #[error("{} index operation(s) failed: {}", .failures.len(), list(.failures))]
    IndexWrites { failures: Vec<WriteFailure> },

    #[error("reading {what} failed")]
    Read {
        what: String,
        #[source]
        cause: Cause,
    },

    #[error("interrupted")]
    Interrupted,
}

impl ReconcileError {
    pub(crate) fn write(entity: impl Into<String>, cause: impl Into<Cause>) -> Self {
        ReconcileError::Write {
            entity: entity.into(),
            cause: cause.into(),
        }
    }

    pub(crate) fn read(what: impl Into<String>, cause: impl Into<Cause>) -> Self {
        ReconcileError::Read {
            what: what.into(),
            cause: cause.into(),
        }
    }
}

fn list(failures: &[WriteFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
