use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("timed out connecting to {target}")]
    ConnectTimeout { target: String },

    #[error("failed to connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{context} failed")]
    Sqlx {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Failure reported by a non-SQL backend (or injected by a test double).
    #[error("{context}: {message}")]
    Backend { context: String, message: String },

    #[error("table {namespace}.{table} does not exist")]
    NoSuchTable { namespace: String, table: String },

    /// Postgres would silently truncate the name to `max` bytes.
    #[error("identifier {name:?} is {len} bytes; the limit is {max}")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("document has no string `id` field")]
    MissingId,

    #[error("invalid connect address {0:?}: expected host:port")]
    InvalidAddress(String),

    #[error("connection is closed")]
    Closed,
}

impl DbError {
    pub(crate) fn sqlx(context: &'static str) -> impl FnOnce(sqlx::Error) -> DbError {
        move |source| DbError::Sqlx { context, source }
    }
}
