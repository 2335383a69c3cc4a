use thiserror::Error;

/// Malformed desired-schema document.
///
/// `path` is the dotted location of the offending value, e.g.
/// `groups.admin.rules.read.template`. Document-level failures (TOML syntax,
/// duplicate keys) use the path `<document>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema validation failed at `{path}`: {message}")]
pub struct SchemaValidationError {
    pub path: String,
    pub message: String,
}

impl SchemaValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Index name that does not decode under the naming convention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid index name {name:?}: {reason}")]
pub struct IndexNameError {
    pub name: String,
    pub reason: &'static str,
}
