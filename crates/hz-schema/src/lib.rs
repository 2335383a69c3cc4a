//! hz-schema
//!
//! Desired-schema document handling:
//! - `parse`  : TOML text -> validated [`Schema`]
//! - `model`  : collections, indexes, groups, rules
//! - `index`  : index-name <-> ordered field list convention
//! - `render` : [`Schema`] -> TOML text (deterministic, sorted)
//!
//! Pure logic. No IO. No database calls.

mod error;
pub mod index;
mod model;
mod parse;
mod render;
mod shape;

pub use error::{IndexNameError, SchemaValidationError};
pub use index::{fields_to_name, name_to_fields};
pub use model::{Collection, Group, Rule, Schema, MAX_COLLECTION_NAME_BYTES, RESERVED_PREFIX};
pub use parse::parse;
pub use render::{render, DOCUMENT_HEADER};
