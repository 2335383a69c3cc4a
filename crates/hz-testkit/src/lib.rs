//! hz-testkit
//!
//! Test doubles and fixtures shared by the scenario tests.
//!
//! - [`MemoryDb`]: an in-memory document database with fault injection and a
//!   write log; [`MemoryDb::connect`] hands out [`MemoryConnection`]s that
//!   implement [`hz_db::Connection`].
//! - `fixtures`: schemas and documents used across scenarios.

pub mod fixtures;
mod memory;

pub use memory::{MemoryConnection, MemoryDb, Op, Table};
