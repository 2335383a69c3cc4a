//! hz-reconcile
//!
//! Schema reconciliation engine.
//!
//! - `apply`: converge the live database to a desired [`Schema`]
//! - `save`:  export the live database as a [`Schema`]
//!
//! Decisions:
//! - Two modes: `Update` only adds and updates; `Replace` also removes live
//!   entities the schema does not declare.
//! - Removing collections requires `force`; the guard runs before any write.
//! - Steps are strict barriers. A failed step aborts the run; completed steps
//!   are not undone.
//! - Index batches attempt every collection and report all failures together.
//!
//! Diff computation lives in `plan` (pure, deterministic). `engine` drives a
//! [`hz_db::Connection`] through the ordered steps.

mod engine;
mod error;
mod interrupt;
pub mod plan;
mod report;

pub use engine::{apply, save, ApplyOptions, Mode, SaveOptions, DEFAULT_READY_TIMEOUT};
pub use error::{Cause, ReconcileError, WriteFailure};
pub use interrupt::{interrupt_channel, Interrupt, InterruptHandle};
pub use report::{ApplyReport, IndexRef};

pub use hz_schema::Schema;
