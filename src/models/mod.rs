//! Data layer: sqlx-backed models for the dispatch engine's five tables.
//!
//! One file per table. Every invariant the engine relies on (idempotency-key
//! uniqueness, dead-letter exactly-once) is enforced by a Postgres constraint,
//! not by an application-level check.

pub mod attribution;
pub mod dead_letter;
pub mod event;
pub mod execution;
pub mod growth_loop;

pub use attribution::Attribution;
pub use dead_letter::DeadLetterEntry;
pub use event::{Event, NewEvent};
pub use execution::{Execution, ExecutionStatus};
pub use growth_loop::{GrowthLoop, NewGrowthLoop};
