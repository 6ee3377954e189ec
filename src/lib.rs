#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Shadow Mirror
//!
//! Event-driven growth loop dispatch engine.
//!
//! Application state changes land as durable rows in an event log. On a fixed
//! cadence (an external scheduler's concern), the [`processor::Processor`]
//! drains a bounded batch, enriches each event's payload, matches it against
//! the configured automation rules, and forwards each matched pair (exactly
//! once, ever) to an external action executor over a signed channel. Events
//! whose processing keeps failing are retried up to a bounded budget and then
//! dead-lettered.
//!
//! ## Guarantees
//!
//! - **At-least-once processing** of every captured event, bounded by
//!   `max_attempts` (default 3) before dead-lettering.
//! - **At-most-once dispatch** per (event, loop) pair, enforced by a
//!   uniqueness constraint on the execution ledger's idempotency key. That is
//!   the single invariant correctness rests on, placed in storage so
//!   overlapping processor runs cannot race past it.
//! - **Per-event isolation**: one event's failure or stall never affects the
//!   rest of the batch.
//!
//! ## Module Organization
//!
//! - [`models`] - event log, loop registry, execution ledger, attribution,
//!   dead-letter sink
//! - [`processor`] - the batch engine, enrichment, condition gating, signed
//!   dispatch
//! - [`config`] - YAML configuration with environment overrides
//! - [`database`] - pool construction and embedded migrations
//! - [`error`] - structured error handling
//! - [`logging`] - tracing initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shadow_mirror::config::MirrorConfig;
//! use shadow_mirror::processor::Processor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MirrorConfig::load()?;
//! let pool = shadow_mirror::database::connect(config.database_url()?, &config.database).await?;
//! shadow_mirror::database::migrate(&pool).await?;
//!
//! let processor = Processor::from_config(pool, &config);
//! let outcome = processor.run_batch().await?;
//! println!("dispatched {} loop actions", outcome.dispatched);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod processor;

pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use models::{Attribution, DeadLetterEntry, Event, Execution, ExecutionStatus, GrowthLoop, NewEvent, NewGrowthLoop};
pub use processor::{BatchOutcome, Processor};
