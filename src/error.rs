//! Structured error handling for the dispatch engine.

use thiserror::Error;

/// Errors surfaced by the engine. Per-event processing failures are folded
/// into the event's `attempts`/`last_error` bookkeeping by the processor;
/// everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("condition evaluation error: {0}")]
    Condition(String),

    #[error("event {event_id} timed out after {timeout_secs}s")]
    EventTimeout { event_id: i64, timeout_secs: u64 },

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, MirrorError>;
