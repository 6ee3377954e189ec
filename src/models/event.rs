//! # Event Model
//!
//! Captured state-change events, the durable input to the dispatch engine.
//!
//! Maps to the append-only `growth_event_log` table. Rows are written by the
//! host application's change-capture hooks (out of scope here) and consumed by
//! the [`Processor`](crate::processor::Processor) in FIFO batches. Each row
//! carries its own retry bookkeeping: `attempts` counts full processing
//! passes that ended in an uncaught failure, `last_error` holds the most
//! recent failure detail, and `processed_at` is set exactly once when a pass
//! completes cleanly.
//!
//! An event with `attempts >= max_attempts` and no `processed_at` is
//! permanently excluded from pending selection; the processor dead-letters it
//! at the moment the budget is exhausted.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A captured, immutable state change with per-event retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub org_id: Option<String>,
    pub entity_id: Option<Uuid>,
    pub event_type: String,
    pub metadata: Value,
    pub occurred_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// New event for capture (generated fields assigned by the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub org_id: Option<String>,
    pub entity_id: Option<Uuid>,
    pub event_type: String,
    pub metadata: Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, metadata: Value) -> Self {
        Self {
            org_id: None,
            entity_id: None,
            event_type: event_type.into(),
            metadata,
        }
    }

    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }
}

impl Event {
    /// Append a captured event. Ids are monotonic (BIGSERIAL), so selection
    /// order doubles as capture order.
    pub async fn enqueue(pool: &PgPool, new_event: NewEvent) -> Result<Event, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO growth_event_log (org_id, entity_id, event_type, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id, org_id, entity_id, event_type, metadata,
                      occurred_at, processed_at, attempts, last_error
            "#,
        )
        .bind(&new_event.org_id)
        .bind(new_event.entity_id)
        .bind(&new_event.event_type)
        .bind(&new_event.metadata)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"
            SELECT id, org_id, entity_id, event_type, metadata,
                   occurred_at, processed_at, attempts, last_error
            FROM growth_event_log
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Select the oldest pending events, capped at `limit`. Events at or over
    /// the attempts budget are never returned; once dead-lettered they stay
    /// in the log for audit but are invisible to the processor.
    pub async fn select_pending(
        pool: &PgPool,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"
            SELECT id, org_id, entity_id, event_type, metadata,
                   occurred_at, processed_at, attempts, last_error
            FROM growth_event_log
            WHERE processed_at IS NULL AND attempts < $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Mark an event as having completed a processing pass. Individual loop
    /// dispatch failures do not block this; only an uncaught per-event
    /// failure does.
    pub async fn mark_processed<'e, E>(executor: E, id: i64) -> Result<(), sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE growth_event_log
            SET processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record a failed processing pass: increments `attempts` and replaces
    /// `last_error` in one statement. Returns the new attempts count so the
    /// caller can decide whether the retry budget is exhausted.
    ///
    /// Takes an executor so the processor can pair it with the dead-letter
    /// write in a single transaction.
    pub async fn record_failure<'e, E>(
        executor: E,
        id: i64,
        error: &str,
    ) -> Result<i32, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row: (i32,) = sqlx::query_as(
            r#"
            UPDATE growth_event_log
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_one(executor)
        .await?;
        Ok(row.0)
    }

    /// Count events still awaiting processing under the given budget.
    pub async fn count_pending(pool: &PgPool, max_attempts: i32) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM growth_event_log
            WHERE processed_at IS NULL AND attempts < $1
            "#,
        )
        .bind(max_attempts)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// True once the event has completed a processing pass.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
