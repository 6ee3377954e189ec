//! # Dead-Letter Model
//!
//! Terminal sink for events that exhausted their retry budget.
//!
//! Maps to the append-only `growth_failed_events` table. Entries are written
//! exactly once per event: UNIQUE(event_id) plus `ON CONFLICT DO NOTHING`
//! makes a duplicate write from an overlapping processor run a harmless
//! no-op. There is no automatic replay; remediation is a manual, external
//! concern that reads from here.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use crate::models::event::Event;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DeadLetterEntry {
    pub id: i64,
    pub event_id: i64,
    pub event_type: String,
    pub payload: Value,
    pub failure_reason: String,
    pub moved_at: NaiveDateTime,
}

impl DeadLetterEntry {
    /// Record an exhausted event, carrying its full original metadata for
    /// audit. Returns `false` when the event was already dead-lettered.
    ///
    /// Takes an executor so the processor can pair it with the final
    /// `record_failure` in one transaction.
    pub async fn record<'e, E>(
        executor: E,
        event: &Event,
        failure_reason: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO growth_failed_events (event_id, event_type, payload, failure_reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.metadata)
        .bind(failure_reason)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_event_id(
        pool: &PgPool,
        event_id: i64,
    ) -> Result<Option<DeadLetterEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeadLetterEntry>(
            r#"
            SELECT id, event_id, event_type, payload, failure_reason, moved_at
            FROM growth_failed_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await
    }

    /// Most recently dead-lettered events, for external remediation tooling.
    pub async fn list_recent(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeadLetterEntry>(
            r#"
            SELECT id, event_id, event_type, payload, failure_reason, moved_at
            FROM growth_failed_events
            ORDER BY moved_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
