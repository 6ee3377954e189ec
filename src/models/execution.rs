//! # Execution Model
//!
//! The idempotency and audit ledger: one row per attempted (event, loop) pair.
//!
//! Maps to the `growth_loop_executions` table. The `idempotency_key` column
//! carries a UNIQUE constraint, and [`Execution::claim`] inserts with
//! `ON CONFLICT DO NOTHING` in a single round trip. This is the one safety
//! invariant the whole engine leans on: overlapping processor runs may both
//! attempt the claim; exactly one wins, and the loser sees `None` and skips.
//!
//! Status lifecycle:
//! - `pending` → `sent` (executor accepted the dispatch)
//! - `pending` → `failed` (executor rejected or the call errored; terminal to
//!   the processor, since a claimed pair is never re-attempted)
//! - `retrying` / `archived` are reserved for external remediation tooling
//!   and never written by the engine itself.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a dispatch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Claimed, dispatch not yet resolved
    Pending,

    /// Executor accepted the dispatch
    Sent,

    /// Executor rejected the dispatch or the call errored
    Failed,

    /// Queued for manual replay by external tooling
    Retrying,

    /// Closed out by external tooling without replay
    Archived,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Archived => "archived",
        }
    }

    /// Terminal statuses are never touched again by the processor.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Archived)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A single attempted (event, loop) dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: i64,
    pub event_id: i64,
    pub loop_key: String,
    pub idempotency_key: String,
    pub status: String,
    pub tokens_used: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Execution {
    /// Deterministic idempotency key for an (event, loop) pair.
    #[must_use]
    pub fn idempotency_key_for(event_id: i64, loop_key: &str) -> String {
        format!("{event_id}_{loop_key}")
    }

    /// Atomically claim an (event, loop) pair. Returns `None` when the pair
    /// was already claimed, either by a prior pass over the same event or by a
    /// concurrent processor run. Insert-or-skip is a single statement, never
    /// a check-then-insert.
    pub async fn claim(
        pool: &PgPool,
        event_id: i64,
        loop_key: &str,
    ) -> Result<Option<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>(
            r#"
            INSERT INTO growth_loop_executions (event_id, loop_key, idempotency_key, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id, event_id, loop_key, idempotency_key, status,
                      tokens_used, error_message, created_at, updated_at
            "#,
        )
        .bind(event_id)
        .bind(loop_key)
        .bind(Self::idempotency_key_for(event_id, loop_key))
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_idempotency_key(
        pool: &PgPool,
        idempotency_key: &str,
    ) -> Result<Option<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>(
            r#"
            SELECT id, event_id, loop_key, idempotency_key, status,
                   tokens_used, error_message, created_at, updated_at
            FROM growth_loop_executions
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
    }

    /// All executions recorded for an event, in claim order.
    pub async fn find_for_event(
        pool: &PgPool,
        event_id: i64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>(
            r#"
            SELECT id, event_id, loop_key, idempotency_key, status,
                   tokens_used, error_message, created_at, updated_at
            FROM growth_loop_executions
            WHERE event_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await
    }

    /// Mark the dispatch accepted, recording executor-reported usage if any.
    pub async fn mark_sent(
        pool: &PgPool,
        id: i64,
        tokens_used: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE growth_loop_executions
            SET status = 'sent', tokens_used = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(tokens_used)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark the dispatch rejected or errored. Terminal to the processor.
    pub async fn mark_failed(pool: &PgPool, id: i64, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE growth_loop_executions
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Typed view of the raw status column.
    pub fn parsed_status(&self) -> Result<ExecutionStatus, String> {
        self.status.parse()
    }
}
