//! # GrowthLoop Model
//!
//! Declarative automation rules: event type in, condition gate, action out.
//!
//! Maps to the `growth_loops` table. Rows are provisioned externally via
//! [`GrowthLoop::upsert`] (idempotent by `loop_key`) and read-only to the
//! processor, which takes an immutable snapshot of the enabled rows once per
//! batch.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

/// A named automation rule binding an event type to a condition and action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GrowthLoop {
    pub id: i64,
    pub loop_key: String,
    pub trigger_event: String,
    pub condition: Value,
    pub action_type: String,
    pub action_config: Value,
    pub recipient_path: Option<String>,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Loop definition for provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGrowthLoop {
    pub loop_key: String,
    pub trigger_event: String,
    pub condition: Value,
    pub action_type: String,
    pub action_config: Value,
    pub recipient_path: Option<String>,
    pub enabled: bool,
}

impl NewGrowthLoop {
    /// A minimal enabled loop with the always-pass (empty) condition.
    pub fn new(
        loop_key: impl Into<String>,
        trigger_event: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            loop_key: loop_key.into(),
            trigger_event: trigger_event.into(),
            condition: Value::Object(serde_json::Map::new()),
            action_type: action_type.into(),
            action_config: Value::Object(serde_json::Map::new()),
            recipient_path: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_recipient_path(mut self, path: impl Into<String>) -> Self {
        self.recipient_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = condition;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl GrowthLoop {
    /// Idempotent provisioning upsert. A second upsert with the same
    /// `loop_key` refreshes the definition in place rather than erroring.
    pub async fn upsert(pool: &PgPool, new_loop: NewGrowthLoop) -> Result<GrowthLoop, sqlx::Error> {
        sqlx::query_as::<_, GrowthLoop>(
            r#"
            INSERT INTO growth_loops
                (loop_key, trigger_event, condition, action_type, action_config, recipient_path, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (loop_key) DO UPDATE SET
                trigger_event = EXCLUDED.trigger_event,
                condition = EXCLUDED.condition,
                action_type = EXCLUDED.action_type,
                action_config = EXCLUDED.action_config,
                recipient_path = EXCLUDED.recipient_path,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            RETURNING id, loop_key, trigger_event, condition, action_type, action_config,
                      recipient_path, enabled, created_at, updated_at
            "#,
        )
        .bind(&new_loop.loop_key)
        .bind(&new_loop.trigger_event)
        .bind(&new_loop.condition)
        .bind(&new_loop.action_type)
        .bind(&new_loop.action_config)
        .bind(&new_loop.recipient_path)
        .bind(new_loop.enabled)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_key(
        pool: &PgPool,
        loop_key: &str,
    ) -> Result<Option<GrowthLoop>, sqlx::Error> {
        sqlx::query_as::<_, GrowthLoop>(
            r#"
            SELECT id, loop_key, trigger_event, condition, action_type, action_config,
                   recipient_path, enabled, created_at, updated_at
            FROM growth_loops
            WHERE loop_key = $1
            "#,
        )
        .bind(loop_key)
        .fetch_optional(pool)
        .await
    }

    /// Enabled loops triggered by the given event type.
    pub async fn find_enabled_for_event(
        pool: &PgPool,
        event_type: &str,
    ) -> Result<Vec<GrowthLoop>, sqlx::Error> {
        sqlx::query_as::<_, GrowthLoop>(
            r#"
            SELECT id, loop_key, trigger_event, condition, action_type, action_config,
                   recipient_path, enabled, created_at, updated_at
            FROM growth_loops
            WHERE trigger_event = $1 AND enabled
            ORDER BY loop_key
            "#,
        )
        .bind(event_type)
        .fetch_all(pool)
        .await
    }

    /// All enabled loops, for the processor's per-batch snapshot.
    pub async fn find_all_enabled(pool: &PgPool) -> Result<Vec<GrowthLoop>, sqlx::Error> {
        sqlx::query_as::<_, GrowthLoop>(
            r#"
            SELECT id, loop_key, trigger_event, condition, action_type, action_config,
                   recipient_path, enabled, created_at, updated_at
            FROM growth_loops
            WHERE enabled
            ORDER BY trigger_event, loop_key
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Flip a loop on or off without touching its definition.
    pub async fn set_enabled(
        pool: &PgPool,
        loop_key: &str,
        enabled: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE growth_loops
            SET enabled = $2, updated_at = NOW()
            WHERE loop_key = $1
            "#,
        )
        .bind(loop_key)
        .bind(enabled)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
