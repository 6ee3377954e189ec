//! Attribution linkage: one optional conversion record per execution.
//!
//! Written by a downstream collaborator when a dispatched execution later
//! correlates with a business outcome; the processor itself never writes here.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Attribution {
    pub id: i64,
    pub execution_id: i64,
    pub conversion_event: String,
    pub conversion_value: Option<f64>,
    pub created_at: NaiveDateTime,
}

impl Attribution {
    /// Record (or refresh) the conversion outcome for an execution. One
    /// attribution per execution, enforced by UNIQUE(execution_id).
    pub async fn record(
        pool: &PgPool,
        execution_id: i64,
        conversion_event: &str,
        conversion_value: Option<f64>,
    ) -> Result<Attribution, sqlx::Error> {
        sqlx::query_as::<_, Attribution>(
            r#"
            INSERT INTO growth_attributions (execution_id, conversion_event, conversion_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (execution_id) DO UPDATE SET
                conversion_event = EXCLUDED.conversion_event,
                conversion_value = EXCLUDED.conversion_value
            RETURNING id, execution_id, conversion_event, conversion_value, created_at
            "#,
        )
        .bind(execution_id)
        .bind(conversion_event)
        .bind(conversion_value)
        .fetch_one(pool)
        .await
    }

    pub async fn find_for_execution(
        pool: &PgPool,
        execution_id: i64,
    ) -> Result<Option<Attribution>, sqlx::Error> {
        sqlx::query_as::<_, Attribution>(
            r#"
            SELECT id, execution_id, conversion_event, conversion_value, created_at
            FROM growth_attributions
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(pool)
        .await
    }
}
