//! Immutable per-batch view of the loop registry.
//!
//! Loop rows are config-as-data and can be toggled at any time; the processor
//! never reads them live. It takes one snapshot at the start of a batch, so a
//! mid-batch toggle takes effect on the next invocation, and every event in a
//! batch is matched against the same rule set.

use sqlx::PgPool;
use std::collections::HashMap;

use crate::models::GrowthLoop;

/// All enabled loops at a point in time, grouped by trigger event.
#[derive(Debug, Clone)]
pub struct LoopSnapshot {
    by_trigger: HashMap<String, Vec<GrowthLoop>>,
}

impl LoopSnapshot {
    /// Load the enabled loops once.
    pub async fn load(pool: &PgPool) -> Result<LoopSnapshot, sqlx::Error> {
        let loops = GrowthLoop::find_all_enabled(pool).await?;
        let mut by_trigger: HashMap<String, Vec<GrowthLoop>> = HashMap::new();
        for growth_loop in loops {
            by_trigger
                .entry(growth_loop.trigger_event.clone())
                .or_default()
                .push(growth_loop);
        }
        Ok(LoopSnapshot { by_trigger })
    }

    /// Enabled loops whose trigger matches the event type.
    #[must_use]
    pub fn matching(&self, event_type: &str) -> &[GrowthLoop] {
        self.by_trigger
            .get(event_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Total enabled loops in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_trigger.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_trigger.is_empty()
    }
}
