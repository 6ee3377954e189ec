//! # Batch Processor
//!
//! The engine: drains a bounded batch of pending events and, per event, runs
//! enrich → match → gate → resolve recipient → idempotent claim → signed
//! dispatch → status update, then finalizes the event's bookkeeping.
//!
//! ## Failure boundaries
//!
//! Each event is processed inside its own boundary with a wall-clock timeout;
//! one event's failure (or one hung external call) never aborts the batch. A
//! failed pass increments the event's `attempts` and records `last_error`;
//! when the budget is exhausted the event is dead-lettered in the same
//! transaction as that final bookkeeping. Loop-level dispatch failures are
//! recorded on the claimed execution row and do not fail the event.
//!
//! ## Overlap safety
//!
//! Invocations are scheduled externally and may overlap (a slow run still in
//! flight when the next fires, or horizontally scaled workers). Correctness
//! under overlap rests entirely on the idempotency-key uniqueness constraint
//! in the execution ledger: the claim is insert-or-skip in one statement, so
//! a (event, loop) pair dispatches at most once no matter how many runs see
//! the event.

pub mod condition;
pub mod dispatch;
pub mod enrichment;
pub mod registry;
pub mod signer;

use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{MirrorConfig, ProcessorConfig};
use crate::error::{MirrorError, Result};
use crate::models::{DeadLetterEntry, Event, Execution, GrowthLoop};

use condition::{ConditionEvaluator, DefaultGate};
use dispatch::{ActionExecutor, DispatchRequest, HttpActionExecutor};
use enrichment::{enrich, resolve_recipient, NoopResolver, OwnerResolver};
use registry::LoopSnapshot;
use signer::DispatchSigner;

/// Counters for one `run_batch` invocation, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Events selected for this batch.
    pub selected: usize,
    /// Events that completed a processing pass.
    pub processed: usize,
    /// Events whose pass failed (attempts incremented).
    pub failed: usize,
    /// Events moved to the dead-letter sink this batch.
    pub dead_lettered: usize,
    /// Dispatches accepted by the executor.
    pub dispatched: usize,
    /// Claimed dispatches the executor rejected or that errored.
    pub dispatch_failed: usize,
    /// Loops skipped by the condition gate.
    pub skipped_condition: usize,
    /// Loops skipped because no recipient resolved.
    pub skipped_no_recipient: usize,
    /// Loops skipped because the (event, loop) pair was already claimed.
    pub skipped_claimed: usize,
}

impl BatchOutcome {
    fn absorb(&mut self, stats: EventStats) {
        self.dispatched += stats.dispatched;
        self.dispatch_failed += stats.dispatch_failed;
        self.skipped_condition += stats.skipped_condition;
        self.skipped_no_recipient += stats.skipped_no_recipient;
        self.skipped_claimed += stats.skipped_claimed;
    }
}

#[derive(Debug, Default)]
struct EventStats {
    dispatched: usize,
    dispatch_failed: usize,
    skipped_condition: usize,
    skipped_no_recipient: usize,
    skipped_claimed: usize,
}

/// The dispatch engine. Stateless between invocations; an external scheduler
/// calls [`run_batch`](Self::run_batch) on a fixed cadence.
pub struct Processor {
    pool: PgPool,
    config: ProcessorConfig,
    executor: Arc<dyn ActionExecutor>,
    resolver: Arc<dyn OwnerResolver>,
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl Processor {
    /// Processor with the default collaborators: no owner lookup source and
    /// the default condition gate (empty passes, non-empty skips).
    pub fn new(pool: PgPool, config: ProcessorConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            pool,
            config,
            executor,
            resolver: Arc::new(NoopResolver),
            evaluator: Arc::new(DefaultGate),
        }
    }

    /// Production wiring: signed HTTP dispatch per the executor config.
    pub fn from_config(pool: PgPool, config: &MirrorConfig) -> Self {
        let signer = DispatchSigner::new(
            config.executor.signing_secret.clone(),
            config.executor.workspace_id.clone(),
        );
        let executor = HttpActionExecutor::new(
            config.executor.endpoint_url.clone(),
            signer,
            config.processor.dispatch_timeout(),
        );
        Self::new(pool, config.processor.clone(), Arc::new(executor))
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn OwnerResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Drain one batch of pending events. Safe to call from overlapping
    /// invocations.
    pub async fn run_batch(&self) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        let events = Event::select_pending(
            &self.pool,
            self.config.batch_size,
            self.config.max_attempts,
        )
        .await?;
        outcome.selected = events.len();
        if events.is_empty() {
            return Ok(outcome);
        }

        let snapshot = LoopSnapshot::load(&self.pool).await?;
        debug!(
            events = events.len(),
            loops = snapshot.len(),
            "starting batch"
        );

        for event in &events {
            let bounded = timeout(
                self.config.event_timeout(),
                self.process_event(event, &snapshot),
            );
            match bounded.await {
                Ok(Ok(stats)) => {
                    outcome.processed += 1;
                    outcome.absorb(stats);
                }
                Ok(Err(err)) => {
                    self.handle_event_failure(event, &err.to_string(), &mut outcome)
                        .await;
                }
                Err(_) => {
                    let err = MirrorError::EventTimeout {
                        event_id: event.id,
                        timeout_secs: self.config.event_timeout_seconds,
                    };
                    self.handle_event_failure(event, &err.to_string(), &mut outcome)
                        .await;
                }
            }
        }

        info!(
            selected = outcome.selected,
            processed = outcome.processed,
            failed = outcome.failed,
            dead_lettered = outcome.dead_lettered,
            dispatched = outcome.dispatched,
            dispatch_failed = outcome.dispatch_failed,
            "batch complete"
        );
        Ok(outcome)
    }

    /// One event's unit of work. Any `Err` out of here is a processing
    /// failure charged against the event's retry budget.
    async fn process_event(&self, event: &Event, snapshot: &LoopSnapshot) -> Result<EventStats> {
        let mut stats = EventStats::default();

        let enriched = enrich(event, self.resolver.as_ref()).await;

        for growth_loop in snapshot.matching(&event.event_type) {
            match self.dispatch_loop(event, growth_loop, &enriched).await? {
                LoopOutcome::Dispatched => stats.dispatched += 1,
                LoopOutcome::DispatchFailed => stats.dispatch_failed += 1,
                LoopOutcome::SkippedCondition => stats.skipped_condition += 1,
                LoopOutcome::SkippedNoRecipient => stats.skipped_no_recipient += 1,
                LoopOutcome::SkippedClaimed => stats.skipped_claimed += 1,
            }
        }

        Event::mark_processed(&self.pool, event.id).await?;
        Ok(stats)
    }

    async fn dispatch_loop(
        &self,
        event: &Event,
        growth_loop: &GrowthLoop,
        enriched: &serde_json::Value,
    ) -> Result<LoopOutcome> {
        if !self.evaluator.evaluate(&growth_loop.condition, enriched)? {
            debug!(
                event_id = event.id,
                loop_key = %growth_loop.loop_key,
                "condition gate skipped loop"
            );
            return Ok(LoopOutcome::SkippedCondition);
        }

        // No recipient is not an error: no execution row, nothing recorded.
        let Some(recipient) =
            resolve_recipient(enriched, growth_loop.recipient_path.as_deref())
        else {
            debug!(
                event_id = event.id,
                loop_key = %growth_loop.loop_key,
                "no recipient resolved, skipping loop"
            );
            return Ok(LoopOutcome::SkippedNoRecipient);
        };

        // Idempotent claim: losing the insert means another pass (ours or a
        // concurrent run's) already owns this pair. Expected, not an error.
        let Some(execution) = Execution::claim(&self.pool, event.id, &growth_loop.loop_key).await?
        else {
            debug!(
                event_id = event.id,
                loop_key = %growth_loop.loop_key,
                "pair already claimed, skipping loop"
            );
            return Ok(LoopOutcome::SkippedClaimed);
        };

        let request = DispatchRequest {
            event_id: event.id,
            loop_key: growth_loop.loop_key.clone(),
            idempotency_key: execution.idempotency_key.clone(),
            recipient,
            enriched_payload: enriched.clone(),
            action_type: growth_loop.action_type.clone(),
            action_config: growth_loop.action_config.clone(),
        };

        match self.executor.execute(request).await {
            Ok(ack) => {
                Execution::mark_sent(&self.pool, execution.id, ack.tokens_used).await?;
                Ok(LoopOutcome::Dispatched)
            }
            Err(dispatch_err) => {
                warn!(
                    event_id = event.id,
                    loop_key = %growth_loop.loop_key,
                    error = %dispatch_err,
                    "dispatch not accepted, marking execution failed"
                );
                Execution::mark_failed(&self.pool, execution.id, &dispatch_err.to_string())
                    .await?;
                Ok(LoopOutcome::DispatchFailed)
            }
        }
    }

    /// Record a failed pass and, once the budget is exhausted, dead-letter
    /// the event, both in one transaction so the attempts counter and the
    /// dead-letter entry cannot diverge.
    async fn handle_event_failure(
        &self,
        event: &Event,
        error_detail: &str,
        outcome: &mut BatchOutcome,
    ) {
        warn!(
            event_id = event.id,
            event_type = %event.event_type,
            error = %error_detail,
            "event processing failed"
        );

        let result: std::result::Result<bool, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            let attempts = Event::record_failure(&mut *tx, event.id, error_detail).await?;
            let mut dead_lettered = false;
            if attempts >= self.config.max_attempts {
                let reason = format!(
                    "exhausted {attempts} attempts; last error: {error_detail}"
                );
                dead_lettered = DeadLetterEntry::record(&mut *tx, event, &reason).await?;
            }
            tx.commit().await?;
            Ok(dead_lettered)
        }
        .await;

        match result {
            Ok(dead_lettered) => {
                outcome.failed += 1;
                if dead_lettered {
                    outcome.dead_lettered += 1;
                    info!(
                        event_id = event.id,
                        event_type = %event.event_type,
                        "event moved to dead-letter sink"
                    );
                }
            }
            Err(db_err) => {
                // Bookkeeping itself failed; the event stays pending and will
                // be retried on the next pass without an attempts increment.
                error!(
                    event_id = event.id,
                    error = %db_err,
                    "failed to record event failure"
                );
                outcome.failed += 1;
            }
        }
    }
}

enum LoopOutcome {
    Dispatched,
    DispatchFailed,
    SkippedCondition,
    SkippedNoRecipient,
    SkippedClaimed,
}
