//! Storage-level tests for the five models.
//!
//! Every invariant the engine leans on lives in these tables: FIFO pending
//! selection with the attempts guard, the idempotency-key claim, dead-letter
//! exactly-once, idempotent loop provisioning.

use serde_json::json;
use sqlx::PgPool;

use shadow_mirror::models::{
    Attribution, DeadLetterEntry, Event, Execution, GrowthLoop, NewEvent, NewGrowthLoop,
};

#[sqlx::test(migrations = "./migrations")]
async fn events_are_selected_oldest_first(pool: PgPool) -> sqlx::Result<()> {
    let first = Event::enqueue(&pool, NewEvent::new("users.insert", json!({"n": 1}))).await?;
    let second = Event::enqueue(&pool, NewEvent::new("users.insert", json!({"n": 2}))).await?;
    let third = Event::enqueue(&pool, NewEvent::new("orders.insert", json!({"n": 3}))).await?;

    let pending = Event::select_pending(&pool, 50, 3).await?;
    assert_eq!(
        pending.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![first.id, second.id, third.id]
    );

    // Batch limit caps the selection, still oldest first.
    let limited = Event::select_pending(&pool, 2, 3).await?;
    assert_eq!(
        limited.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn processed_and_exhausted_events_are_never_selected(pool: PgPool) -> sqlx::Result<()> {
    let processed = Event::enqueue(&pool, NewEvent::new("a", json!({}))).await?;
    let exhausted = Event::enqueue(&pool, NewEvent::new("b", json!({}))).await?;
    let live = Event::enqueue(&pool, NewEvent::new("c", json!({}))).await?;

    Event::mark_processed(&pool, processed.id).await?;
    for _ in 0..3 {
        Event::record_failure(&pool, exhausted.id, "boom").await?;
    }

    let pending = Event::select_pending(&pool, 50, 3).await?;
    assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), vec![live.id]);
    assert_eq!(Event::count_pending(&pool, 3).await?, 1);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn record_failure_increments_atomically(pool: PgPool) -> sqlx::Result<()> {
    let event = Event::enqueue(&pool, NewEvent::new("a", json!({}))).await?;

    assert_eq!(Event::record_failure(&pool, event.id, "first").await?, 1);
    assert_eq!(Event::record_failure(&pool, event.id, "second").await?, 2);

    let reloaded = Event::find_by_id(&pool, event.id).await?.unwrap();
    assert_eq!(reloaded.attempts, 2);
    assert_eq!(reloaded.last_error.as_deref(), Some("second"));
    assert!(!reloaded.is_processed());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn loop_upsert_is_idempotent_by_key(pool: PgPool) -> sqlx::Result<()> {
    let created = GrowthLoop::upsert(
        &pool,
        NewGrowthLoop::new("welcome", "users.insert", "email").with_recipient_path("email"),
    )
    .await?;

    // Re-provisioning the same key refreshes in place.
    let refreshed = GrowthLoop::upsert(
        &pool,
        NewGrowthLoop::new("welcome", "users.update", "email").disabled(),
    )
    .await?;
    assert_eq!(refreshed.id, created.id);
    assert_eq!(refreshed.trigger_event, "users.update");
    assert!(!refreshed.enabled);
    assert_eq!(refreshed.recipient_path, None);

    let found = GrowthLoop::find_by_key(&pool, "welcome").await?.unwrap();
    assert_eq!(found.trigger_event, "users.update");
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn only_enabled_matching_loops_are_found(pool: PgPool) -> sqlx::Result<()> {
    GrowthLoop::upsert(&pool, NewGrowthLoop::new("welcome", "users.insert", "email")).await?;
    GrowthLoop::upsert(
        &pool,
        NewGrowthLoop::new("surveys", "users.insert", "email").disabled(),
    )
    .await?;
    GrowthLoop::upsert(&pool, NewGrowthLoop::new("invoices", "orders.insert", "email")).await?;

    let matching = GrowthLoop::find_enabled_for_event(&pool, "users.insert").await?;
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].loop_key, "welcome");

    GrowthLoop::set_enabled(&pool, "surveys", true).await?;
    let matching = GrowthLoop::find_enabled_for_event(&pool, "users.insert").await?;
    assert_eq!(matching.len(), 2);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn execution_claim_is_first_writer_wins(pool: PgPool) -> sqlx::Result<()> {
    let event = Event::enqueue(&pool, NewEvent::new("users.insert", json!({}))).await?;
    GrowthLoop::upsert(&pool, NewGrowthLoop::new("welcome", "users.insert", "email")).await?;

    let claimed = Execution::claim(&pool, event.id, "welcome").await?;
    let execution = claimed.expect("first claim should win");
    assert_eq!(
        execution.idempotency_key,
        format!("{}_welcome", event.id)
    );
    assert_eq!(execution.status, "pending");

    // Second claim for the same pair is a conflict no-op.
    assert!(Execution::claim(&pool, event.id, "welcome").await?.is_none());

    // A different loop for the same event is a distinct pair.
    assert!(Execution::claim(&pool, event.id, "other").await?.is_some());

    let all = Execution::find_for_event(&pool, event.id).await?;
    assert_eq!(all.len(), 2);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn execution_status_transitions(pool: PgPool) -> sqlx::Result<()> {
    let event = Event::enqueue(&pool, NewEvent::new("users.insert", json!({}))).await?;
    let sent = Execution::claim(&pool, event.id, "welcome").await?.unwrap();
    let failed = Execution::claim(&pool, event.id, "upsell").await?.unwrap();

    Execution::mark_sent(&pool, sent.id, Some(42)).await?;
    Execution::mark_failed(&pool, failed.id, "executor rejected dispatch (status 422)").await?;

    let sent = Execution::find_by_idempotency_key(&pool, &sent.idempotency_key)
        .await?
        .unwrap();
    assert_eq!(sent.status, "sent");
    assert_eq!(sent.tokens_used, Some(42));
    assert!(sent.parsed_status().unwrap().is_terminal());

    let failed = Execution::find_by_idempotency_key(&pool, &failed.idempotency_key)
        .await?
        .unwrap();
    assert_eq!(failed.status, "failed");
    assert!(failed.error_message.unwrap().contains("422"));
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn dead_letter_is_written_exactly_once(pool: PgPool) -> sqlx::Result<()> {
    let event = Event::enqueue(&pool, NewEvent::new("users.insert", json!({"k": "v"}))).await?;

    assert!(DeadLetterEntry::record(&pool, &event, "exhausted 3 attempts").await?);
    // A second write (overlapping run) is a no-op.
    assert!(!DeadLetterEntry::record(&pool, &event, "exhausted 3 attempts").await?);

    let entry = DeadLetterEntry::find_by_event_id(&pool, event.id)
        .await?
        .unwrap();
    assert_eq!(entry.event_type, "users.insert");
    assert_eq!(entry.payload, json!({"k": "v"}));
    assert_eq!(entry.failure_reason, "exhausted 3 attempts");

    assert_eq!(DeadLetterEntry::list_recent(&pool, 10).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn attribution_is_one_per_execution(pool: PgPool) -> sqlx::Result<()> {
    let event = Event::enqueue(&pool, NewEvent::new("users.insert", json!({}))).await?;
    let execution = Execution::claim(&pool, event.id, "welcome").await?.unwrap();

    let first = Attribution::record(&pool, execution.id, "subscription.created", Some(49.0)).await?;
    // Re-recording replaces rather than appending.
    let second = Attribution::record(&pool, execution.id, "subscription.upgraded", Some(99.0)).await?;
    assert_eq!(second.id, first.id);

    let found = Attribution::find_for_execution(&pool, execution.id)
        .await?
        .unwrap();
    assert_eq!(found.conversion_event, "subscription.upgraded");
    assert_eq!(found.conversion_value, Some(99.0));
    Ok(())
}
