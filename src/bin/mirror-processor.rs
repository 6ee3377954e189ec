//! One-shot processor invocation.
//!
//! Drains a single batch and exits; an external scheduler (cron, pg_cron
//! calling out, a k8s CronJob) owns the cadence. Overlapping invocations are
//! safe by design.

use anyhow::Context;
use tracing::info;

use shadow_mirror::config::MirrorConfig;
use shadow_mirror::processor::Processor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shadow_mirror::logging::init_structured_logging();

    let config = MirrorConfig::load().context("loading configuration")?;
    let pool = shadow_mirror::database::connect(config.database_url()?, &config.database)
        .await
        .context("connecting to database")?;
    shadow_mirror::database::migrate(&pool)
        .await
        .context("applying migrations")?;

    let processor = Processor::from_config(pool, &config);
    let outcome = processor.run_batch().await.context("running batch")?;

    info!(
        selected = outcome.selected,
        processed = outcome.processed,
        failed = outcome.failed,
        dead_lettered = outcome.dead_lettered,
        dispatched = outcome.dispatched,
        "invocation finished"
    );
    Ok(())
}
