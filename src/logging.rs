//! Environment-aware structured logging.
//!
//! Console output for interactive use plus an optional JSON file layer for
//! post-hoc inspection of batch runs. Initialization is guarded so repeated
//! calls (library embedders, tests) are harmless.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize tracing with console output and, when a log directory is
/// writable, a JSON file layer named by environment, PID, and timestamp.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let default_level = default_log_level(&environment);

        let console_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.clone()));

        let file_layer = build_file_layer(&environment, &default_level);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_filter(console_filter),
            )
            .with(file_layer);

        // A global subscriber may already be set by an embedding application;
        // that is not an error.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

fn build_file_layer<S>(environment: &str, default_level: &str) -> Option<impl Layer<S>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let log_dir = PathBuf::from("log");
    if !log_dir.exists() && fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let filename = format!(
        "{}.{}.{}.log",
        environment,
        process::id(),
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let file_appender = tracing_appender::rolling::never(&log_dir, filename);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the process lifetime.
    std::mem::forget(guard);

    Some(
        fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_ansi(false)
            .json()
            .with_filter(EnvFilter::new(default_level.to_string())),
    )
}

fn get_environment() -> String {
    std::env::var("SHADOW_MIRROR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}
