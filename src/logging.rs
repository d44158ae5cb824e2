use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs the stdout and daily rolling file layers used by long-running tools.
pub fn configure_logging(log_dir: &str) {
    // Stdout log configuration
    let stdout_log = fmt::layer().with_writer(io::stdout).with_filter(EnvFilter::new(
        "info,funnel_linking=info,db_query=warn,sqlx=off",
    ));

    // File log configuration
    let file_appender = rolling::daily(log_dir, "funnelmap.log");
    let file_log = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new("funnel_linking=debug,db_query=debug,info,sqlx=info"));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}

/// Lightweight stdout-only logging for CLI tools.
///
/// `RUST_LOG` still wins when set; otherwise everything at `level` and above is shown,
/// with sqlx kept quiet.
pub fn setup_logging(app_name: &str, level: Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", level.as_str().to_lowercase())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging for {}: {}", app_name, e))
}
