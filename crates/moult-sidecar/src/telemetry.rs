//! Structured logging for the sidecar.
//!
//! Operator visibility for this process is its logs and its exit status,
//! so telemetry is a single JSON `tracing` layer on stdout; orchestrators
//! collect it like any other container log stream.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter() -> EnvFilter {
    EnvFilter::new("info,moult_sidecar=debug,moult_handoff=debug")
}

fn build_log_filter() -> EnvFilter {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| default_filter());
    }

    if let Ok(level_or_filter) = std::env::var("MOULT_LOG_LEVEL") {
        let level_or_filter = level_or_filter.trim();
        if !level_or_filter.is_empty() {
            let filter = if level_or_filter.contains('=') || level_or_filter.contains(',') {
                level_or_filter.to_string()
            } else {
                format!(
                    "{level},moult_sidecar={level},moult_handoff={level}",
                    level = level_or_filter
                )
            };
            return EnvFilter::try_new(filter).unwrap_or_else(|_| default_filter());
        }
    }

    default_filter()
}

/// Initialize JSON logging.
///
/// # Configuration
///
/// - `RUST_LOG`: full filter directive, takes precedence
/// - `MOULT_LOG_LEVEL`: a bare level (`debug`) or a filter string
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(build_log_filter())
        .with(fmt_layer)
        .init();

    tracing::info!("telemetry initialized with JSON logging");

    Ok(())
}
