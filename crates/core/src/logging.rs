//! Structured logging setup for zk-pass services.
//!
//! Call one of these once from the binary's `main`; libraries in this
//! workspace only emit `tracing` events and never install a subscriber.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter_or(default_level: &str) -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok(), default_level)
}

/// An unparsable directive falls back to `default_level`.
fn filter_from(directive: Option<String>, default_level: &str) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}

/// Initialize human-readable logging.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use zkpass_core::logging;
///
/// logging::init();
/// tracing::info!("Relying party started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter_or("info"))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging for log aggregation.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter_or("info"))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging from the `[logging]` config section. `RUST_LOG`
/// still takes precedence over the configured level.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    let filter = filter_or(&config.level);
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    }
}
