//! Tracing initialization for CLI applications.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing.
///
/// Uses the `RUST_LOG` environment variable for filtering, defaulting to
/// `default_level`. Logs go to stderr; stdout is left to command output.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}
