//! Logging setup utilities for the Kairo chat client.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crate whose events are enabled by the default filter, next to the binary itself.
const CLIENT_CRATE: &str = "kairo_client";

/// Build the default filter directive used when `RUST_LOG` is not set.
///
/// Enables `default_log_level` for the client library crate and for the
/// binary named `binary_name`. Dashes are normalized to underscores because
/// tracing targets use module paths.
pub fn default_directive(binary_name: &str, default_log_level: &str) -> String {
    format!(
        "{}={},{}={}",
        CLIENT_CRATE,
        default_log_level,
        binary_name.replace('-', "_"),
        default_log_level
    )
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// The log level can be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "kairo-client")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use kairo_shared::logger::setup_logger;
///
/// setup_logger("kairo-client", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
