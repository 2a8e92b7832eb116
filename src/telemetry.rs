//! Telemetry initialization.
//!
//! Structured logging via `tracing`:
//! - `RUST_LOG` controls the filter (default `info`);
//! - `KEEL_LOG_FORMAT=json` switches to JSON lines on stderr, for
//!   machine consumption;
//! - anything else gets the human-readable formatter on stderr.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Install the global subscriber. Call once, from `main`. A second call
/// (e.g. in tests) is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("KEEL_LOG_FORMAT").is_ok_and(|v| v == "json");
    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        // A subscriber is already installed; keep it.
        tracing::debug!("telemetry already initialized");
    }
}
