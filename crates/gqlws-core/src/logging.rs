//! `tracing` subscriber bootstrap.
//!
//! Connection tasks log inside a span carrying `connection_id`; operation
//! tasks add `operation_id` to their events. Output goes to stderr.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json` the output is one JSON
/// object per line, otherwise compact human-readable text.
///
/// Call once at startup; later calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already set
    let _ = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.compact().try_init()
    };
}
