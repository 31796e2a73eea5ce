//! Structured logging setup for processor hosts.
//!
//! - `LOG_FORMAT=json` switches to JSON lines for log aggregation
//! - `RUST_LOG` filters as usual (default: `info`),
//!   e.g. `RUST_LOG=mp_processor=debug`
//!
//! Processor code logs through `tracing` with structured fields so that
//! every entry about a delivery carries the group it belongs to:
//!
//! ```rust,ignore
//! mp_common::logging::init_logging("order-processor");
//! tracing::error!(group = %name, error = %e, "Unexpected error while processing message");
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Install the global subscriber for `service_name`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(service_name: &str) {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let installed = if json {
        init_json_logging(default_filter())
    } else {
        init_text_logging(default_filter())
    };

    if installed {
        tracing::info!(service = %service_name, json, "Logging initialized");
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
        .is_ok()
}

fn init_text_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true),
        )
        .try_init()
        .is_ok()
}

/// Subscriber for tests: captures output through the test harness writer.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_test_writer()
        .try_init();
}
