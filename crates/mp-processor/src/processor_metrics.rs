//! Metrics for message processors
//!
//! Recorded through the `metrics` facade; a host installs whatever exporter
//! it wants. Without one these calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the outcome of one delivery
pub fn record_delivery(group: &str, outcome: &str, duration: Duration) {
    counter!(
        "mp_messages_processed_total",
        "group" => group.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        "mp_delivery_duration_seconds",
        "group" => group.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record time spent inside the handler
pub fn record_handler_duration(group: &str, duration: Duration) {
    histogram!(
        "mp_handler_duration_seconds",
        "group" => group.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a suppressed failure during cleanup (rollback, suspend, context return)
pub fn record_cleanup_failure(group: &str, step: &str) {
    counter!(
        "mp_cleanup_failures_total",
        "group" => group.to_string(),
        "step" => step.to_string()
    )
    .increment(1);
}

/// Record a start attempt
pub fn record_start(group: &str, success: bool) {
    counter!(
        "mp_processor_starts_total",
        "group" => group.to_string(),
        "result" => if success { "completed" } else { "failed" }
    )
    .increment(1);
}

/// Update the number of services consuming for a group
pub fn set_consuming_services(group: &str, count: usize) {
    gauge!(
        "mp_consuming_services",
        "group" => group.to_string()
    )
    .set(count as f64);
}
