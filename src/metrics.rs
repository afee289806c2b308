//! Metrics for observability.
//!
//! Emits through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.
//!
//! - Mirror sessions (connects, reconnects)
//! - Sentences read, by class
//! - Pending commands and mirrored entries
//! - Synchronization passes and the mutations they apply
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track durations

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a device session attempt.
pub fn record_session_start(target: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_sessions_total", "target" => target.to_string(), "status" => status).increment(1);
}

/// Record a session loss followed by a reconnect delay.
pub fn record_reconnect(target: &str) {
    counter!("mirror_reconnects_total", "target" => target.to_string()).increment(1);
}

/// Record one sentence read from the device, by tag class.
pub fn record_sentence(target: &str, class: &'static str) {
    counter!("mirror_sentences_total", "target" => target.to_string(), "class" => class).increment(1);
}

/// Record a reply whose tag had no pending command.
pub fn record_unknown_tag(target: &str) {
    counter!("mirror_unknown_tags_total", "target" => target.to_string()).increment(1);
}

/// Record a command rejected by the device.
pub fn record_command_trap(target: &str) {
    counter!("mirror_command_traps_total", "target" => target.to_string()).increment(1);
}

/// Number of commands awaiting acknowledgment.
pub fn set_pending_commands(target: &str, count: usize) {
    gauge!("mirror_pending_commands", "target" => target.to_string()).set(count as f64);
}

/// Number of records currently mirrored.
pub fn set_mirrored_entries(target: &str, count: usize) {
    gauge!("mirror_entries", "target" => target.to_string()).set(count as f64);
}

/// Record how long a reconciliation sweep held the store lock.
pub fn record_reconcile(target: &str, duration: Duration) {
    histogram!("mirror_reconcile_duration_seconds", "target" => target.to_string())
        .record(duration.as_secs_f64());
}

/// Record a completed synchronization pass.
pub fn record_sync_pass(set: usize, deleted: usize, duration: Duration) {
    counter!("mirror_sync_passes_total", "status" => "success").increment(1);
    counter!("mirror_sync_mutations_total", "op" => "set").increment(set as u64);
    counter!("mirror_sync_mutations_total", "op" => "delete").increment(deleted as u64);
    histogram!("mirror_sync_pass_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed synchronization pass.
pub fn record_sync_failure() {
    counter!("mirror_sync_passes_total", "status" => "failure").increment(1);
}

/// Record a store watch failure.
pub fn record_watch_error(store: &str) {
    counter!("mirror_watch_errors_total", "store" => store.to_string()).increment(1);
}
