//! Metrics definitions for the board service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `board_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `operation`: store commands (~12 values)
//! - `outcome`: fixed per metric (2-4 values)
//! - `kind`: sweep record kinds (4 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Store latency buckets - internal service call (p99 < 10ms)
        .set_buckets_for_metric(
            Matcher::Prefix("board_store".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of sockets connected to this node.
///
/// Metric: `board_sockets_active`
pub fn set_sockets_active(count: usize) {
    // usize to f64 conversion is safe for realistic socket counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("board_sockets_active").set(count as f64);
}

/// Record a syncer election outcome.
///
/// Metric: `board_elections_total`
/// Labels: `outcome` (won, lost, reaffirmed, ineligible, error)
pub fn record_election(outcome: &'static str) {
    counter!("board_elections_total", "outcome" => outcome).increment(1);
}

/// Record entries reclaimed by the sweep.
///
/// Metric: `board_sweep_cleared_total`
/// Labels: `kind` (presentation, recording, syncer, member)
pub fn record_sweep_cleared(kind: &'static str, count: usize) {
    if count > 0 {
        counter!("board_sweep_cleared_total", "kind" => kind).increment(count as u64);
    }
}

/// Record a store operation skipped because the backend was unreachable.
///
/// Metric: `board_store_unavailable_total`
/// Labels: `operation`
pub fn record_store_unavailable(operation: &'static str) {
    counter!("board_store_unavailable_total", "operation" => operation).increment(1);
}

/// Record store command latency.
///
/// Metric: `board_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &'static str, duration: Duration) {
    histogram!("board_store_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record the result of a forwarded recording stop.
///
/// Metric: `board_recording_forwards_total`
/// Labels: `outcome` (claimed, claimed_late, timeout, publish_failed)
pub fn record_recording_forward(outcome: &'static str) {
    counter!("board_recording_forwards_total", "outcome" => outcome).increment(1);
}

/// Record a cluster bus subscription being re-established.
///
/// Metric: `board_bus_resubscribes_total`
pub fn record_bus_resubscribe() {
    counter!("board_bus_resubscribes_total").increment(1);
}

/// Record an outbound event dropped because a socket's queue was full.
///
/// Metric: `board_events_dropped_total`
pub fn record_event_dropped() {
    counter!("board_events_dropped_total").increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Functions run against the global no-op recorder unless a local one is set.

    #[test]
    fn test_recording_functions_do_not_panic_without_recorder() {
        set_sockets_active(0);
        set_sockets_active(10_000);
        record_election("won");
        record_sweep_cleared("syncer", 0);
        record_store_unavailable("get");
        record_store_latency("set", Duration::from_millis(3));
        record_recording_forward("timeout");
        record_bus_resubscribe();
        record_event_dropped();
    }

    #[test]
    fn test_election_counter_increments_per_outcome() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_election("won");
            record_election("lost");
            record_election("lost");
        });

        let lost = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "board_elections_total"
                    && key.key().labels().any(|l| l.value() == "lost")
            })
            .map(|(_, _, _, value)| value);

        assert_eq!(lost, Some(DebugValue::Counter(2)));
    }

    #[test]
    fn test_sweep_cleared_skips_zero_counts() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_sweep_cleared("presentation", 0);
            record_sweep_cleared("recording", 3);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(snapshot.len(), 1);
        let (key, _, _, value) = snapshot.into_iter().next().unwrap();
        assert_eq!(key.key().name(), "board_sweep_cleared_total");
        assert_eq!(value, DebugValue::Counter(3));
    }
}
