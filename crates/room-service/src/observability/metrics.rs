//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rs_` prefix for room service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (controller, room, session)
//! - `type`: 7 values (envelope variants)
//! - `result`: accepted, denied, rejected
//! - `reason`: bounded drop reasons defined in this crate
//!
//! Room ids and peer ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rs_message".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room & Peer Metrics (Gauges)
// ============================================================================

/// Set the number of active rooms.
///
/// Metric: `rs_rooms_active`
pub fn set_rooms_active(count: u64) {
    // u64 to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rs_rooms_active").set(count as f64);
}

/// Set the number of peers joined to a room.
///
/// Metric: `rs_peers_active`
pub fn set_peers_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rs_peers_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rs_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rs_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Signaling Metrics (Counters)
// ============================================================================

/// Record an inbound envelope.
///
/// Metric: `rs_envelopes_total`
/// Labels: `type`
pub fn record_envelope(envelope_type: &str) {
    counter!("rs_envelopes_total", "type" => envelope_type.to_string()).increment(1);
}

/// Record the outcome of a join request.
///
/// Metric: `rs_joins_total`
/// Labels: `result` (accepted, denied, rejected)
pub fn record_join(result: &str) {
    counter!("rs_joins_total", "result" => result.to_string()).increment(1);
}

/// Record a message dropped instead of delivered.
///
/// Metric: `rs_messages_dropped_total`
/// Labels: `reason`
pub fn record_message_dropped(reason: &str) {
    counter!("rs_messages_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an actor panic.
///
/// Metric: `rs_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("rs_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record how long the session actor spent on one inbound envelope.
///
/// Metric: `rs_message_latency_seconds`
/// Labels: `type`
pub fn record_message_latency(envelope_type: &str, duration: Duration) {
    histogram!("rs_message_latency_seconds", "type" => envelope_type.to_string())
        .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    fn recorded_names(f: impl FnOnce()) -> Vec<String> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect()
    }

    #[test]
    fn test_functions_run_without_recorder() {
        set_rooms_active(0);
        set_peers_active(10);
        set_actor_mailbox_depth("room", 5);
        record_envelope("join");
        record_join("accepted");
        record_message_dropped("slow_consumer");
        record_actor_panic("session");
        record_message_latency("join", Duration::from_millis(3));
    }

    #[test]
    fn test_metric_names() {
        let names = recorded_names(|| {
            set_rooms_active(3);
            set_peers_active(7);
            record_envelope("join");
            record_join("denied");
            record_message_dropped("unknown_target");
        });

        for expected in [
            "rs_rooms_active",
            "rs_peers_active",
            "rs_envelopes_total",
            "rs_joins_total",
            "rs_messages_dropped_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
    }

    #[test]
    fn test_operational_metric_names() {
        let names = recorded_names(|| {
            set_actor_mailbox_depth("controller", 1);
            record_actor_panic("room");
            record_message_latency("leave", Duration::from_micros(250));
        });

        assert!(names.iter().any(|n| n == "rs_actor_mailbox_depth"));
        assert!(names.iter().any(|n| n == "rs_actor_panics_total"));
        assert!(names.iter().any(|n| n == "rs_message_latency_seconds"));
    }
}
