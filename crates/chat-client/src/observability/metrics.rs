//! Metrics definitions for the chat client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `chat_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized REST paths plus `/other`
//! - `status`: success, error, timeout
//! - `outcome`: bounded by the variants recorded here
//!
//! Without an installed recorder every call is a no-op.

use crate::message_stream::Delivery;
use crate::socket::ConnectionState;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// # Errors
///
/// Returns error if the recorder is already installed or the listener cannot
/// be started.
pub fn init_metrics_exporter(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Prefix("chat_api_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set API request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("chat_token_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set token refresh buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("chat_room_join".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000],
        )
        .map_err(|e| format!("Failed to set room join buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))
}

// ============================================================================
// REST
// ============================================================================

/// Record one REST round trip.
///
/// Metric: `chat_api_requests_total`, `chat_api_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// `status_code` is `None` when no response was received.
pub fn record_api_request(
    method: &str,
    endpoint: &str,
    status_code: Option<u16>,
    duration: Duration,
) {
    let endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("chat_api_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("chat_api_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.map_or_else(|| "none".to_string(), |c| c.to_string())
    )
    .increment(1);
}

fn categorize_status_code(status_code: Option<u16>) -> &'static str {
    match status_code {
        Some(200..=299) => "success",
        Some(408 | 504) | None => "timeout",
        Some(_) => "error",
    }
}

/// Replace room and member ids with placeholders.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/signup" => "/signup",
        "/login" => "/login",
        "/logout" => "/logout",
        "/refresh" => "/refresh",
        "/my-rooms" => "/my-rooms",
        "/room" => "/room",
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> &'static str {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        ["join_room", _] => "/join_room/{room}",
        ["leave_room", _] => "/leave_room/{room}",
        ["room", _, "members"] => "/room/{room}/members",
        ["room", _, "ban", _] => "/room/{room}/ban/{member}",
        ["room", _, "unban", _] => "/room/{room}/unban/{member}",
        ["room", _, "promote", _] => "/room/{room}/promote/{member}",
        ["room", _, "demote", _] => "/room/{room}/demote/{member}",
        _ => "/other",
    }
}

/// Record a refresh attempt.
///
/// Metric: `chat_token_refresh_total`, `chat_token_refresh_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_token_refresh(success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };

    histogram!("chat_token_refresh_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("chat_token_refresh_total", "status" => status).increment(1);
}

// ============================================================================
// Socket
// ============================================================================

/// Record the outcome of one connection attempt.
///
/// Metric: `chat_socket_connects_total`
/// Labels: `outcome` (connected, rejected, failed)
pub fn record_socket_connect(outcome: &'static str) {
    counter!("chat_socket_connects_total", "outcome" => outcome).increment(1);
}

/// Metric: `chat_socket_connected` (1 while connected)
pub fn set_connection_state(state: ConnectionState) {
    let value = if state == ConnectionState::Connected { 1.0 } else { 0.0 };
    gauge!("chat_socket_connected").set(value);
}

/// Record an inbound frame that was not delivered.
///
/// Metric: `chat_socket_frames_dropped_total`
/// Labels: `reason` (undecodable, unknown_event, superseded)
pub fn record_frame_dropped(reason: &'static str) {
    counter!("chat_socket_frames_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Membership and messages
// ============================================================================

/// Record how a join request ended.
///
/// Metric: `chat_room_joins_total`
/// Labels: `outcome` (joined, denied, cancelled, timeout)
pub fn record_room_join(outcome: &'static str) {
    counter!("chat_room_joins_total", "outcome" => outcome).increment(1);
}

/// Metric: `chat_rooms_joined`
#[allow(clippy::cast_precision_loss)]
pub fn set_rooms_joined(count: usize) {
    gauge!("chat_rooms_joined").set(count as f64);
}

/// Record what happened to a live message.
///
/// Metric: `chat_messages_delivered_total`
/// Labels: `delivery` (rendered, queued, duplicate, dropped)
pub fn record_message_delivery(delivery: Delivery) {
    let label = match delivery {
        Delivery::Rendered => "rendered",
        Delivery::Queued => "queued",
        Delivery::Duplicate => "duplicate",
        Delivery::Dropped => "dropped",
    };
    counter!("chat_messages_delivered_total", "delivery" => label).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_endpoint_normalization_bounds_ids() {
        assert_eq!(normalize_endpoint("/my-rooms"), "/my-rooms");
        assert_eq!(normalize_endpoint("/join_room/42"), "/join_room/{room}");
        assert_eq!(normalize_endpoint("/room/7/members"), "/room/{room}/members");
        assert_eq!(
            normalize_endpoint("/room/7/promote/member-3"),
            "/room/{room}/promote/{member}"
        );
        assert_eq!(normalize_endpoint("/room/7/dance/member-3"), "/other");
        assert_eq!(normalize_endpoint("/unknown"), "/other");
    }

    #[test]
    fn test_status_categories() {
        assert_eq!(categorize_status_code(Some(200)), "success");
        assert_eq!(categorize_status_code(Some(204)), "success");
        assert_eq!(categorize_status_code(Some(401)), "error");
        assert_eq!(categorize_status_code(Some(504)), "timeout");
        assert_eq!(categorize_status_code(None), "timeout");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_api_request("GET", "/my-rooms", Some(200), Duration::from_millis(20));
        record_api_request("POST", "/login", None, Duration::from_secs(10));
        record_token_refresh(false, Duration::from_millis(5));
        record_socket_connect("rejected");
        set_connection_state(ConnectionState::Errored);
        record_frame_dropped("undecodable");
        record_room_join("denied");
        set_rooms_joined(0);
        record_message_delivery(Delivery::Dropped);
    }

    #[test]
    fn test_counters_reach_local_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_room_join("joined");
            record_room_join("joined");
            record_message_delivery(Delivery::Queued);
            set_connection_state(ConnectionState::Connected);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let joins = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "chat_room_joins_total")
            .map(|(_, _, _, value)| value.clone());
        assert_eq!(joins, Some(&DebugValue::Counter(2)));

        let names: Vec<&str> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name())
            .collect();
        assert!(names.contains(&"chat_messages_delivered_total"));
        assert!(names.contains(&"chat_socket_connected"));
    }
}
