//! Prometheus metrics for the sensor monitor.
//!
//! Covers:
//! - Push connection state and reconnection
//! - Inbound frame classification
//! - Per-sensor update and anomaly counts
//! - Subscriber and send failures
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_int_gauge, CounterVec, Gauge, GaugeVec, Histogram, IntGauge,
};

/// Connection states reported on [`WS_STATE`].
pub const WS_STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "connected",
    "reconnecting",
    "closed",
];

/// Push connection state (1 = connected, 0 = not connected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "sensor_ws_connected",
        "Push connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (see [`WS_STATES`])
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "sensor_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Reconnection outcomes.
/// Labels: reason (recovered/exhausted)
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_ws_reconnect_total",
        "Total reconnection outcomes",
        &["reason"]
    )
    .unwrap()
});

/// Established connections that ended, by close code.
pub static WS_DISCONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_ws_disconnect_total",
        "Total established connections that ended",
        &["code"]
    )
    .unwrap()
});

/// Decoded inbound frames by kind.
/// Labels: kind (sensor_update/anomaly_detected/other)
pub static WS_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_ws_frames_total",
        "Total decoded inbound frames",
        &["kind"]
    )
    .unwrap()
});

/// Malformed frames dropped during this session.
pub static WS_DECODE_FAILURES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sensor_ws_decode_failures",
        "Malformed inbound frames dropped"
    )
    .unwrap()
});

/// Outbound requests that could not be sent.
/// Labels: request (subscribe/unsubscribe/get_latest)
pub static WS_SEND_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_ws_send_failures_total",
        "Total outbound requests that could not be sent",
        &["request"]
    )
    .unwrap()
});

/// Messages currently held in the history buffer.
pub static MESSAGE_BUFFER_LEN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sensor_message_buffer_len",
        "Messages currently held in the history buffer"
    )
    .unwrap()
});

/// Event subscribers that panicked.
pub static SUBSCRIBER_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_subscriber_failures_total",
        "Total event subscriber failures",
        &["event"]
    )
    .unwrap()
});

/// Sensor updates received per sensor.
pub static SENSOR_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_updates_total",
        "Total sensor updates received",
        &["sensor_id"]
    )
    .unwrap()
});

/// Anomalies received per sensor and severity.
pub static SENSOR_ANOMALIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sensor_anomalies_total",
        "Total anomalies received",
        &["sensor_id", "severity"]
    )
    .unwrap()
});

/// Length of connected sessions in seconds (recorded when a session ends).
pub static WS_SESSION_DURATION_SECS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "sensor_ws_session_duration_secs",
        "Duration of connected sessions in seconds",
        vec![1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 14400.0, 86400.0]
    )
    .unwrap()
});

/// REST API health (1 = healthy).
pub static API_HEALTHY: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("sensor_api_healthy", "REST API health check result (1=healthy)").unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record connection established.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record connection lost.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set connection state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in &WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record a reconnection outcome.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record an established connection ending with `code`.
    pub fn ws_disconnect(code: u16) {
        WS_DISCONNECT_TOTAL
            .with_label_values(&[&code.to_string()])
            .inc();
    }

    /// Record a decoded inbound frame.
    pub fn frame_received(kind: &str) {
        WS_FRAMES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Mirror the dropped-frame count.
    pub fn decode_failures_set(count: u64) {
        WS_DECODE_FAILURES.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record an outbound request that could not be sent.
    pub fn send_failed(request: &str) {
        WS_SEND_FAILURES_TOTAL.with_label_values(&[request]).inc();
    }

    /// Set the history buffer length.
    pub fn buffer_len_set(len: usize) {
        MESSAGE_BUFFER_LEN.set(i64::try_from(len).unwrap_or(i64::MAX));
    }

    /// Record a subscriber failure on `event`.
    pub fn subscriber_failed(event: &str) {
        SUBSCRIBER_FAILURES_TOTAL.with_label_values(&[event]).inc();
    }

    /// Record a sensor update.
    pub fn sensor_update(sensor_id: &str) {
        SENSOR_UPDATES_TOTAL.with_label_values(&[sensor_id]).inc();
    }

    /// Record an anomaly.
    pub fn anomaly(sensor_id: &str, severity: &str) {
        SENSOR_ANOMALIES_TOTAL
            .with_label_values(&[sensor_id, severity])
            .inc();
    }

    /// Record the length of a connected session that just ended.
    pub fn session_ended(duration_secs: f64) {
        WS_SESSION_DURATION_SECS.observe(duration_secs);
    }

    /// Record the REST health check result.
    pub fn api_health(healthy: bool) {
        API_HEALTHY.set(if healthy { 1.0 } else { 0.0 });
    }
}
