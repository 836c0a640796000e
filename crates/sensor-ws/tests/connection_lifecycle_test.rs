//! Connection lifecycle tests against a scripted transport.
//!
//! Tests run on a paused Tokio clock so reconnect timing is exact:
//! - Event ordering and classification
//! - Reconnect scheduling and exhaustion
//! - Intentional disconnect and stale transport callbacks

mod integration;
use integration::common::fake_transport::{EventRecorder, FakeTransport};

use parking_lot::Mutex;
use sensor_ws::{events, ConnectionConfig, ConnectionManager, ConnectionState, WsError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SENSOR_UPDATE_FRAME: &str = r#"{"type":"sensor_update","data":{"sensor_id":3,"value":41.2}}"#;

fn setup(max_reconnect_attempts: u32) -> (ConnectionManager, FakeTransport, EventRecorder) {
    let config = ConnectionConfig {
        url: "ws://sensors.test/ws/sensors/".to_string(),
        reconnect_delay_ms: 3000,
        max_reconnect_attempts,
        buffer_capacity: 100,
    };
    let transport = FakeTransport::new();
    let manager = ConnectionManager::with_transport(config, transport.clone()).unwrap();
    let recorder = EventRecorder::attach(&manager);
    (manager, transport, recorder)
}

/// Let spawned timer tasks run.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_emits_connected_and_uses_configured_url() {
    let (manager, transport, recorder) = setup(10);

    manager.connect();
    assert_eq!(manager.connection_state(), ConnectionState::Connecting);
    assert_eq!(transport.attempt(0).url, "ws://sensors.test/ws/sensors/");

    transport.accept();

    assert_eq!(manager.connection_state(), ConnectionState::Connected);
    assert!(manager.is_connected());
    assert_eq!(recorder.names(), vec!["connected"]);
    assert!(recorder.payloads(events::CONNECTED)[0]["timestamp"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_sensor_update_fires_message_then_sensor_update() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();

    transport.deliver(SENSOR_UPDATE_FRAME);

    assert_eq!(recorder.names(), vec!["connected", "message", "sensor_update"]);
    assert_eq!(
        recorder.payloads(events::MESSAGE)[0],
        json!({"type": "sensor_update", "data": {"sensor_id": 3, "value": 41.2}})
    );
    assert_eq!(
        recorder.payloads(events::SENSOR_UPDATE)[0],
        json!({"sensor_id": 3, "value": 41.2})
    );

    let buffered = manager.buffered_messages(None);
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered[0].payload["data"]["sensor_id"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_anomaly_frame_fires_anomaly_event() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();

    transport.deliver(r#"{"type":"anomaly_detected","data":{"sensor_id":7,"severity":"high"}}"#);

    assert_eq!(
        recorder.payloads(events::ANOMALY),
        vec![json!({"sensor_id": 7, "severity": "high"})]
    );
    assert_eq!(recorder.count(events::SENSOR_UPDATE), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_frame_type_only_fires_message() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();

    transport.deliver(r#"{"type":"connection_established","message":"welcome"}"#);

    assert_eq!(recorder.names(), vec!["connected", "message"]);
    assert_eq!(manager.buffer_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_dropped_and_stream_continues() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();

    transport.deliver("{not json");
    transport.deliver(SENSOR_UPDATE_FRAME);

    assert_eq!(recorder.count(events::MESSAGE), 1);
    assert_eq!(recorder.count(events::SENSOR_UPDATE), 1);
    assert_eq!(manager.buffer_len(), 1);

    let stats = manager.stats();
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.frames_received, 1);
    assert!(stats.last_frame_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_subscriber_does_not_block_others() {
    let (manager, transport, _recorder) = setup(10);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let failures_clone = failures.clone();
    manager.on_subscriber_failure(Arc::new(move |event: &str, message: &str| {
        failures_clone
            .lock()
            .push((event.to_string(), message.to_string()));
    }));
    manager.subscribe(events::SENSOR_UPDATE, |_| panic!("widget exploded"));
    let seen_clone = seen.clone();
    manager.subscribe(events::SENSOR_UPDATE, move |payload| {
        seen_clone.lock().push(payload["value"].clone());
    });

    manager.connect();
    transport.accept();
    transport.deliver(SENSOR_UPDATE_FRAME);
    transport.deliver(SENSOR_UPDATE_FRAME);

    assert_eq!(*seen.lock(), vec![json!(41.2), json!(41.2)]);
    let failures = failures.lock();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, "sensor_update");
    assert!(failures[0].1.contains("widget exploded"));
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_can_send_from_connected_handler() {
    let (manager, transport, _recorder) = setup(10);
    let handle = manager.clone();
    manager.subscribe(events::CONNECTED, move |_| {
        handle.subscribe_sensor(7).unwrap();
    });

    manager.connect();
    transport.accept();

    assert_eq!(transport.sent(), vec![r#"{"type":"subscribe","sensor_id":7}"#]);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_fails() {
    let (manager, transport, _recorder) = setup(10);

    assert!(matches!(
        manager.send(&json!({"type": "ping"})),
        Err(WsError::NotConnected)
    ));
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let (manager, transport, recorder) = setup(10);

    manager.connect();
    manager.connect();
    assert_eq!(transport.open_count(), 1);

    transport.accept();
    manager.connect();

    assert_eq!(transport.open_count(), 1);
    assert_eq!(recorder.count(events::CONNECTED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_close_reconnects_after_delay() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();

    transport.drop_connection(1006, "connection reset");

    assert_eq!(manager.connection_state(), ConnectionState::Reconnecting);
    assert_eq!(manager.reconnect_attempts(), 1);
    assert_eq!(
        recorder.payloads(events::DISCONNECTED),
        vec![json!({"code": 1006, "reason": "connection reset"})]
    );
    assert!(!manager.is_connected());

    advance_ms(2990).await;
    assert_eq!(transport.open_count(), 1);

    advance_ms(10).await;
    assert_eq!(transport.open_count(), 2);
    assert_eq!(manager.connection_state(), ConnectionState::Connecting);

    transport.accept();
    assert_eq!(manager.connection_state(), ConnectionState::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(recorder.count(events::CONNECTED), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_after_max_attempts() {
    let (manager, transport, recorder) = setup(3);

    manager.connect();
    transport.refuse();
    assert_eq!(manager.connection_state(), ConnectionState::Reconnecting);

    for retry in 1..=3 {
        advance_ms(2990).await;
        assert_eq!(transport.open_count(), retry);
        advance_ms(10).await;
        assert_eq!(transport.open_count(), retry + 1);
        transport.refuse();
    }

    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        recorder.payloads(events::MAX_RECONNECT_ATTEMPTS),
        vec![json!({"attempts": 3})]
    );
    assert_eq!(recorder.count(events::DISCONNECTED), 0);
    assert_eq!(recorder.count(events::ERROR), 4);

    advance_ms(60_000).await;
    assert_eq!(transport.open_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_zero_max_attempts_never_retries() {
    let (manager, transport, recorder) = setup(0);

    manager.connect();
    transport.refuse();

    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        recorder.payloads(events::MAX_RECONNECT_ATTEMPTS),
        vec![json!({"attempts": 0})]
    );

    advance_ms(10_000).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_exhaustion_keeps_attempt_count() {
    let (manager, transport, recorder) = setup(1);

    manager.connect();
    transport.refuse();
    advance_ms(3000).await;
    transport.refuse();
    assert_eq!(recorder.count(events::MAX_RECONNECT_ATTEMPTS), 1);

    manager.connect();
    assert_eq!(transport.open_count(), 3);
    transport.refuse();

    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        recorder.payloads(events::MAX_RECONNECT_ATTEMPTS),
        vec![json!({"attempts": 1}), json!({"attempts": 1})]
    );

    manager.connect();
    transport.accept();
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_reconnecting_cancels_retry() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();
    transport.drop_connection(1011, "server restart");
    assert_eq!(manager.connection_state(), ConnectionState::Reconnecting);
    recorder.clear();

    manager.disconnect();

    assert_eq!(manager.connection_state(), ConnectionState::Closed);
    advance_ms(30_000).await;
    assert_eq!(transport.open_count(), 1);
    assert!(recorder.names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_connected_emits_client_close() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();

    manager.disconnect();

    assert!(transport.link_closed(0));
    assert_eq!(manager.connection_state(), ConnectionState::Closed);
    assert_eq!(
        recorder.payloads(events::DISCONNECTED),
        vec![json!({"code": 1000, "reason": "Client disconnect"})]
    );

    // Transport confirms the close afterwards; nothing else happens.
    transport.drop_connection(1000, "Client disconnect");
    advance_ms(10_000).await;
    assert_eq!(recorder.count(events::DISCONNECTED), 1);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_ignores_late_open() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();

    manager.disconnect();
    transport.accept();
    transport.deliver(SENSOR_UPDATE_FRAME);

    assert!(transport.link_closed(0));
    assert_eq!(manager.connection_state(), ConnectionState::Closed);
    assert!(recorder.names().is_empty());
    assert_eq!(manager.buffer_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_transport_callbacks_are_ignored() {
    let (manager, transport, recorder) = setup(10);
    manager.connect();
    transport.accept();
    manager.disconnect();
    manager.connect();
    assert_eq!(transport.open_count(), 2);
    recorder.clear();

    let stale = transport.attempt(0).events;
    stale.frame(SENSOR_UPDATE_FRAME);
    stale.error("late error");
    stale.closed(1006, "late close");

    assert!(recorder.names().is_empty());
    assert_eq!(manager.connection_state(), ConnectionState::Connecting);

    transport.accept();
    transport.deliver(SENSOR_UPDATE_FRAME);
    assert_eq!(recorder.names(), vec!["connected", "message", "sensor_update"]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_callback_stops_receiving() {
    let (manager, transport, _recorder) = setup(10);
    let count = Arc::new(Mutex::new(0));
    let count_clone = count.clone();
    let callback: sensor_ws::Callback = Arc::new(move |_: &serde_json::Value| *count_clone.lock() += 1);
    manager.subscribe_callback(events::MESSAGE, callback.clone());

    manager.connect();
    transport.accept();
    transport.deliver(SENSOR_UPDATE_FRAME);
    assert!(manager.unsubscribe(events::MESSAGE, &callback));
    transport.deliver(SENSOR_UPDATE_FRAME);

    assert_eq!(*count.lock(), 1);
    assert!(!manager.unsubscribe(events::MESSAGE, &callback));
}
