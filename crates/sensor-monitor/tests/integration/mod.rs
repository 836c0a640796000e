//! Integration tests for sensor-monitor.
//!
//! These tests run the application against a local WebSocket server:
//! - Sensor subscriptions on connect and reconnect
//! - Exit once reconnection gives up

pub mod common;
