//! Integration tests for sensor-ws.
//!
//! These tests drive the connection manager through:
//! - A scripted in-process transport (lifecycle and timing)
//! - A local WebSocket server (real transport)

pub mod common;
