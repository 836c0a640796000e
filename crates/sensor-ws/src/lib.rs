//! Real-time push connection for the sensor dashboard.
//!
//! Provides:
//! - A named-event bus with panic-isolated subscribers
//! - A bounded history of inbound frames
//! - Connection lifecycle with fixed-delay reconnection
//! - Frame classification into `sensor_update` / `anomaly` events
//!
//! Consumers hold a [`ConnectionManager`] and listen on the event names in
//! [`message::events`].

pub mod buffer;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod message;
pub mod transport;
pub mod ws_transport;

pub use buffer::{BufferedMessage, MessageBuffer, DEFAULT_BUFFER_CAPACITY};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStats};
pub use error::{WsError, WsResult};
pub use event_bus::{Callback, EventBus, FailureHook, Subscription};
pub use message::{
    events, ConnectedEvent, ControlRequest, DisconnectedEvent, ErrorEvent, FrameKind,
    InboundFrame, MaxReconnectAttemptsEvent,
};
pub use transport::{Transport, TransportEvents, TransportLink};
pub use ws_transport::WsTransport;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
