//! Connection manager.
//!
//! Owns the transport lifecycle, applies the fixed-delay reconnect policy,
//! and classifies inbound frames onto the event bus and message buffer.
//!
//! Transport callbacks, reconnect timer expiry and `connect`/`disconnect`
//! each run as one serialized turn under a re-entrant dispatch lock, which
//! gives the run-to-completion ordering of an event loop while still letting
//! subscribers call back into the manager from inside an emission. Mutable
//! state sits behind a second mutex that is released before any subscriber
//! runs.

use crate::buffer::{BufferedMessage, MessageBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::error::{WsError, WsResult};
use crate::event_bus::{Callback, EventBus, FailureHook, Subscription};
use crate::message::{
    events, to_payload, ConnectedEvent, ControlRequest, DisconnectedEvent, ErrorEvent,
    InboundFrame, MaxReconnectAttemptsEvent,
};
use crate::transport::{EventSink, Transport, TransportEvents, TransportLink};
use crate::ws_transport::WsTransport;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Close code reported for a disconnect requested by the client.
const CLIENT_CLOSE_CODE: u16 = 1000;

/// Connection configuration. Fixed for the lifetime of a manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Push endpoint URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Fixed delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Reconnection attempts before giving up (0 = never retry).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Retained inbound message history (0 keeps nothing).
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_url() -> String {
    "ws://localhost:8000/ws/sensors/".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Reject configurations the manager cannot run with.
    pub fn validate(&self) -> WsResult<()> {
        if self.url.trim().is_empty() {
            return Err(WsError::InvalidConfig("url must not be empty".to_string()));
        }
        if self.reconnect_delay_ms == 0 && self.max_reconnect_attempts > 0 {
            return Err(WsError::InvalidConfig(
                "reconnect_delay_ms must be positive when retries are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Torn down by `disconnect()`. Left only through `connect()`.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time connection statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub frames_received: u64,
    pub decode_failures: u64,
    pub buffered: usize,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub connected_since: Option<DateTime<Utc>>,
}

struct Core {
    state: ConnectionState,
    /// Bumped on every open and on disconnect. Callbacks carrying an older
    /// value are discarded.
    generation: u64,
    link: Option<Box<dyn TransportLink>>,
    reconnect_attempts: u32,
    intentionally_closed: bool,
    /// Present iff `state == Reconnecting`.
    retry_timer: Option<CancellationToken>,
    /// Generation whose `Transport::open` call has not returned yet.
    opening: Option<u64>,
    /// The transport reported `opened` before its link was installed.
    open_deferred: bool,
    frames_received: u64,
    decode_failures: u64,
    last_frame_at: Option<DateTime<Utc>>,
    connected_since: Option<DateTime<Utc>>,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            link: None,
            reconnect_attempts: 0,
            intentionally_closed: false,
            retry_timer: None,
            opening: None,
            open_deferred: false,
            frames_received: 0,
            decode_failures: 0,
            last_frame_at: None,
            connected_since: None,
        }
    }
}

impl Core {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

enum RetryOutcome {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    Suppressed,
}

struct ManagerInner {
    buffer: MessageBuffer,
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    bus: EventBus,
    core: Mutex<Core>,
    turn: ReentrantMutex<()>,
    this: Weak<ManagerInner>,
}

/// Real-time connection manager.
///
/// Create one per session and hand clones to consumers; every clone drives
/// the same connection. Consumers only see events and the narrow query
/// operations below, never the transport.
///
/// Timers and the default WebSocket transport are spawned on the current
/// Tokio runtime, so `connect` must be called from within one.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager using the WebSocket transport.
    pub fn new(config: ConnectionConfig) -> WsResult<Self> {
        Self::with_transport(config, WsTransport::new())
    }

    /// Create a manager on top of a custom transport.
    pub fn with_transport<T: Transport>(config: ConnectionConfig, transport: T) -> WsResult<Self> {
        config.validate()?;

        let inner = Arc::new_cyclic(|this| ManagerInner {
            buffer: MessageBuffer::new(config.buffer_capacity),
            config,
            transport: Box::new(transport),
            bus: EventBus::new(),
            core: Mutex::new(Core::default()),
            turn: ReentrantMutex::new(()),
            this: this.clone(),
        });

        Ok(Self { inner })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Start connecting.
    ///
    /// No-op while connecting, connected, or waiting on a scheduled retry.
    /// Outcomes are reported through events.
    pub fn connect(&self) {
        let inner = &self.inner;
        let _turn = inner.turn.lock();

        {
            let mut core = inner.core.lock();
            match core.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(state = %core.state, "Already connected or connecting");
                    return;
                }
                ConnectionState::Reconnecting => {
                    debug!(
                        attempt = core.reconnect_attempts,
                        "Reconnection already scheduled"
                    );
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::Closed => {}
            }
            core.intentionally_closed = false;
        }

        inner.open_transport();
    }

    /// Tear the connection down and suppress reconnection.
    ///
    /// Cancels any pending retry and closes the transport before returning.
    /// Late callbacks from the closed transport are ignored.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let _turn = inner.turn.lock();

        let (was_connected, link, timer) = {
            let mut core = inner.core.lock();
            if core.state == ConnectionState::Closed {
                return;
            }
            let was_connected = core.state == ConnectionState::Connected;
            core.intentionally_closed = true;
            core.generation += 1;
            core.state = ConnectionState::Closed;
            core.connected_since = None;
            (was_connected, core.link.take(), core.retry_timer.take())
        };

        if let Some(timer) = timer {
            timer.cancel();
            debug!("Cancelled pending reconnection");
        }
        if let Some(link) = link {
            link.close();
        }

        info!("Disconnected by request");

        if was_connected {
            inner.bus.emit(
                events::DISCONNECTED,
                &to_payload(&DisconnectedEvent {
                    code: CLIENT_CLOSE_CODE,
                    reason: "Client disconnect".to_string(),
                }),
            );
        }
    }

    /// Encode and transmit `message`.
    ///
    /// Fails with [`WsError::NotConnected`] unless connected. Nothing is
    /// queued for later delivery.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> WsResult<()> {
        let text = serde_json::to_string(message)?;
        self.send_text(text)
    }

    /// Transmit a pre-encoded text frame.
    pub fn send_text(&self, text: String) -> WsResult<()> {
        let core = self.inner.core.lock();
        let link = match (core.state, core.link.as_ref()) {
            (ConnectionState::Connected, Some(link)) => link,
            (state, _) => {
                warn!(%state, "Cannot send message - not connected");
                return Err(WsError::NotConnected);
            }
        };

        match link.send(text) {
            Ok(()) => {
                trace!("Message sent");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to send message");
                Err(e)
            }
        }
    }

    /// Ask the server to stream updates for `sensor_id`.
    pub fn subscribe_sensor(&self, sensor_id: u32) -> WsResult<()> {
        self.send(&ControlRequest::Subscribe { sensor_id })
    }

    /// Stop streaming updates for `sensor_id`.
    pub fn unsubscribe_sensor(&self, sensor_id: u32) -> WsResult<()> {
        self.send(&ControlRequest::Unsubscribe { sensor_id })
    }

    /// Request the latest reading for `sensor_id`.
    pub fn request_latest(&self, sensor_id: u32) -> WsResult<()> {
        self.send(&ControlRequest::GetLatest { sensor_id })
    }

    /// True only when connected over a live link.
    pub fn is_connected(&self) -> bool {
        let core = self.inner.core.lock();
        core.state == ConnectionState::Connected
            && core.link.as_ref().is_some_and(|link| link.is_open())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().reconnect_attempts
    }

    pub fn stats(&self) -> ConnectionStats {
        let core = self.inner.core.lock();
        ConnectionStats {
            state: core.state,
            reconnect_attempts: core.reconnect_attempts,
            frames_received: core.frames_received,
            decode_failures: core.decode_failures,
            buffered: self.inner.buffer.len(),
            last_frame_at: core.last_frame_at,
            connected_since: core.connected_since,
        }
    }

    /// Register `callback` for `event` (see [`crate::message::events`]).
    ///
    /// Callbacks run on the thread that dispatches the event while it holds
    /// the manager's dispatch lock. Calling back into the manager from the
    /// callback itself is fine. Blocking on another thread that calls
    /// `connect` or `disconnect` on this manager deadlocks; hand such work
    /// off through a channel instead.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(event, callback)
    }

    /// Like [`ConnectionManager::subscribe`], keeping the callback's identity.
    pub fn subscribe_callback(&self, event: &str, callback: Callback) -> Subscription {
        self.inner.bus.subscribe_callback(event, callback)
    }

    pub fn unsubscribe(&self, event: &str, callback: &Callback) -> bool {
        self.inner.bus.unsubscribe(event, callback)
    }

    /// Install the hook told about panicking subscribers.
    pub fn on_subscriber_failure(&self, hook: FailureHook) {
        self.inner.bus.set_failure_hook(hook);
    }

    /// Recent inbound frames, oldest first. `None` returns all of them.
    pub fn buffered_messages(&self, count: Option<usize>) -> Vec<BufferedMessage> {
        self.inner.buffer.snapshot(count)
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.buffer.len()
    }

    pub fn clear_buffer(&self) {
        self.inner.buffer.clear();
    }
}

impl ManagerInner {
    /// Start a new connection generation. Caller holds the dispatch turn.
    fn open_transport(&self) {
        let generation = {
            let mut core = self.core.lock();
            core.generation += 1;
            core.state = ConnectionState::Connecting;
            core.opening = Some(core.generation);
            core.open_deferred = false;
            core.generation
        };

        info!(url = %self.config.url, generation, "Connecting");

        let sink: Weak<dyn EventSink> = self.this.clone();
        let link = self
            .transport
            .open(&self.config.url, TransportEvents::new(sink, generation));

        let mut core = self.core.lock();
        if core.opening == Some(generation) {
            core.opening = None;
        }
        let deferred = std::mem::take(&mut core.open_deferred);
        let live = core.is_current(generation) && core.state == ConnectionState::Connecting;
        if live {
            core.link = Some(link);
            drop(core);
            if deferred {
                self.complete_open(generation);
            }
        } else {
            drop(core);
            link.close();
        }
    }

    /// Enter `Connected` for `generation` and announce it. Caller holds the dispatch turn.
    fn complete_open(&self, generation: u64) {
        let now = Utc::now();
        {
            let mut core = self.core.lock();
            if !core.is_current(generation) || core.state != ConnectionState::Connecting {
                debug!(generation, "Ignoring open from stale connection");
                return;
            }
            core.state = ConnectionState::Connected;
            core.reconnect_attempts = 0;
            core.connected_since = Some(now);
        }

        info!(generation, "Connected");
        self.bus
            .emit(events::CONNECTED, &to_payload(&ConnectedEvent { timestamp: now }));
    }

    /// Decide what follows a lost or failed connection. Sets the next state.
    fn schedule_reconnect(&self, core: &mut Core) -> RetryOutcome {
        if core.intentionally_closed {
            core.state = ConnectionState::Closed;
            return RetryOutcome::Suppressed;
        }

        if core.reconnect_attempts >= self.config.max_reconnect_attempts {
            core.state = ConnectionState::Disconnected;
            return RetryOutcome::Exhausted {
                attempts: core.reconnect_attempts,
            };
        }

        core.reconnect_attempts += 1;
        core.state = ConnectionState::Reconnecting;

        let delay = self.config.reconnect_delay();
        let token = CancellationToken::new();
        core.retry_timer = Some(token.clone());

        let this = self.this.clone();
        let generation = core.generation;
        let sleep = tokio::time::sleep(delay);
        tokio::spawn(async move {
            tokio::select! {
                () = sleep => {
                    if let Some(inner) = this.upgrade() {
                        inner.on_retry_timer(generation);
                    }
                }
                () = token.cancelled() => {}
            }
        });

        RetryOutcome::Scheduled {
            attempt: core.reconnect_attempts,
            delay,
        }
    }

    fn report_retry(&self, outcome: RetryOutcome) {
        match outcome {
            RetryOutcome::Scheduled { attempt, delay } => {
                info!(
                    attempt,
                    max = self.config.max_reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnection"
                );
            }
            RetryOutcome::Exhausted { attempts } => {
                error!(attempts, "Max reconnection attempts reached");
                self.bus.emit(
                    events::MAX_RECONNECT_ATTEMPTS,
                    &to_payload(&MaxReconnectAttemptsEvent { attempts }),
                );
            }
            RetryOutcome::Suppressed => {
                debug!("Reconnection suppressed after intentional close");
            }
        }
    }

    fn on_retry_timer(&self, generation: u64) {
        let _turn = self.turn.lock();

        let attempt = {
            let mut core = self.core.lock();
            if !core.is_current(generation) || core.state != ConnectionState::Reconnecting {
                debug!(generation, "Ignoring stale reconnect timer");
                return;
            }
            core.retry_timer = None;
            core.reconnect_attempts
        };

        info!(
            attempt,
            max = self.config.max_reconnect_attempts,
            "Attempting reconnection"
        );
        self.open_transport();
    }
}

impl EventSink for ManagerInner {
    fn on_open(&self, generation: u64) {
        let _turn = self.turn.lock();

        {
            let mut core = self.core.lock();
            if core.is_current(generation)
                && core.state == ConnectionState::Connecting
                && core.opening == Some(generation)
            {
                // Completed by open_transport once the link is installed.
                debug!(generation, "Open reported before link was installed, deferring");
                core.open_deferred = true;
                return;
            }
        }

        self.complete_open(generation);
    }

    fn on_frame(&self, generation: u64, text: &str) {
        let _turn = self.turn.lock();

        let frame = {
            let mut core = self.core.lock();
            if !core.is_current(generation) || core.state != ConnectionState::Connected {
                trace!(generation, "Dropping frame from stale connection");
                return;
            }
            match InboundFrame::decode(text) {
                Ok(frame) => {
                    core.frames_received += 1;
                    core.last_frame_at = Some(Utc::now());
                    frame
                }
                Err(e) => {
                    core.decode_failures += 1;
                    warn!(error = %e, len = text.len(), "Failed to decode frame, dropping");
                    return;
                }
            }
        };

        trace!(frame_type = ?frame.frame_type(), "Frame received");
        self.buffer.push(frame.as_value().clone());

        self.bus.emit(events::MESSAGE, frame.as_value());
        if let Some(event) = frame.kind().event_name() {
            // A `message` subscriber may have disconnected or reconnected.
            if !self.core.lock().is_current(generation) {
                return;
            }
            self.bus.emit(event, frame.data());
        }
    }

    fn on_error(&self, generation: u64, message: &str) {
        let _turn = self.turn.lock();

        {
            let core = self.core.lock();
            if !core.is_current(generation) || core.state == ConnectionState::Closed {
                return;
            }
        }

        warn!(generation, %message, "Transport error");
        self.bus.emit(
            events::ERROR,
            &to_payload(&ErrorEvent {
                message: message.to_string(),
            }),
        );
    }

    fn on_close(&self, generation: u64, code: u16, reason: &str) {
        let _turn = self.turn.lock();

        let (was_connected, outcome, link) = {
            let mut core = self.core.lock();
            let active = matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            if !core.is_current(generation) || !active {
                debug!(generation, code, "Ignoring close from stale connection");
                return;
            }
            let was_connected = core.state == ConnectionState::Connected;
            let link = core.link.take();
            core.connected_since = None;
            let outcome = self.schedule_reconnect(&mut core);
            (was_connected, outcome, link)
        };
        drop(link);

        if was_connected {
            warn!(code, %reason, "Connection closed unexpectedly");
            self.bus.emit(
                events::DISCONNECTED,
                &to_payload(&DisconnectedEvent {
                    code,
                    reason: reason.to_string(),
                }),
            );
        } else {
            warn!(code, %reason, "Connection attempt failed");
        }

        self.report_retry(outcome);
    }
}
