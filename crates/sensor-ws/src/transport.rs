//! Transport abstraction.
//!
//! The connection manager never touches a socket directly. A [`Transport`]
//! opens links and reports their progress through [`TransportEvents`], which
//! keeps the state machine testable without a network.

use crate::error::WsResult;
use std::sync::Weak;

/// Opens bidirectional push links.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a link to `url` and return immediately.
    ///
    /// Implementations report through `events`: `opened` once the link is
    /// usable, `frame` for each inbound text frame in arrival order, `error`
    /// for diagnostics, and exactly one `closed` when the link ends. A failed
    /// open is reported as `closed` without a preceding `opened`.
    ///
    /// Reporting from inside `open` is allowed. An `opened` reported there
    /// takes effect once the returned link is installed, so `connected`
    /// subscribers can already send. Frames should not be reported before
    /// `open` returns; they arrive ahead of the open and are dropped.
    fn open(&self, url: &str, events: TransportEvents) -> Box<dyn TransportLink>;
}

/// One opened (or opening) link.
#[cfg_attr(test, mockall::automock)]
pub trait TransportLink: Send + Sync {
    /// Queue a text frame for transmission.
    fn send(&self, text: String) -> WsResult<()>;

    /// Close the link. Must not report back through [`TransportEvents`]
    /// synchronously.
    fn close(&self);

    /// Whether the link is currently open for traffic.
    fn is_open(&self) -> bool;
}

/// Receiver side of transport callbacks, implemented by the connection manager.
pub(crate) trait EventSink: Send + Sync {
    fn on_open(&self, generation: u64);
    fn on_frame(&self, generation: u64, text: &str);
    fn on_error(&self, generation: u64, message: &str);
    fn on_close(&self, generation: u64, code: u16, reason: &str);
}

/// Callback handle passed to [`Transport::open`].
///
/// Each handle is bound to one connection generation. Calls made after the
/// manager moved on (disconnect, newer attempt) or after it was dropped are
/// ignored.
#[derive(Clone)]
pub struct TransportEvents {
    sink: Weak<dyn EventSink>,
    generation: u64,
}

impl TransportEvents {
    pub(crate) fn new(sink: Weak<dyn EventSink>, generation: u64) -> Self {
        Self { sink, generation }
    }

    /// Connection generation this handle reports for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn opened(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_open(self.generation);
        }
    }

    pub fn frame(&self, text: &str) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_frame(self.generation, text);
        }
    }

    pub fn error(&self, message: &str) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_error(self.generation, message);
        }
    }

    pub fn closed(&self, code: u16, reason: &str) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_close(self.generation, code, reason);
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .finish()
    }
}
