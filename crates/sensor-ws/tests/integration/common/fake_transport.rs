//! Scripted in-process transport.
//!
//! Every `open` is recorded as an attempt. The test then decides what the
//! "network" does with the latest attempt: accept it, refuse it, deliver
//! frames or drop it.

use parking_lot::Mutex;
use sensor_ws::{events, ConnectionManager, Transport, TransportEvents, TransportLink, WsError, WsResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct LinkState {
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

struct FakeLink(Arc<LinkState>);

impl TransportLink for FakeLink {
    fn send(&self, text: String) -> WsResult<()> {
        if !self.0.open.load(Ordering::SeqCst) {
            return Err(WsError::NotConnected);
        }
        self.0.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.0.open.store(false, Ordering::SeqCst);
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.0.open.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct Attempt {
    pub url: String,
    pub events: TransportEvents,
    pub link: Arc<LinkState>,
}

/// Cloneable: the manager owns one clone, the test keeps another.
#[derive(Clone, Default)]
pub struct FakeTransport {
    attempts: Arc<Mutex<Vec<Attempt>>>,
}

impl Transport for FakeTransport {
    fn open(&self, url: &str, events: TransportEvents) -> Box<dyn TransportLink> {
        let link = Arc::new(LinkState::default());
        self.attempts.lock().push(Attempt {
            url: url.to_string(),
            events,
            link: link.clone(),
        });
        Box::new(FakeLink(link))
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt(&self, index: usize) -> Attempt {
        self.attempts.lock()[index].clone()
    }

    fn latest(&self) -> Attempt {
        self.attempts
            .lock()
            .last()
            .cloned()
            .expect("transport was never opened")
    }

    /// Complete the latest open successfully.
    pub fn accept(&self) {
        let attempt = self.latest();
        attempt.link.open.store(true, Ordering::SeqCst);
        attempt.events.opened();
    }

    /// Fail the latest open.
    pub fn refuse(&self) {
        let attempt = self.latest();
        attempt.events.error("connection refused");
        attempt.events.closed(1006, "connection refused");
    }

    /// Deliver a text frame on the latest link.
    pub fn deliver(&self, text: &str) {
        self.latest().events.frame(text);
    }

    /// Drop the latest link from the remote side.
    pub fn drop_connection(&self, code: u16, reason: &str) {
        let attempt = self.latest();
        attempt.link.open.store(false, Ordering::SeqCst);
        attempt.events.closed(code, reason);
    }

    /// Frames sent over the latest link.
    pub fn sent(&self) -> Vec<String> {
        self.latest().link.sent.lock().clone()
    }

    pub fn link_closed(&self, index: usize) -> bool {
        self.attempt(index).link.closed.load(Ordering::SeqCst)
    }
}

/// Records every bus event in emission order.
#[derive(Clone, Default)]
pub struct EventRecorder {
    log: Arc<Mutex<Vec<(String, Value)>>>,
}

impl EventRecorder {
    pub fn attach(manager: &ConnectionManager) -> Self {
        let recorder = Self::default();
        for name in events::ALL {
            let log = recorder.log.clone();
            manager.subscribe(name, move |payload| {
                log.lock().push((name.to_string(), payload.clone()));
            });
        }
        recorder
    }

    pub fn names(&self) -> Vec<String> {
        self.log.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn payloads(&self, event: &str) -> Vec<Value> {
        self.log
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.payloads(event).len()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}
