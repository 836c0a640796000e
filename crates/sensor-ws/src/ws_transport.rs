//! tokio-tungstenite implementation of [`Transport`].
//!
//! Each link is driven by its own task. Outbound frames travel through a
//! bounded channel; `send` never blocks and fails once the queue is full.
//! Closing is a cancellation token that makes the task send a Close frame
//! and exit.

use crate::error::{WsError, WsResult};
use crate::transport::{Transport, TransportEvents, TransportLink};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Close code used when the socket ends without a Close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Outbound frames queued per link before `send` starts failing.
const OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// WebSocket transport. Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, events: TransportEvents) -> Box<dyn TransportLink> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_link(
            url.to_string(),
            events,
            rx,
            shutdown.clone(),
            open.clone(),
        ));

        Box::new(WsLink { tx, shutdown, open })
    }
}

struct WsLink {
    tx: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    open: Arc<AtomicBool>,
}

impl TransportLink for WsLink {
    fn send(&self, text: String) -> WsResult<()> {
        if !self.is_open() {
            return Err(WsError::NotConnected);
        }
        self.tx.try_send(Message::Text(text)).map_err(|e| match e {
            TrySendError::Full(_) => {
                WsError::SendFailed(format!("outbound queue full ({OUTBOUND_QUEUE_CAPACITY} frames)"))
            }
            TrySendError::Closed(_) => WsError::SendFailed("link task has stopped".to_string()),
        })
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_link(
    url: String,
    events: TransportEvents,
    outbound: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
    open: Arc<AtomicBool>,
) {
    let generation = events.generation();
    info!(url = %url, generation, "Opening WebSocket");

    let result = tokio::select! {
        () = shutdown.cancelled() => {
            debug!(generation, "Link closed while opening");
            return;
        }
        result = connect_async_tls_with_config(url.as_str(), None, true, None) => result,
    };

    let ws_stream = match result {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            warn!(generation, error = %e, "WebSocket open failed");
            events.error(&e.to_string());
            events.closed(ABNORMAL_CLOSURE, &e.to_string());
            return;
        }
    };

    open.store(true, Ordering::Release);
    events.opened();

    let result = pump(ws_stream, &events, outbound, &shutdown).await;
    open.store(false, Ordering::Release);

    match result {
        Ok(()) => debug!(generation, "Link closed locally"),
        Err(WsError::ConnectionClosed { code, reason }) => {
            events.closed(code, &reason);
        }
        Err(e) => {
            error!(generation, error = %e, "WebSocket link failed");
            events.error(&e.to_string());
            events.closed(ABNORMAL_CLOSURE, &e.to_string());
        }
    }
}

/// Move frames in both directions until the link ends.
///
/// Returns `Ok(())` only when closed locally through the shutdown token.
async fn pump(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    events: &TransportEvents,
    mut outbound: mpsc::Receiver<Message>,
    shutdown: &CancellationToken,
) -> WsResult<()> {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    warn!(?e, "Failed to send Close frame");
                }
                return Ok(());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => events.frame(&text),
                    Some(Ok(Message::Binary(bytes))) => {
                        events.frame(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        return Err(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(WsError::ConnectionClosed {
                            code: ABNORMAL_CLOSURE,
                            reason: "Stream ended".to_string(),
                        });
                    }
                }
            }

            Some(msg) = outbound.recv() => {
                write.send(msg).await?;
            }
        }
    }
}
