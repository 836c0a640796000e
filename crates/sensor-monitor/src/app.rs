//! Main application orchestration.
//!
//! Bus subscribers only record logs and metrics. Anything that talks back
//! to the server (sensor subscriptions) is forwarded to the main loop over a
//! channel.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use sensor_api::SensorApiClient;
use sensor_telemetry::{Metrics, SessionStatsReporter};
use sensor_ws::{events, ConnectionManager, ConnectionState, FrameKind};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle changes the main loop acts on.
#[derive(Debug)]
enum LinkEvent {
    Connected,
    Disconnected { code: u16 },
    RetriesExhausted { attempts: u32 },
}

/// Main application.
pub struct Application {
    config: AppConfig,
    manager: ConnectionManager,
    api: SensorApiClient,
    stats: SessionStatsReporter,
}

impl Application {
    /// Create a new application. Does not connect.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let manager = ConnectionManager::new(config.connection.clone())?;
        let api = SensorApiClient::from_config(&config.api)?;
        let stats = SessionStatsReporter::new(config.sensor_labels());

        Ok(Self {
            config,
            manager,
            api,
            stats,
        })
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Probe the REST API and record the result. Never fails.
    pub async fn run_health_check(&self) -> bool {
        let healthy = self.api.health_check().await;
        Metrics::api_health(healthy);

        if healthy {
            info!(base_url = %self.api.base_url(), "REST API healthy");
        } else {
            warn!(base_url = %self.api.base_url(), "REST API unreachable, continuing with push stream only");
        }
        healthy
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(?e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Run until `shutdown` completes or reconnection gives up.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        let (link_tx, mut link_rx) = mpsc::unbounded_channel::<LinkEvent>();
        self.install_subscribers(link_tx);

        info!(
            url = %self.config.connection.url,
            sensors = ?self.config.sensors,
            "Starting sensor monitor"
        );
        Metrics::ws_state_set(ConnectionState::Connecting.as_str());
        self.manager.connect();

        let mut stats_interval = tokio::time::interval(self.config.stats_interval());
        stats_interval.tick().await;
        let mut session_started: Option<Instant> = None;
        let mut connections = 0u64;

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                Some(event) = link_rx.recv() => {
                    match event {
                        LinkEvent::Connected => {
                            connections += 1;
                            if connections > 1 {
                                Metrics::ws_reconnect("recovered");
                            }
                            session_started = Some(Instant::now());
                            self.subscribe_sensors();
                        }
                        LinkEvent::Disconnected { code } => {
                            Metrics::ws_disconnect(code);
                            if let Some(started) = session_started.take() {
                                Metrics::session_ended(started.elapsed().as_secs_f64());
                            }
                        }
                        LinkEvent::RetriesExhausted { attempts } => {
                            Metrics::ws_reconnect("exhausted");
                            break Err(AppError::RetriesExhausted(attempts));
                        }
                    }
                }

                _ = stats_interval.tick() => {
                    self.report_stats();
                }

                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        // Cleanup
        self.manager.disconnect();
        Metrics::ws_disconnected();
        Metrics::ws_state_set(ConnectionState::Closed.as_str());
        if let Some(started) = session_started {
            Metrics::session_ended(started.elapsed().as_secs_f64());
        }

        info!("Final statistics summary:");
        self.report_stats();

        result
    }

    /// Register logging and metrics subscribers on the manager.
    fn install_subscribers(&self, link_tx: mpsc::UnboundedSender<LinkEvent>) {
        let manager = &self.manager;

        manager.on_subscriber_failure(Arc::new(|event: &str, message: &str| {
            Metrics::subscriber_failed(event);
            debug!(event, %message, "Subscriber failure recorded");
        }));

        let tx = link_tx.clone();
        manager.subscribe(events::CONNECTED, move |_| {
            Metrics::ws_connected();
            Metrics::ws_state_set(ConnectionState::Connected.as_str());
            let _ = tx.send(LinkEvent::Connected);
        });

        let tx = link_tx.clone();
        manager.subscribe(events::DISCONNECTED, move |payload| {
            Metrics::ws_disconnected();
            let code = payload
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(0);
            let reason = payload.get("reason").and_then(Value::as_str).unwrap_or("");
            info!(code, reason, "Sensor stream disconnected");
            let _ = tx.send(LinkEvent::Disconnected { code });
        });

        let tx = link_tx;
        manager.subscribe(events::MAX_RECONNECT_ATTEMPTS, move |payload| {
            Metrics::ws_state_set(ConnectionState::Disconnected.as_str());
            let attempts = payload
                .get("attempts")
                .and_then(Value::as_u64)
                .and_then(|a| u32::try_from(a).ok())
                .unwrap_or(0);
            let _ = tx.send(LinkEvent::RetriesExhausted { attempts });
        });

        manager.subscribe(events::MESSAGE, |payload| {
            let kind = FrameKind::from_type(payload.get("type").and_then(Value::as_str));
            Metrics::frame_received(kind.as_str());
        });

        manager.subscribe(events::SENSOR_UPDATE, |payload| {
            let sensor_id = sensor_label(payload);
            Metrics::sensor_update(&sensor_id);
            debug!(sensor_id = %sensor_id, value = ?payload.get("value"), "Sensor update");
        });

        manager.subscribe(events::ANOMALY, |payload| {
            let sensor_id = sensor_label(payload);
            let severity = payload
                .get("severity")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Metrics::anomaly(&sensor_id, severity);
            warn!(sensor_id = %sensor_id, severity, "Anomaly detected");
        });

        manager.subscribe(events::ERROR, |payload| {
            let message = payload.get("message").and_then(Value::as_str).unwrap_or("");
            warn!(%message, "Sensor stream error");
        });
    }

    fn subscribe_sensors(&self) {
        for &sensor_id in &self.config.sensors {
            match self.manager.subscribe_sensor(sensor_id) {
                Ok(()) => debug!(sensor_id, "Subscribed to sensor"),
                Err(e) => {
                    Metrics::send_failed("subscribe");
                    warn!(sensor_id, error = %e, "Failed to subscribe to sensor");
                }
            }
        }
    }

    fn report_stats(&self) {
        let stats = self.manager.stats();
        Metrics::ws_state_set(stats.state.as_str());
        Metrics::decode_failures_set(stats.decode_failures);
        Metrics::buffer_len_set(stats.buffered);

        info!(
            state = %stats.state,
            reconnect_attempts = stats.reconnect_attempts,
            frames_received = stats.frames_received,
            decode_failures = stats.decode_failures,
            buffered = stats.buffered,
            "Connection statistics"
        );
        self.stats.output_summary();
    }
}

/// Metric label for the `sensor_id` field of a payload.
fn sensor_label(payload: &Value) -> String {
    match payload.get("sensor_id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => "unknown".to_string(),
    }
}
