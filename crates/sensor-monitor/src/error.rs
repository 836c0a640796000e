//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] sensor_ws::WsError),

    #[error("API error: {0}")]
    Api(#[from] sensor_api::ApiError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sensor_telemetry::TelemetryError),

    #[error("Reconnection attempts exhausted after {0} retries")]
    RetriesExhausted(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
