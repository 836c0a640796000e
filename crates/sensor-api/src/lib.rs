//! REST client for the sensor backend.
//!
//! Used alongside the push connection for listing sensors, fetching history
//! and anomalies, ingesting readings and health checks.

pub mod client;
pub mod error;

pub use client::{AnomalyParams, ApiConfig, HistoryParams, SensorApiClient, DEFAULT_BASE_URL};
pub use error::{ApiError, ApiResult};
