//! HTTP client for the sensor REST API.
//!
//! Wraps the list, live, history, anomaly and ingest endpoints. Response
//! bodies are returned as opaque JSON.

use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default REST base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// REST client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Query for `/sensors/{id}/history/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Server-side downsampling (`auto`, `raw`, `1m`, `1h`, ...).
    pub resolution: String,
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            resolution: "auto".to_string(),
        }
    }
}

/// Query for `/sensors/anomalies/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyParams {
    /// Look-back window.
    pub hours: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<u32>,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            hours: 24,
            severity: None,
            sensor_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct IngestRequest<'a, T: Serialize> {
    readings: &'a [T],
}

/// Client for the sensor REST API.
pub struct SensorApiClient {
    client: Client,
    base_url: String,
}

impl SensorApiClient {
    /// Create a client against `base_url` (e.g. "http://localhost:8000/api").
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        Self::with_timeout(base_url, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    pub fn from_config(config: &ApiConfig) -> ApiResult<Self> {
        Self::with_timeout(
            config.base_url.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All known sensors.
    pub async fn get_sensor_list(&self) -> ApiResult<Value> {
        self.get("sensors/list/", &[] as &[(&str, &str)]).await
    }

    /// Submit a batch of readings.
    pub async fn ingest_readings<T: Serialize>(&self, readings: &[T]) -> ApiResult<Value> {
        let url = self.endpoint("sensors/ingest/");
        info!(url = %url, count = readings.len(), "Ingesting sensor readings");

        let response = self
            .client
            .post(&url)
            .json(&IngestRequest { readings })
            .send()
            .await
            .map_err(|e| ApiError::HttpClient(format!("HTTP request failed: {e}")))?;

        read_json(response).await
    }

    /// Latest readings for one sensor.
    pub async fn get_live_sensor_data(&self, sensor_id: u32) -> ApiResult<Value> {
        self.get(&format!("sensors/{sensor_id}/live/"), &[] as &[(&str, &str)])
            .await
    }

    /// Historical readings for one sensor.
    pub async fn get_historical_data(
        &self,
        sensor_id: u32,
        params: &HistoryParams,
    ) -> ApiResult<Value> {
        self.get(&format!("sensors/{sensor_id}/history/"), params)
            .await
    }

    /// Recent anomalies across sensors.
    pub async fn get_anomalies(&self, params: &AnomalyParams) -> ApiResult<Value> {
        self.get("sensors/anomalies/", params).await
    }

    /// True if the sensor list endpoint answers 200. Never fails.
    pub async fn health_check(&self) -> bool {
        let url = self.endpoint("sensors/list/");
        match self.client.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Health check failed");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Health check failed");
                false
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get<Q: Serialize + ?Sized>(&self, path: &str, query: &Q) -> ApiResult<Value> {
        let url = self.endpoint(path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::HttpClient(format!("HTTP request failed: {e}")))?;

        read_json(response).await
    }
}

async fn read_json(response: Response) -> ApiResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::Decode(format!("Failed to parse response: {e}")))
}
