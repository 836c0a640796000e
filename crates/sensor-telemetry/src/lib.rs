//! Structured logging and Prometheus metrics for the sensor monitor.
//!
//! Provides:
//! - Structured JSON logging with tracing
//! - Prometheus metrics for the push connection and sensor traffic
//! - Periodic session statistics output

pub mod error;
pub mod logging;
pub mod metrics;
pub mod stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use stats::{ConnectionSessionStats, SensorSessionStats, SessionStatsReporter};
