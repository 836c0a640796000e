//! Sensor stream monitor.
//!
//! Keeps a push connection to the sensor backend open and:
//! - Subscribes the configured sensors on every connection
//! - Turns stream events into logs and Prometheus metrics
//! - Periodically logs connection and session statistics

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
