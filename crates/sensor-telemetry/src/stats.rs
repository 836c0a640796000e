//! Periodic session statistics.
//!
//! Reads the prometheus counters back and summarizes:
//! - frames received by kind
//! - per-sensor update and anomaly counts
//! - reconnection outcomes and subscriber failures
//! - connected session length distribution (P50/P95/P99)

use crate::metrics::{
    SENSOR_ANOMALIES_TOTAL, SENSOR_UPDATES_TOTAL, SUBSCRIBER_FAILURES_TOTAL, WS_FRAMES_TOTAL,
    WS_RECONNECT_TOTAL, WS_SESSION_DURATION_SECS,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Statistics for a single sensor.
#[derive(Debug, Clone, Serialize)]
pub struct SensorSessionStats {
    pub sensor_id: String,
    pub updates: u64,
    pub anomalies: u64,
}

/// Connection-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSessionStats {
    pub frames_sensor_update: u64,
    pub frames_anomaly: u64,
    pub frames_other: u64,
    pub reconnects_recovered: u64,
    pub reconnects_exhausted: u64,
    pub subscriber_failures: u64,
    pub sessions: u64,
    pub session_p50_secs: f64,
    pub session_p95_secs: f64,
    pub session_p99_secs: f64,
}

/// Session statistics reporter.
pub struct SessionStatsReporter {
    sensors: Vec<String>,
    start_time: DateTime<Utc>,
}

impl SessionStatsReporter {
    /// Create a reporter for the given sensors.
    pub fn new(sensors: Vec<String>) -> Self {
        Self {
            sensors,
            start_time: Utc::now(),
        }
    }

    /// Statistics for every tracked sensor.
    pub fn sensor_stats(&self) -> Vec<SensorSessionStats> {
        self.sensors
            .iter()
            .map(|sensor_id| SensorSessionStats {
                sensor_id: sensor_id.clone(),
                updates: counter_value(&SENSOR_UPDATES_TOTAL, &[sensor_id]),
                anomalies: counter_sum(&SENSOR_ANOMALIES_TOTAL, |labels| {
                    labels.first().map(String::as_str) == Some(sensor_id.as_str())
                }),
            })
            .collect()
    }

    pub fn connection_stats(&self) -> ConnectionSessionStats {
        let (sessions, p50, p95, p99) = session_percentiles();

        ConnectionSessionStats {
            frames_sensor_update: counter_value(&WS_FRAMES_TOTAL, &["sensor_update"]),
            frames_anomaly: counter_value(&WS_FRAMES_TOTAL, &["anomaly_detected"]),
            frames_other: counter_value(&WS_FRAMES_TOTAL, &["other"]),
            reconnects_recovered: counter_value(&WS_RECONNECT_TOTAL, &["recovered"]),
            reconnects_exhausted: counter_value(&WS_RECONNECT_TOTAL, &["exhausted"]),
            subscriber_failures: counter_sum(&SUBSCRIBER_FAILURES_TOTAL, |_| true),
            sessions,
            session_p50_secs: p50,
            session_p95_secs: p95,
            session_p99_secs: p99,
        }
    }

    /// Output the session summary to logs.
    pub fn output_summary(&self) {
        let conn = self.connection_stats();
        let duration = Utc::now() - self.start_time;
        let hours = duration.num_hours();
        let minutes = duration.num_minutes() % 60;

        info!("========== Session Statistics Summary ==========");
        info!(
            "Period: {} ({} hours {} minutes)",
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            hours,
            minutes
        );
        info!(
            "  Frames: {} (sensor_update: {}, anomaly: {}, other: {})",
            conn.frames_sensor_update + conn.frames_anomaly + conn.frames_other,
            conn.frames_sensor_update,
            conn.frames_anomaly,
            conn.frames_other
        );
        info!(
            "  Reconnects: recovered={}, exhausted={}",
            conn.reconnects_recovered, conn.reconnects_exhausted
        );
        info!(
            "  Sessions: {} (s): P50={:.1}, P95={:.1}, P99={:.1}",
            conn.sessions, conn.session_p50_secs, conn.session_p95_secs, conn.session_p99_secs
        );
        if conn.subscriber_failures > 0 {
            info!("  Subscriber failures: {}", conn.subscriber_failures);
        }

        for s in self.sensor_stats() {
            info!(
                "  Sensor {}: updates={}, anomalies={}",
                s.sensor_id, s.updates, s.anomalies
            );
        }

        info!("================================================");
    }

    /// Per-sensor statistics keyed by sensor id.
    pub fn to_json(&self) -> HashMap<String, SensorSessionStats> {
        self.sensor_stats()
            .into_iter()
            .map(|s| (s.sensor_id.clone(), s))
            .collect()
    }
}

fn counter_value(counter: &prometheus::CounterVec, labels: &[&str]) -> u64 {
    counter.with_label_values(labels).get() as u64
}

/// Sum every series of `counter` whose label values satisfy `filter`.
fn counter_sum<F>(counter: &prometheus::CounterVec, filter: F) -> u64
where
    F: Fn(&[String]) -> bool,
{
    let mut total = 0.0;
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let labels: Vec<String> = m
                .get_label()
                .iter()
                .map(|pair| pair.get_value().to_string())
                .collect();
            if filter(&labels) {
                total += m.get_counter().get_value();
            }
        }
    }
    total as u64
}

/// Returns (count, p50, p95, p99) of connected session lengths.
fn session_percentiles() -> (u64, f64, f64, f64) {
    for mf in WS_SESSION_DURATION_SECS.collect() {
        if let Some(m) = mf.get_metric().first() {
            let h = m.get_histogram();
            let count = h.get_sample_count();
            if count == 0 {
                return (0, 0.0, 0.0, 0.0);
            }

            let buckets = h.get_bucket();
            return (
                count,
                percentile_from_buckets(buckets, count, 0.50),
                percentile_from_buckets(buckets, count, 0.95),
                percentile_from_buckets(buckets, count, 0.99),
            );
        }
    }
    (0, 0.0, 0.0, 0.0)
}

/// Calculate percentile from histogram buckets.
fn percentile_from_buckets(
    buckets: &[prometheus::proto::Bucket],
    total_count: u64,
    percentile: f64,
) -> f64 {
    let target = (total_count as f64 * percentile) as u64;
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for bucket in buckets {
        let upper_bound = bucket.get_upper_bound();
        let cumulative_count = bucket.get_cumulative_count();

        if cumulative_count >= target {
            // Linear interpolation within bucket
            let bucket_count = cumulative_count - prev_count;
            if bucket_count == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / bucket_count as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }

        prev_bound = upper_bound;
        prev_count = cumulative_count;
    }

    // Samples above the last bound
    buckets.last().map(|b| b.get_upper_bound()).unwrap_or(0.0)
}
