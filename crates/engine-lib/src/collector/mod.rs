//! Metric collection from per-node metric agents
//!
//! A [`MetricSource`] turns one agent request into a [`MetricReading`].
//! Counter fields are converted into per-sample deltas by the
//! [`CounterTracker`] before they reach a [`UsageSnapshot`].

mod grpc;

pub use grpc::GrpcMetricSource;

use crate::models::{PodKey, UsageSnapshot};
use crate::proto::{Metric, MultiMetric};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Entity whose metrics are requested from an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricTarget {
    Node(String),
    Pod(PodKey),
}

impl fmt::Display for MetricTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricTarget::Node(name) => write!(f, "node/{}", name),
            MetricTarget::Pod(key) => write!(f, "pod/{}", key),
        }
    }
}

/// Why a reading could not be obtained. A successful response with
/// missing fields is not an error; see [`MetricReading`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no metric agent known for {0}")]
    NoEndpoint(String),

    #[error("invalid metric agent endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("metric agent {endpoint} did not answer within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("metric agent {endpoint} unreachable: {message}")]
    Unavailable { endpoint: String, message: String },

    #[error("metric agent {endpoint} returned {status}")]
    Status {
        endpoint: String,
        status: tonic::Status,
    },
}

/// Fetches raw readings from a metric agent
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(&self, endpoint: &str, target: &MetricTarget)
        -> Result<MetricReading, FetchError>;
}

/// Parsed agent response. `None` marks a field that was absent or not a
/// finite number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricReading {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub storage_percent: Option<f64>,
    pub network_percent: Option<f64>,
    pub network_tx_bytes: Option<f64>,
    pub network_rx_bytes: Option<f64>,
}

fn parse_metric(metric: Option<&Metric>) -> Option<f64> {
    metric
        .and_then(|m| m.value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

impl From<&MultiMetric> for MetricReading {
    fn from(metric: &MultiMetric) -> Self {
        Self {
            cpu_percent: parse_metric(metric.cpu_percent.as_ref()),
            memory_percent: parse_metric(metric.memory_percent.as_ref()),
            storage_percent: parse_metric(metric.storage_percent.as_ref()),
            network_percent: parse_metric(metric.network_percent.as_ref()),
            network_tx_bytes: parse_metric(metric.network_tx_bytes.as_ref()),
            network_rx_bytes: parse_metric(metric.network_rx_bytes.as_ref()),
        }
    }
}

/// Rate of a monotonically increasing counter since the previous sample.
///
/// A non-positive delta (first observation or counter reset) falls back
/// to the raw counter value, floored at zero.
pub fn counter_rate(previous: Option<f64>, current: f64) -> f64 {
    match previous {
        Some(previous) if current - previous > 0.0 => current - previous,
        _ => current.max(0.0),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterSample {
    tx: Option<f64>,
    rx: Option<f64>,
}

/// Last network counters seen per entity
#[derive(Debug, Default)]
pub struct CounterTracker {
    samples: HashMap<MetricTarget, CounterSample>,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from a reading, turning counters into rates.
    /// Transmit and receive are tracked independently; an unknown counter
    /// leaves the stored value untouched.
    pub fn snapshot(
        &mut self,
        target: &MetricTarget,
        reading: &MetricReading,
        collected_at: DateTime<Utc>,
    ) -> UsageSnapshot {
        let sample = self.samples.entry(target.clone()).or_default();

        let network_tx_rate = reading
            .network_tx_bytes
            .map(|current| counter_rate(sample.tx.replace(current), current));
        let network_rx_rate = reading
            .network_rx_bytes
            .map(|current| counter_rate(sample.rx.replace(current), current));

        UsageSnapshot {
            cpu_percent: reading.cpu_percent,
            memory_percent: reading.memory_percent,
            storage_percent: reading.storage_percent,
            network_percent: reading.network_percent,
            network_tx_rate,
            network_rx_rate,
            collected_at,
        }
    }

    /// Forget entities that are no longer tracked
    pub fn retain(&mut self, live: &HashSet<MetricTarget>) {
        self.samples.retain(|target, _| live.contains(target));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
