//! Metrics collection for dispatch operations

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sink for dispatch metrics
///
/// The buses call this on every success, error, timeout, and cache-hit
/// outcome. Implementations must never fail into the dispatch path; the
/// interface returns nothing, so there is nothing to propagate.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Increment a labeled counter
    async fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record a labeled histogram observation
    async fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Sink that discards every observation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    async fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    async fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// In-memory metrics sink
///
/// Keeps counters and bounded histogram windows (the last 1000 observations
/// per series) for inspection in tests and in-process dashboards.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricsSink {
    counters: Arc<RwLock<HashMap<String, u64>>>,
    histograms: Arc<RwLock<HashMap<String, Vec<f64>>>>,
}

/// Render a stable series key from a metric name and its labels.
fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<&(&str, &str)> = labels.iter().collect();
    sorted.sort();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

impl InMemoryMetricsSink {
    /// Create a new empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a counter value for an exact label set
    pub async fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let counters = self.counters.read().await;
        counters.get(&series_key(name, labels)).copied().unwrap_or(0)
    }

    /// Sum a counter across all label sets
    pub async fn counter_total(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .iter()
            .filter(|(key, _)| *key == name || key.starts_with(&format!("{name}{{")))
            .map(|(_, count)| count)
            .sum()
    }

    /// Get histogram statistics for an exact label set
    pub async fn histogram_stats(
        &self,
        name: &str,
        labels: &[(&str, &str)],
    ) -> Option<HistogramStats> {
        let histograms = self.histograms.read().await;
        let values = histograms.get(&series_key(name, labels))?;
        HistogramStats::from_values(values)
    }

    /// Get all metrics as a summary
    pub async fn summary(&self) -> MetricsSummary {
        let counters = self.counters.read().await.clone();

        let mut histogram_stats = HashMap::new();
        let histograms = self.histograms.read().await;
        for (series, values) in histograms.iter() {
            if let Some(stats) = HistogramStats::from_values(values) {
                histogram_stats.insert(series.clone(), stats);
            }
        }

        MetricsSummary {
            counters,
            histograms: histogram_stats,
        }
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        self.counters.write().await.clear();
        self.histograms.write().await.clear();
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut counters = self.counters.write().await;
        *counters.entry(series_key(name, labels)).or_insert(0) += 1;
    }

    async fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut histograms = self.histograms.write().await;
        let values = histograms.entry(series_key(name, labels)).or_default();
        values.push(value);

        // Keep only the last 1000 observations per series
        if values.len() > 1000 {
            let excess = values.len() - 1000;
            values.drain(0..excess);
        }
    }
}

/// Summary of all recorded metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    /// Counter values by series key
    pub counters: HashMap<String, u64>,
    /// Histogram statistics by series key
    pub histograms: HashMap<String, HistogramStats>,
}

/// Statistics over one histogram series
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStats {
    /// Number of observations
    pub count: usize,
    /// Average value
    pub avg: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// 95th percentile
    pub p95: f64,
}

impl HistogramStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = sorted.iter().sum();
        let p95_idx = ((sorted.len() as f64 - 1.0) * 0.95) as usize;

        Some(Self {
            count: sorted.len(),
            avg: sum / sorted.len() as f64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p95: sorted[p95_idx],
        })
    }
}
