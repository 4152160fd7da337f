//! Counter/gauge recorder trait
//!
//! The aggregator publishes its per-cycle scalars through this trait:
//! - Production: DogStatsD client (`StatsdRecorder`)
//! - Tests: in-memory recording (`RecordingMetrics`)

use parking_lot::Mutex;
use std::sync::Arc;

pub trait MetricsRecorder: Send + Sync + 'static {
    /// Add `value` to a counter
    fn count(&self, name: &str, value: u64);

    /// Set a gauge value
    fn gauge(&self, name: &str, value: f64);
}

/// No-op recorder for when no statsd endpoint is wanted
#[derive(Clone, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    #[inline]
    fn count(&self, _name: &str, _value: u64) {}
    #[inline]
    fn gauge(&self, _name: &str, _value: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
}

/// Records every published metric for later inspection
#[derive(Default)]
pub struct RecordingMetrics {
    recorded: Mutex<Vec<RecordedMetric>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_recorded(&self) -> Vec<RecordedMetric> {
        self.recorded.lock().clone()
    }

    pub fn get_by_name(&self, name: &str) -> Vec<RecordedMetric> {
        self.recorded
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Most recent value published under `name`
    pub fn last(&self, name: &str) -> Option<f64> {
        self.recorded
            .lock()
            .iter()
            .rev()
            .find(|m| m.name == name)
            .map(|m| m.value)
    }

    /// Sum of all counter values published under `name`
    pub fn counter_total(&self, name: &str) -> u64 {
        self.recorded
            .lock()
            .iter()
            .filter(|m| m.name == name && m.kind == MetricKind::Counter)
            .map(|m| m.value as u64)
            .sum()
    }

    pub fn clear(&self) {
        self.recorded.lock().clear();
    }
}

impl MetricsRecorder for RecordingMetrics {
    fn count(&self, name: &str, value: u64) {
        self.recorded.lock().push(RecordedMetric {
            name: name.to_string(),
            value: value as f64,
            kind: MetricKind::Counter,
        });
    }

    fn gauge(&self, name: &str, value: f64) {
        self.recorded.lock().push(RecordedMetric {
            name: name.to_string(),
            value,
            kind: MetricKind::Gauge,
        });
    }
}

pub type SharedMetrics = Arc<dyn MetricsRecorder>;

pub fn noop_metrics() -> SharedMetrics {
    Arc::new(NoopMetrics)
}

pub fn recording_metrics() -> Arc<RecordingMetrics> {
    Arc::new(RecordingMetrics::new())
}
