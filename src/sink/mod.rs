//! Publish sinks
//!
//! Reports leave as JSON datagrams through a [`ReportSink`]; per-cycle
//! counters and gauges leave through a [`MetricsRecorder`]. Both are trait
//! objects so tests can swap in recording implementations.

pub mod recorder;
pub mod report;

#[cfg(feature = "statsd")]
pub mod statsd;

#[cfg(not(feature = "statsd"))]
#[path = "statsd_noop.rs"]
pub mod statsd;

pub use recorder::{
    noop_metrics, recording_metrics, MetricKind, MetricsRecorder, NoopMetrics, RecordedMetric,
    RecordingMetrics, SharedMetrics,
};
pub use report::{
    recording_reports, RecordingReportSink, ReportSink, SharedReportSink, UdpReportSink,
};
pub use statsd::StatsdRecorder;
