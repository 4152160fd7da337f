//! Metrics aggregation
//!
//! Completed events are folded into per-key buckets, a distinct client set
//! and per-cycle counters. Every publish cycle turns that state into a
//! top-N report plus counters and gauges.

mod aggregator;
mod bucket;
mod report;
mod reservoir;

pub use aggregator::{Aggregator, CycleOutcome};
pub use bucket::{AggregateBucket, ClientEntry};
pub use report::{round, top_n, ReportRow};
pub use reservoir::{LatencyReservoir, LatencySummary};
