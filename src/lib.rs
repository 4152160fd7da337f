//! Passive wire monitor for HTTP and MySQL services.
//!
//! Captured TCP segments are decoded into request/response pairs, folded
//! into per-key latency and error statistics, and published periodically as
//! JSON reports plus statsd counters.

pub mod capture;
pub mod config;
pub mod correlation;
pub mod decode;
pub mod error;
pub mod event;
pub mod metrics;
pub mod normalize;
pub mod observability;
pub mod pipeline;
pub mod sink;

pub use capture::{CapturedSegment, Endpoint, TcpMeta};
pub use config::{MonitorConfig, PortConfig, Protocol};
pub use error::{DecodeError, MonitorError, NormalizeError};
pub use event::{CompletedEvent, HttpEvent, MysqlEvent, MysqlOutcome};
pub use pipeline::{FeedEnd, Monitor};
