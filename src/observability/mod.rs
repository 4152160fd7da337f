//! Logging and tracing
//!
//! # Usage
//!
//! ```rust,ignore
//! use wire_monitor::config::LoggingConfig;
//! use wire_monitor::observability::init_tracing;
//!
//! init_tracing(&LoggingConfig::default()).expect("tracing");
//! ```
//!
//! `RUST_LOG` overrides `logging.level`; `logging.json = true` switches to
//! JSON lines.

pub mod spans;
pub mod tracing_setup;

pub use spans::*;
pub use tracing_setup::{build_filter, init as init_tracing};
