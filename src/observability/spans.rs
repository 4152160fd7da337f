//! Span helpers for decode and publish work

use tracing::{span, Level, Span};

/// Span for decoding one captured segment
#[inline]
pub fn segment_span(protocol: &str, port: u16, len: usize) -> Span {
    span!(
        Level::DEBUG,
        "monitor.segment",
        protocol = %protocol,
        port = port,
        bytes = len
    )
}

/// Span for one publish cycle
#[inline]
pub fn publish_span(protocol: &str, port: u16) -> Span {
    span!(
        Level::INFO,
        "monitor.publish",
        protocol = %protocol,
        port = port
    )
}

/// Span for the periodic sweeper
#[inline]
pub fn sweep_span(port: u16) -> Span {
    span!(Level::DEBUG, "monitor.sweep", port = port)
}
