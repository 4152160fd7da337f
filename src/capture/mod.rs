//! Capture Interface
//!
//! The packet-capture collaborator (device handling, BPF filtering,
//! link/IP/TCP header decode) lives outside this crate. It hands over one
//! `CapturedSegment` per application-layer payload through a bounded
//! `SegmentSender`; decode workers drain the matching `SegmentReceiver`.

mod queue;
pub mod replay;

pub use queue::{segment_queue, PushOutcome, QueueStats, SegmentReceiver, SegmentSender};
pub use replay::{ReplayError, ReplayRecord, ReplaySource};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::SystemTime;

/// One side of a TCP flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Endpoint { host, port }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint {
            host: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// TCP header fields the decoders need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpMeta {
    pub seq: u32,
    pub ack: u32,
}

/// Application payload of one captured TCP segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedSegment {
    pub payload: Bytes,
    /// Capture timestamp
    pub timestamp: SystemTime,
    /// `None` when the transport layer was not TCP or failed to decode
    pub tcp: Option<TcpMeta>,
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl CapturedSegment {
    pub fn new(
        payload: impl Into<Bytes>,
        timestamp: SystemTime,
        tcp: Option<TcpMeta>,
        source: Endpoint,
        destination: Endpoint,
    ) -> Self {
        CapturedSegment {
            payload: payload.into(),
            timestamp,
            tcp,
            source,
            destination,
        }
    }

    pub fn source_port(&self) -> u16 {
        self.source.port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination.port
    }
}
