//! Report publishing
//!
//! Each cycle's top-N rows go out as one JSON array per UDP datagram. There
//! is no retry and no acknowledgement; a failed send is logged and dropped.

use crate::error::MonitorError;
use crate::metrics::ReportRow;
use parking_lot::Mutex;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use tracing::{debug, warn};

pub trait ReportSink: Send + Sync + 'static {
    fn publish_report(&self, rows: &[ReportRow]);
}

pub type SharedReportSink = Arc<dyn ReportSink>;

/// Best-effort UDP sender
pub struct UdpReportSink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpReportSink {
    pub fn connect(addr: &str) -> Result<Self, MonitorError> {
        let peer = addr
            .to_socket_addrs()
            .map_err(|e| MonitorError::SinkSetup(format!("resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| MonitorError::SinkSetup(format!("no address for {}", addr)))?;
        let bind: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind)
            .map_err(|e| MonitorError::SinkSetup(format!("bind report socket: {}", e)))?;
        socket
            .connect(peer)
            .map_err(|e| MonitorError::SinkSetup(format!("connect {}: {}", peer, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| MonitorError::SinkSetup(format!("nonblocking report socket: {}", e)))?;

        Ok(UdpReportSink { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl ReportSink for UdpReportSink {
    fn publish_report(&self, rows: &[ReportRow]) {
        let payload = match serde_json::to_vec(rows) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialise report");
                return;
            }
        };
        match self.socket.send(&payload) {
            Ok(n) => debug!(peer = %self.peer, bytes = n, rows = rows.len(), "report sent"),
            Err(e) => warn!(peer = %self.peer, error = %e, "report send failed"),
        }
    }
}

/// Keeps every published report in memory
#[derive(Default)]
pub struct RecordingReportSink {
    reports: Mutex<Vec<Vec<ReportRow>>>,
}

impl RecordingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Vec<ReportRow>> {
        self.reports.lock().clone()
    }

    pub fn last(&self) -> Option<Vec<ReportRow>> {
        self.reports.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for RecordingReportSink {
    fn publish_report(&self, rows: &[ReportRow]) {
        self.reports.lock().push(rows.to_vec());
    }
}

pub fn recording_reports() -> Arc<RecordingReportSink> {
    Arc::new(RecordingReportSink::new())
}
