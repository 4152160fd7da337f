//! JSON-lines replay source
//!
//! Stands in for a live capture collaborator: each line is one
//! `ReplayRecord`, e.g.
//!
//! ```text
//! {"ts_us":1700000000000000,"seq":1,"ack":2,"src":"10.0.0.5:51000","dst":"10.0.0.9:5000","payload":"GET / HTTP/1.1\r\n\r\n"}
//! ```
//!
//! `payload` may be a UTF-8 string or an array of byte values.

use super::{CapturedSegment, Endpoint, TcpMeta};
use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    /// Capture time in microseconds since the epoch; absent means "now"
    #[serde(default)]
    pub ts_us: Option<u64>,
    #[serde(default)]
    pub seq: Option<u32>,
    #[serde(default)]
    pub ack: Option<u32>,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub payload: Bytes,
}

impl ReplayRecord {
    pub fn into_segment(self) -> CapturedSegment {
        let timestamp = match self.ts_us {
            Some(us) => UNIX_EPOCH + Duration::from_micros(us),
            None => SystemTime::now(),
        };
        let tcp = match (self.seq, self.ack) {
            (Some(seq), Some(ack)) => Some(TcpMeta { seq, ack }),
            _ => None,
        };
        CapturedSegment {
            payload: self.payload,
            timestamp,
            tcp,
            source: Endpoint::from(self.src),
            destination: Endpoint::from(self.dst),
        }
    }
}

#[derive(Debug)]
pub enum ReplayError {
    Io(std::io::Error),
    /// Line could not be parsed; carries the 1-based line number
    Parse { line: usize, error: serde_json::Error },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Io(e) => write!(f, "replay read error: {}", e),
            ReplayError::Parse { line, error } => write!(f, "replay line {}: {}", line, error),
        }
    }
}

impl std::error::Error for ReplayError {}

/// Reads segments from any async line source (stdin, file)
pub struct ReplaySource<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        ReplaySource {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next segment, skipping blank lines; `Ok(None)` at end of input
    pub async fn next_segment(&mut self) -> Result<Option<CapturedSegment>, ReplayError> {
        loop {
            let line = match self.lines.next_line().await.map_err(ReplayError::Io)? {
                Some(line) => line,
                None => return Ok(None),
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: ReplayRecord =
                serde_json::from_str(trimmed).map_err(|error| ReplayError::Parse {
                    line: self.line_no,
                    error,
                })?;
            return Ok(Some(record.into_segment()));
        }
    }
}
