//! MySQL text-protocol decoder
//!
//! Tracks one connection record per client endpoint. A connection stays
//! unsynchronised, discarding everything, until a complete COM_QUERY packet
//! is seen from the client. After that each query starts a timer and the
//! first response segment stops it.

use super::packet::{carve_packet, COM_QUERY, EOF_MARKER, ERR_MARKER, HEADER_LEN};
use crate::capture::{CapturedSegment, Endpoint};
use crate::error::{DecodeError, NormalizeError};
use crate::event::{MysqlEvent, MysqlOutcome};
use crate::normalize::{KeyContext, KeyFormat};
use ahash::AHashMap;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Counters describing how well the decoder is keeping up with the stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MysqlStats {
    pub packets_received: u64,
    pub packets_received_synced: u64,
    pub desyncs: u64,
    pub streams: u64,
}

/// Per grouping key totals, kept across connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementStats {
    pub count: u64,
    pub bytes: u64,
    pub last_seen: Instant,
}

#[derive(Debug)]
struct Connection {
    client_ip: String,
    synced: bool,
    request_buf: BytesMut,
    response_buf: BytesMut,
    request_sent: Option<SystemTime>,
    statement: Option<String>,
    response_bytes: u64,
    last_seen: Instant,
}

impl Connection {
    fn new(client: &Endpoint, now: Instant) -> Self {
        Connection {
            client_ip: client.host.to_string(),
            synced: false,
            request_buf: BytesMut::new(),
            response_buf: BytesMut::new(),
            request_sent: None,
            statement: None,
            response_bytes: 0,
            last_seen: now,
        }
    }

    fn reset(&mut self) {
        self.request_buf.clear();
        self.response_buf.clear();
    }
}

#[derive(Default)]
struct MysqlState {
    connections: AHashMap<String, Connection>,
    statements: AHashMap<String, StatementStats>,
    stats: MysqlStats,
}

pub struct MysqlDecoder {
    server_port: u16,
    format: KeyFormat,
    max_buffered_bytes: usize,
    state: Mutex<MysqlState>,
}

impl MysqlDecoder {
    pub fn new(server_port: u16, format: KeyFormat, max_buffered_bytes: usize) -> Self {
        MysqlDecoder {
            server_port,
            format,
            max_buffered_bytes,
            state: Mutex::new(MysqlState::default()),
        }
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn decode(&self, segment: &CapturedSegment) -> Result<Option<MysqlEvent>, DecodeError> {
        self.decode_at(segment, Instant::now())
    }

    /// Feed one segment; `now` stamps connection and statement activity
    pub fn decode_at(
        &self,
        segment: &CapturedSegment,
        now: Instant,
    ) -> Result<Option<MysqlEvent>, DecodeError> {
        if segment.tcp.is_none() {
            return Err(DecodeError::MissingTcpMetadata);
        }
        if segment.source.port == 0 {
            return Err(DecodeError::EmptySourcePort);
        }

        let is_request = segment.source.port != self.server_port;
        let client = if is_request {
            &segment.source
        } else {
            &segment.destination
        };
        let conn_key = client.to_string();

        let mut state = self.state.lock();
        state.touch(&conn_key, client, now);
        if is_request {
            state.handle_request(&conn_key, segment, now, self)
        } else {
            Ok(state.handle_response(&conn_key, segment))
        }
    }

    pub fn stats(&self) -> MysqlStats {
        self.state.lock().stats
    }

    pub fn statement_stats(&self, key: &str) -> Option<StatementStats> {
        self.state.lock().statements.get(key).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn evict_idle(&self, idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), idle)
    }

    /// Drop connections and statement totals not touched within `idle`
    pub fn evict_idle_at(&self, now: Instant, idle: Duration) -> usize {
        let mut state = self.state.lock();
        let before = state.connections.len() + state.statements.len();
        state
            .connections
            .retain(|_, c| now.saturating_duration_since(c.last_seen) <= idle);
        state
            .statements
            .retain(|_, s| now.saturating_duration_since(s.last_seen) <= idle);
        before - (state.connections.len() + state.statements.len())
    }
}

impl MysqlState {
    /// Count the segment and create the connection record on first sight
    fn touch(&mut self, conn_key: &str, client: &Endpoint, now: Instant) {
        self.stats.packets_received += 1;
        let streams = &mut self.stats.streams;
        let conn = self
            .connections
            .entry(conn_key.to_string())
            .or_insert_with(|| {
                *streams += 1;
                debug!(client = %conn_key, "new mysql stream");
                Connection::new(client, now)
            });
        conn.last_seen = now;
        if conn.synced {
            self.stats.packets_received_synced += 1;
        }
    }

    fn handle_request(
        &mut self,
        conn_key: &str,
        segment: &CapturedSegment,
        now: Instant,
        decoder: &MysqlDecoder,
    ) -> Result<Option<MysqlEvent>, DecodeError> {
        let Some(conn) = self.connections.get_mut(conn_key) else {
            return Ok(None);
        };
        let max_buffered_bytes = decoder.max_buffered_bytes;

        // Leftover response bytes mean an exchange was missed.
        if !conn.response_buf.is_empty() {
            self.stats.desyncs += 1;
            conn.response_buf.clear();
            conn.request_buf.clear();
            conn.synced = false;
            debug!(client = %conn_key, "mysql stream desynchronised");
        }

        if conn.synced {
            if conn.request_buf.len() + segment.payload.len() > max_buffered_bytes {
                warn!(client = %conn_key, limit = max_buffered_bytes, "request buffer overflow, resetting");
                conn.reset();
                conn.synced = false;
                return Ok(None);
            }
            conn.request_buf.extend_from_slice(&segment.payload);
        } else {
            conn.request_buf.clear();
            conn.request_buf.extend_from_slice(&segment.payload);
        }

        let packet = match carve_packet(&mut conn.request_buf) {
            Some(packet) => packet,
            None => {
                if !conn.synced {
                    conn.reset();
                }
                return Ok(None);
            }
        };

        if packet.command != COM_QUERY {
            if conn.synced {
                conn.request_sent = None;
                conn.statement = None;
            } else {
                conn.reset();
            }
            return Ok(None);
        }
        conn.synced = true;

        if packet.body.is_empty() {
            return Err(NormalizeError::EmptyQuery.into());
        }

        let ctx = KeyContext {
            source: conn_key,
            source_ip: &conn.client_ip,
            query: &packet.body,
        };
        let key = decoder.format.render(&ctx)?;

        let entry = self.statements.entry(key.clone()).or_insert(StatementStats {
            count: 0,
            bytes: 0,
            last_seen: now,
        });
        entry.count += 1;
        entry.bytes += packet.body.len() as u64;
        entry.last_seen = now;

        conn.request_sent = Some(segment.timestamp);
        conn.statement = Some(key);
        conn.response_bytes = 0;
        Ok(None)
    }

    fn handle_response(&mut self, conn_key: &str, segment: &CapturedSegment) -> Option<MysqlEvent> {
        let conn = self.connections.get_mut(conn_key)?;
        if !conn.synced {
            conn.reset();
            return None;
        }

        let data = &segment.payload;
        conn.response_buf.clear();
        if data.len() <= HEADER_LEN {
            // Too short to classify; a following request treats it as a missed exchange.
            conn.response_buf.extend_from_slice(data);
            return None;
        }

        let plen = data.len() as u64;
        conn.response_bytes += plen;
        if let Some(stmt) = conn.statement.as_ref().and_then(|k| self.statements.get_mut(k)) {
            stmt.bytes += plen;
        }

        let sent = conn.request_sent.take()?;
        let statement = conn.statement.clone()?;

        let outcome = if data.len() > 7 {
            match data[HEADER_LEN] {
                ERR_MARKER => MysqlOutcome::Error,
                EOF_MARKER => MysqlOutcome::Eof,
                _ => MysqlOutcome::Success,
            }
        } else {
            MysqlOutcome::Success
        };

        Some(MysqlEvent {
            outcome,
            statement,
            remote_addr: conn.client_ip.clone(),
            elapsed: segment
                .timestamp
                .duration_since(sent)
                .unwrap_or(Duration::ZERO),
            response_bytes: conn.response_bytes,
        })
    }
}
