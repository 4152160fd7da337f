//! Completed request/response events
//!
//! Produced once per matched pair by a decoder and consumed once by the
//! aggregator.

use serde::Serialize;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpEvent {
    pub method: String,
    /// Request path with the query string stripped
    pub path: String,
    pub version: String,
    pub status_code: u16,
    pub content_length: u64,
    pub user_agent: Option<String>,
    pub server: Option<String>,
    pub remote_addr: String,
    pub request_time: SystemTime,
    pub response_time: SystemTime,
    pub elapsed: Duration,
}

impl HttpEvent {
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// First response packet classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MysqlOutcome {
    Success,
    Error,
    #[serde(rename = "EOF")]
    Eof,
}

impl MysqlOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MysqlOutcome::Success => "Success",
            MysqlOutcome::Error => "Error",
            MysqlOutcome::Eof => "EOF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MysqlEvent {
    pub outcome: MysqlOutcome,
    /// Grouping key built from the statement
    pub statement: String,
    pub remote_addr: String,
    pub elapsed: Duration,
    pub response_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum CompletedEvent {
    Http(HttpEvent),
    Mysql(MysqlEvent),
}

impl CompletedEvent {
    /// Aggregation key: URL path or normalized statement
    pub fn key(&self) -> &str {
        match self {
            CompletedEvent::Http(e) => &e.path,
            CompletedEvent::Mysql(e) => &e.statement,
        }
    }

    pub fn remote_addr(&self) -> &str {
        match self {
            CompletedEvent::Http(e) => &e.remote_addr,
            CompletedEvent::Mysql(e) => &e.remote_addr,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            CompletedEvent::Http(e) => e.elapsed,
            CompletedEvent::Mysql(e) => e.elapsed,
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            CompletedEvent::Http(e) => e.is_error(),
            CompletedEvent::Mysql(e) => e.outcome != MysqlOutcome::Success,
        }
    }
}

impl From<HttpEvent> for CompletedEvent {
    fn from(e: HttpEvent) -> Self {
        CompletedEvent::Http(e)
    }
}

impl From<MysqlEvent> for CompletedEvent {
    fn from(e: MysqlEvent) -> Self {
        CompletedEvent::Mysql(e)
    }
}
