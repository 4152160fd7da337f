//! Error types
//!
//! Three layers: normalizer failures, per-segment decode failures (always
//! "log and drop" at the pipeline boundary) and startup failures that are
//! surfaced to the caller of `Monitor`.

use std::fmt;

/// Error returned by the query normalizer and key format builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The scanner was handed an empty statement
    EmptyQuery,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::EmptyQuery => write!(f, "normalizer invoked on an empty statement"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Reasons a captured segment is dropped by a decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Segment has no TCP sequence/ack metadata
    MissingTcpMetadata,
    /// Segment source port is unset (zero)
    EmptySourcePort,
    /// Response-direction payload that does not start with `HTTP`
    NotHttpResponse,
    /// Request bytes could not be parsed
    MalformedRequest(String),
    /// Response bytes could not be parsed
    MalformedResponse(String),
    /// No pending request matched the response within the wait budget
    ResponseLost { key: String },
    /// Statement could not be normalized into a grouping key
    Normalize(NormalizeError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingTcpMetadata => write!(f, "segment carries no TCP metadata"),
            DecodeError::EmptySourcePort => write!(f, "segment source port is empty"),
            DecodeError::NotHttpResponse => write!(f, "response fragment without HTTP status line"),
            DecodeError::MalformedRequest(e) => write!(f, "malformed request: {}", e),
            DecodeError::MalformedResponse(e) => write!(f, "malformed response: {}", e),
            DecodeError::ResponseLost { key } => {
                write!(f, "no pending request for response key {}", key)
            }
            DecodeError::Normalize(e) => write!(f, "normalize failed: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Normalize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NormalizeError> for DecodeError {
    fn from(e: NormalizeError) -> Self {
        DecodeError::Normalize(e)
    }
}

/// Startup and configuration errors
#[derive(Debug)]
pub enum MonitorError {
    /// Configuration file could not be read
    Io(std::io::Error),
    /// Configuration file is not valid TOML for `MonitorConfig`
    Parse(toml::de::Error),
    /// Configuration values are inconsistent
    InvalidConfig(String),
    /// A publish sink could not be created
    SinkSetup(String),
    /// No pipeline is registered for the port
    UnknownPort(u16),
    /// `start` was called twice
    AlreadyStarted,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Io(e) => write!(f, "config I/O error: {}", e),
            MonitorError::Parse(e) => write!(f, "config parse error: {}", e),
            MonitorError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            MonitorError::SinkSetup(msg) => write!(f, "sink setup failed: {}", msg),
            MonitorError::UnknownPort(port) => write!(f, "no pipeline for port {}", port),
            MonitorError::AlreadyStarted => write!(f, "monitor already started"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(e) => Some(e),
            MonitorError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(e: std::io::Error) -> Self {
        MonitorError::Io(e)
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(e: toml::de::Error) -> Self {
        MonitorError::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_error_converts_into_decode_error() {
        let err: DecodeError = NormalizeError::EmptyQuery.into();
        assert_eq!(err, DecodeError::Normalize(NormalizeError::EmptyQuery));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_response_lost_display_names_key() {
        let err = DecodeError::ResponseLost {
            key: "1234 10.0.0.1:5555".to_string(),
        };
        assert!(err.to_string().contains("10.0.0.1:5555"));
    }
}
