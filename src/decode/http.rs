//! HTTP/1.x decoder
//!
//! Direction comes from the source port: segments sent from the service
//! port are responses, everything else is a request. Requests are parked in
//! the correlation store under `(ack, client endpoint)`; a response looks
//! them up under `(seq, client endpoint)`, which is the same number because
//! the server's sequence continues from where the client's ack left off.
//!
//! Loopback traffic or services that answer from a port other than the
//! configured one will be classified wrongly.

use crate::capture::{CapturedSegment, TcpMeta};
use crate::correlation::{CorrelationKey, CorrelationStore, WaitPolicy};
use crate::error::DecodeError;
use crate::event::HttpEvent;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Parsed request waiting for its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub user_agent: Option<String>,
    pub remote_addr: String,
    pub request_time: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HttpResponseHead {
    status_code: u16,
    content_length: u64,
    server: Option<String>,
}

pub struct HttpDecoder {
    service_port: u16,
    store: Arc<CorrelationStore<HttpRequest>>,
    wait: WaitPolicy,
}

impl HttpDecoder {
    pub fn new(
        service_port: u16,
        store: Arc<CorrelationStore<HttpRequest>>,
        wait: WaitPolicy,
    ) -> Self {
        HttpDecoder {
            service_port,
            store,
            wait,
        }
    }

    pub fn service_port(&self) -> u16 {
        self.service_port
    }

    pub fn store(&self) -> &Arc<CorrelationStore<HttpRequest>> {
        &self.store
    }

    /// Validate TCP metadata and pick a direction
    pub fn classify(&self, segment: &CapturedSegment) -> Result<(Direction, TcpMeta), DecodeError> {
        let tcp = segment.tcp.ok_or(DecodeError::MissingTcpMetadata)?;
        if segment.source.port == 0 {
            return Err(DecodeError::EmptySourcePort);
        }
        let direction = if segment.source.port == self.service_port {
            Direction::Response
        } else {
            Direction::Request
        };
        Ok((direction, tcp))
    }

    /// Decode one segment; responses may wait for their request
    pub async fn decode(&self, segment: &CapturedSegment) -> Result<Option<HttpEvent>, DecodeError> {
        match self.classify(segment)? {
            (Direction::Request, tcp) => {
                self.handle_request(segment, tcp)?;
                Ok(None)
            }
            (Direction::Response, tcp) => self.handle_response(segment, tcp).await.map(Some),
        }
    }

    /// Parse a request and park it in the correlation store
    pub fn handle_request(
        &self,
        segment: &CapturedSegment,
        tcp: TcpMeta,
    ) -> Result<CorrelationKey, DecodeError> {
        let mut request = parse_request(&segment.payload)?;
        request.remote_addr = segment.source.host.to_string();
        request.request_time = segment.timestamp;

        let key = CorrelationKey::new(tcp.ack, &segment.source);
        debug!(key = %key, method = %request.method, path = %request.path, "http request parked");
        self.store.put(key.clone(), request);
        Ok(key)
    }

    /// Match a response against its parked request
    pub async fn handle_response(
        &self,
        segment: &CapturedSegment,
        tcp: TcpMeta,
    ) -> Result<HttpEvent, DecodeError> {
        if segment.payload.len() < 4 || &segment.payload[..4] != b"HTTP" {
            return Err(DecodeError::NotHttpResponse);
        }
        let head = parse_response(&segment.payload)?;
        let key = CorrelationKey::new(tcp.seq, &segment.destination);

        let pending = self
            .store
            .take_with_wait(&key, self.wait)
            .await
            .ok_or_else(|| DecodeError::ResponseLost {
                key: key.to_string(),
            })?;
        let request = pending.request;

        let response_time = segment.timestamp;
        let elapsed = response_time
            .duration_since(request.request_time)
            .unwrap_or(Duration::ZERO);

        Ok(HttpEvent {
            method: request.method,
            path: request.path,
            version: request.version,
            status_code: head.status_code,
            content_length: head.content_length,
            user_agent: request.user_agent,
            server: head.server,
            remote_addr: request.remote_addr,
            request_time: request.request_time,
            response_time,
            elapsed,
        })
    }
}

fn header_value(headers: &[httparse::Header<'_>], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| !h.name.is_empty() && h.name.eq_ignore_ascii_case(name))
        .map(|h| String::from_utf8_lossy(h.value).trim().to_string())
}

fn strip_query(path: &str) -> &str {
    match memchr::memchr(b'?', path.as_bytes()) {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// Parse a request line and headers.
///
/// A segment that cuts the headers short still yields a request as long as
/// the request line is complete.
pub fn parse_request(payload: &[u8]) -> Result<HttpRequest, DecodeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    req.parse(payload)
        .map_err(|e| DecodeError::MalformedRequest(e.to_string()))?;

    let method = req
        .method
        .ok_or_else(|| DecodeError::MalformedRequest("incomplete request line".into()))?;
    let path = req
        .path
        .ok_or_else(|| DecodeError::MalformedRequest("incomplete request line".into()))?;
    let version = match req.version {
        Some(v) => format!("HTTP/1.{}", v),
        None => return Err(DecodeError::MalformedRequest("missing HTTP version".into())),
    };

    Ok(HttpRequest {
        method: method.to_string(),
        path: strip_query(path).to_string(),
        version,
        user_agent: header_value(req.headers, "User-Agent"),
        remote_addr: String::new(),
        request_time: SystemTime::UNIX_EPOCH,
    })
}

fn parse_response(payload: &[u8]) -> Result<HttpResponseHead, DecodeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);
    res.parse(payload)
        .map_err(|e| DecodeError::MalformedResponse(e.to_string()))?;

    let status_code = res
        .code
        .ok_or_else(|| DecodeError::MalformedResponse("incomplete status line".into()))?;
    let content_length = header_value(res.headers, "Content-Length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(HttpResponseHead {
        status_code,
        content_length,
        server: header_value(res.headers, "Server"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Endpoint;
    use std::time::UNIX_EPOCH;

    const SERVICE_PORT: u16 = 5000;

    fn client() -> Endpoint {
        Endpoint::new("10.0.0.5".parse().unwrap(), 51000)
    }

    fn server() -> Endpoint {
        Endpoint::new("10.0.0.9".parse().unwrap(), SERVICE_PORT)
    }

    fn decoder() -> HttpDecoder {
        HttpDecoder::new(
            SERVICE_PORT,
            Arc::new(CorrelationStore::new(Duration::from_secs(10))),
            WaitPolicy::new(5, Duration::from_secs(2)),
        )
    }

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn request(payload: &str, ack: u32, ms: u64) -> CapturedSegment {
        CapturedSegment::new(
            payload.as_bytes().to_vec(),
            at(ms),
            Some(TcpMeta { seq: 100, ack }),
            client(),
            server(),
        )
    }

    fn response(payload: &str, seq: u32, ms: u64) -> CapturedSegment {
        CapturedSegment::new(
            payload.as_bytes().to_vec(),
            at(ms),
            Some(TcpMeta { seq, ack: 999 }),
            server(),
            client(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_response_pair() {
        let decoder = decoder();
        let req = request(
            "GET /orders/42?expand=1 HTTP/1.1\r\nHost: x\r\nUser-Agent: curl/8.0\r\n\r\n",
            7000,
            1_000,
        );
        assert!(decoder.decode(&req).await.unwrap().is_none());

        let res = response(
            "HTTP/1.1 404 Not Found\r\nServer: nginx\r\nContent-Length: 12\r\n\r\nnot found...",
            7000,
            1_250,
        );
        let event = decoder.decode(&res).await.unwrap().unwrap();

        assert_eq!(event.method, "GET");
        assert_eq!(event.path, "/orders/42");
        assert_eq!(event.version, "HTTP/1.1");
        assert_eq!(event.status_code, 404);
        assert_eq!(event.content_length, 12);
        assert_eq!(event.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(event.server.as_deref(), Some("nginx"));
        assert_eq!(event.remote_addr, "10.0.0.5");
        assert_eq!(event.elapsed, Duration::from_millis(250));
        assert!(event.is_client_error());
        assert!(decoder.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_fragment_is_discarded() {
        let decoder = decoder();
        let res = response("<html>continued body</html>", 1, 0);
        assert_eq!(decoder.decode(&res).await, Err(DecodeError::NotHttpResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_response_is_lost_after_budget() {
        let decoder = decoder();
        let res = response("HTTP/1.1 200 OK\r\n\r\n", 42, 0);
        let started = tokio::time::Instant::now();

        let err = decoder.decode(&res).await.unwrap_err();
        assert!(matches!(err, DecodeError::ResponseLost { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_tcp_metadata() {
        let decoder = decoder();
        let mut seg = request("GET / HTTP/1.1\r\n\r\n", 1, 0);
        seg.tcp = None;
        assert_eq!(decoder.decode(&seg).await, Err(DecodeError::MissingTcpMetadata));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_source_port() {
        let decoder = decoder();
        let mut seg = request("GET / HTTP/1.1\r\n\r\n", 1, 0);
        seg.source.port = 0;
        assert_eq!(decoder.decode(&seg).await, Err(DecodeError::EmptySourcePort));
    }

    #[test]
    fn test_garbage_request_is_malformed() {
        let err = parse_request(b"\x00\x01\x02 binary").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedRequest(_)));
    }

    #[test]
    fn test_truncated_headers_still_parse() {
        let req = parse_request(b"POST /submit HTTP/1.0\r\nContent-Ty").unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/submit");
        assert_eq!(req.version, "HTTP/1.0");
        assert!(req.user_agent.is_none());
    }

    #[test]
    fn test_classify_by_source_port() {
        let decoder = decoder();
        let (dir, _) = decoder.classify(&request("x", 1, 0)).unwrap();
        assert_eq!(dir, Direction::Request);
        let (dir, _) = decoder.classify(&response("x", 1, 0)).unwrap();
        assert_eq!(dir, Direction::Response);
    }
}
