//! Per-port decode worker
//!
//! Pulls segments off the capture queue. Requests and MySQL traffic are
//! decoded inline so ordering within a connection is preserved; HTTP
//! responses may wait on the correlation store for seconds, so each one
//! runs as its own tracked task that is abandoned on shutdown.

use crate::capture::{CapturedSegment, SegmentReceiver, TcpMeta};
use crate::decode::{Decoder, Direction, HttpDecoder};
use crate::error::DecodeError;
use crate::event::CompletedEvent;
use crate::metrics::Aggregator;
use crate::observability::segment_span;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn, Instrument};

pub struct DecodeWorker {
    port: u16,
    decoder: Decoder,
    aggregator: Arc<Aggregator>,
    receiver: SegmentReceiver,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl DecodeWorker {
    pub fn new(
        port: u16,
        decoder: Decoder,
        aggregator: Arc<Aggregator>,
        receiver: SegmentReceiver,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        DecodeWorker {
            port,
            decoder,
            aggregator,
            receiver,
            tasks,
            shutdown,
        }
    }

    /// Runs until the queue is closed and drained, or shutdown fires
    pub async fn run(self) {
        loop {
            let segment = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(segment) => segment,
                    None => break,
                },
            };
            self.dispatch(segment);
        }
        debug!(port = self.port, pending = self.receiver.len(), "decode worker exited");
    }

    fn dispatch(&self, segment: CapturedSegment) {
        let span = segment_span(
            self.decoder.protocol().as_str(),
            self.port,
            segment.payload.len(),
        );
        let _enter = span.enter();

        match &self.decoder {
            Decoder::Http(http) => match http.classify(&segment) {
                Err(e) => log_drop(self.port, &e),
                Ok((Direction::Request, tcp)) => {
                    if let Err(e) = http.handle_request(&segment, tcp) {
                        log_drop(self.port, &e);
                    }
                }
                Ok((Direction::Response, tcp)) => {
                    let task = response_task(
                        self.port,
                        http.clone(),
                        self.aggregator.clone(),
                        segment,
                        tcp,
                        self.shutdown.clone(),
                    );
                    self.tasks.spawn(task.instrument(span.clone()));
                }
            },
            Decoder::Mysql(mysql) => match mysql.decode(&segment) {
                Ok(Some(event)) => self.aggregator.input(&CompletedEvent::from(event)),
                Ok(None) => {}
                Err(e) => log_drop(self.port, &e),
            },
        }
    }
}

async fn response_task(
    port: u16,
    http: Arc<HttpDecoder>,
    aggregator: Arc<Aggregator>,
    segment: CapturedSegment,
    tcp: TcpMeta,
    shutdown: CancellationToken,
) {
    // A lookup that can complete on its first poll wins over shutdown.
    tokio::select! {
        biased;
        result = http.handle_response(&segment, tcp) => match result {
            Ok(event) => aggregator.input(&CompletedEvent::from(event)),
            Err(e) => log_drop(port, &e),
        },
        _ = shutdown.cancelled() => {
            debug!(port, "response lookup abandoned on shutdown");
        }
    }
}

/// Every decode failure is a dropped segment; only the level differs
pub fn log_drop(port: u16, e: &DecodeError) {
    match e {
        DecodeError::Normalize(_) => error!(port, error = %e, "normalizer rejected statement"),
        DecodeError::ResponseLost { .. } => warn!(port, error = %e, "response lost"),
        _ => debug!(port, error = %e, "segment dropped"),
    }
}
