//! Monitor wiring
//!
//! One pipeline per watched port: a bounded capture queue feeding a decode
//! worker, an aggregator with its publish timer, and a sweeper. All tasks
//! share one shutdown token.
//!
//! # Shutdown
//!
//! 1. Capture queues are closed so no new segments arrive.
//! 2. Decode workers drain what is queued, bounded by the grace period.
//! 3. The shutdown token fires: pending response lookups are abandoned and
//!    the timers stop.
//! 4. Each aggregator publishes one final cycle and is stopped.

mod sweeper;
mod worker;

pub use sweeper::{SweepOutcome, Sweeper};
pub use worker::{log_drop, DecodeWorker};

use crate::capture::{
    segment_queue, CapturedSegment, PushOutcome, ReplayError, ReplaySource, SegmentReceiver,
    SegmentSender,
};
use crate::config::{MonitorConfig, PortConfig};
use crate::decode::Decoder;
use crate::error::MonitorError;
use crate::metrics::Aggregator;
use crate::sink::{SharedMetrics, SharedReportSink, StatsdRecorder, UdpReportSink};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Everything owned for one watched port
pub struct PortPipeline {
    pub config: PortConfig,
    pub decoder: Decoder,
    pub aggregator: Arc<Aggregator>,
    metrics: SharedMetrics,
    sender: SegmentSender,
    receiver: Mutex<Option<SegmentReceiver>>,
}

/// Why `Monitor::feed` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    InputEnded,
    InputFailed,
    Stopped,
}

pub struct Monitor {
    config: MonitorConfig,
    pipelines: Vec<PortPipeline>,
    shutdown: CancellationToken,
    workers: TaskTracker,
    tasks: TaskTracker,
    started: AtomicBool,
}

impl Monitor {
    /// Production wiring: UDP report sink plus one statsd client per port
    pub fn from_config(config: MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;
        let reports: SharedReportSink = Arc::new(UdpReportSink::connect(&config.report.addr)?);
        let statsd = config.statsd.clone();
        let prefixes: Vec<(u16, String)> = config
            .ports
            .iter()
            .map(|p| (p.port, config.statsd_prefix(p.port)))
            .collect();
        Self::build(config, reports, move |port| {
            let prefix = prefixes
                .iter()
                .find(|(p, _)| *p == port)
                .map(|(_, prefix)| prefix.clone())
                .unwrap_or_default();
            Arc::new(StatsdRecorder::new(&statsd, prefix)) as SharedMetrics
        })
    }

    /// Wire with caller-supplied sinks; every port shares `metrics`
    pub fn new(
        config: MonitorConfig,
        reports: SharedReportSink,
        metrics: SharedMetrics,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        Self::build(config, reports, move |_| metrics.clone())
    }

    fn build<F>(
        config: MonitorConfig,
        reports: SharedReportSink,
        metrics_for: F,
    ) -> Result<Self, MonitorError>
    where
        F: Fn(u16) -> SharedMetrics,
    {
        let pipelines = config
            .ports
            .iter()
            .map(|port| {
                let metrics = metrics_for(port.port);
                let (sender, receiver) =
                    segment_queue(config.capture.queue_capacity, config.capture.overflow);
                PortPipeline {
                    config: *port,
                    decoder: Decoder::from_config(port, &config),
                    aggregator: Arc::new(Aggregator::new(
                        port.protocol,
                        config.service_id.clone(),
                        port.port,
                        config.aggregation.clone(),
                        reports.clone(),
                        metrics.clone(),
                    )),
                    metrics,
                    sender,
                    receiver: Mutex::new(Some(receiver)),
                }
            })
            .collect();

        Ok(Monitor {
            config,
            pipelines,
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
            tasks: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn pipeline(&self, port: u16) -> Result<&PortPipeline, MonitorError> {
        self.pipelines
            .iter()
            .find(|p| p.config.port == port)
            .ok_or(MonitorError::UnknownPort(port))
    }

    /// Producer handle for the capture collaborator of `port`
    pub fn segment_sender(&self, port: u16) -> Result<SegmentSender, MonitorError> {
        Ok(self.pipeline(port)?.sender.clone())
    }

    /// Route a segment to the pipeline watching either of its ports
    pub fn submit(&self, segment: CapturedSegment) -> Result<PushOutcome, MonitorError> {
        let pipeline = self
            .pipelines
            .iter()
            .find(|p| p.config.port == segment.destination.port)
            .or_else(|| {
                self.pipelines
                    .iter()
                    .find(|p| p.config.port == segment.source.port)
            })
            .ok_or(MonitorError::UnknownPort(segment.destination.port))?;
        Ok(pipeline.sender.push(segment))
    }

    pub fn aggregator(&self, port: u16) -> Result<Arc<Aggregator>, MonitorError> {
        Ok(self.pipeline(port)?.aggregator.clone())
    }

    pub fn decoder(&self, port: u16) -> Result<Decoder, MonitorError> {
        Ok(self.pipeline(port)?.decoder.clone())
    }

    pub fn pipelines(&self) -> &[PortPipeline] {
        &self.pipelines
    }

    /// Spawn decode workers, aggregator timers and sweepers
    pub fn start(&self) -> Result<(), MonitorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyStarted);
        }

        for pipeline in &self.pipelines {
            let port = pipeline.config.port;
            let receiver = pipeline
                .receiver
                .lock()
                .take()
                .ok_or(MonitorError::AlreadyStarted)?;

            let worker = DecodeWorker::new(
                port,
                pipeline.decoder.clone(),
                pipeline.aggregator.clone(),
                receiver,
                self.tasks.clone(),
                self.shutdown.clone(),
            );
            self.workers.spawn(worker.run());

            let aggregator = pipeline.aggregator.clone();
            let token = self.shutdown.clone();
            self.tasks.spawn(async move { aggregator.run(token).await });

            let sweeper = Sweeper::new(
                port,
                pipeline.decoder.clone(),
                pipeline.sender.clone(),
                pipeline.metrics.clone(),
                self.config.correlation.sweep_interval(),
                self.config.aggregation.idle_window(),
            );
            self.tasks.spawn(sweeper.run(self.shutdown.clone()));

            info!(
                port,
                protocol = %pipeline.config.protocol,
                filter = %self.config.capture_filter(port),
                "pipeline started"
            );
        }
        Ok(())
    }

    /// Submit replayed segments until input ends or `stop` resolves
    ///
    /// `stop` is created once by the caller and polled on every pass, so a
    /// signal arriving between segments is not lost.
    pub async fn feed<R, S>(&self, source: &mut ReplaySource<R>, stop: S) -> FeedEnd
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => return FeedEnd::Stopped,
                next = source.next_segment() => match next {
                    Ok(Some(segment)) => match self.submit(segment) {
                        Ok(PushOutcome::Queued) => {}
                        Ok(outcome) => warn!(?outcome, "capture queue shed a segment"),
                        Err(e) => warn!(error = %e, "segment for an unwatched port"),
                    },
                    Ok(None) => return FeedEnd::InputEnded,
                    Err(e @ ReplayError::Parse { .. }) => {
                        warn!(error = %e, "skipping capture record")
                    }
                    Err(e) => {
                        error!(error = %e, "capture input failed");
                        return FeedEnd::InputFailed;
                    }
                },
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Drain, cancel and flush within `shutdown_grace_ms`
    pub async fn shutdown(&self) {
        let grace = self.config.shutdown_grace();
        let deadline = Instant::now() + grace;
        info!(grace_ms = grace.as_millis() as u64, "shutting down");

        for pipeline in &self.pipelines {
            pipeline.sender.close();
        }

        self.workers.close();
        if tokio::time::timeout_at(deadline, self.workers.wait())
            .await
            .is_err()
        {
            warn!("decode workers did not drain within the grace period");
        }

        self.shutdown.cancel();
        self.tasks.close();
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));
        if tokio::time::timeout(remaining, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.tasks.len(),
                "background tasks still running at shutdown"
            );
        }

        let flushes = self.pipelines.iter().map(|pipeline| {
            let aggregator = pipeline.aggregator.clone();
            async move {
                let outcome = aggregator.publish_cycle();
                aggregator.stop();
                (aggregator.port(), outcome.rows.len())
            }
        });
        for (port, rows) in futures::future::join_all(flushes).await {
            info!(port, rows, "final report flushed");
        }
    }
}
