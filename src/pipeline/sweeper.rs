//! Periodic idle-state sweeper
//!
//! Expires unmatched HTTP requests, evicts idle MySQL connection records
//! and publishes how many segments the capture queue shed since the last
//! sweep.

use crate::capture::SegmentSender;
use crate::decode::Decoder;
use crate::observability::sweep_span;
use crate::sink::SharedMetrics;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Sweeper {
    port: u16,
    decoder: Decoder,
    sender: SegmentSender,
    metrics: SharedMetrics,
    interval: Duration,
    idle_window: Duration,
    reported_drops: u64,
}

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired: usize,
    pub dropped_segments: u64,
}

impl Sweeper {
    pub fn new(
        port: u16,
        decoder: Decoder,
        sender: SegmentSender,
        metrics: SharedMetrics,
        interval: Duration,
        idle_window: Duration,
    ) -> Self {
        Sweeper {
            port,
            decoder,
            sender,
            metrics,
            interval,
            idle_window,
            reported_drops: 0,
        }
    }

    pub fn sweep(&mut self) -> SweepOutcome {
        let span = sweep_span(self.port);
        let _enter = span.enter();

        let expired = match &self.decoder {
            Decoder::Http(http) => http.store().evict_expired(),
            Decoder::Mysql(mysql) => mysql.evict_idle(self.idle_window),
        };

        let dropped = self.sender.stats().dropped();
        let delta = dropped.saturating_sub(self.reported_drops);
        self.reported_drops = dropped;
        self.metrics.count("capture.dropped", delta);

        if expired > 0 || delta > 0 {
            debug!(expired, dropped = delta, "sweep evicted idle state");
        }
        SweepOutcome {
            expired,
            dropped_segments: delta,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.sweep();
                }
            }
        }
    }
}
