//! Per-key rolling statistics

use super::reservoir::{LatencyReservoir, LatencySummary};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct AggregateBucket {
    pub count: u64,
    pub error_count: u64,
    pub response_bytes: u64,
    pub last_updated: Instant,
    latencies: LatencyReservoir,
}

impl AggregateBucket {
    pub fn new(reservoir_size: usize, now: Instant) -> Self {
        AggregateBucket {
            count: 0,
            error_count: 0,
            response_bytes: 0,
            last_updated: now,
            latencies: LatencyReservoir::new(reservoir_size),
        }
    }

    pub fn record<R: Rng + ?Sized>(
        &mut self,
        elapsed: Duration,
        is_error: bool,
        response_bytes: u64,
        now: Instant,
        rng: &mut R,
    ) {
        self.count += 1;
        if is_error {
            self.error_count += 1;
        }
        self.response_bytes += response_bytes;
        self.latencies.record(elapsed, rng);
        self.last_updated = now;
    }

    pub fn latency(&self) -> Option<LatencySummary> {
        self.latencies.summary()
    }

    pub fn is_idle(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_updated) > window
    }
}

/// One remote address seen within the idle window
#[derive(Debug, Clone, Copy)]
pub struct ClientEntry {
    pub count: u64,
    pub last_updated: Instant,
}

impl ClientEntry {
    pub fn new(now: Instant) -> Self {
        ClientEntry {
            count: 0,
            last_updated: now,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.count += 1;
        self.last_updated = now;
    }

    pub fn is_idle(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_updated) > window
    }
}
