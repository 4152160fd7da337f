//! Bounded capture-to-decode queue
//!
//! Capture loops must never block on decode work, so pushes are
//! non-blocking and a full queue sheds load according to the configured
//! `OverflowPolicy`. Every shed segment bumps the drop counter.

use super::CapturedSegment;
use crate::config::OverflowPolicy;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest segment
    DroppedOldest,
    /// Rejected because the queue was full
    DroppedNewest,
    /// Receiver side is gone
    Closed,
}

struct Shared {
    queue: ArrayQueue<CapturedSegment>,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
    stats: QueueStats,
}

/// Counters shared by both ends of the queue
#[derive(Debug, Default)]
pub struct QueueStats {
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer handle held by capture loops
#[derive(Clone)]
pub struct SegmentSender {
    shared: Arc<Shared>,
}

impl SegmentSender {
    /// Enqueue without blocking, shedding per the overflow policy
    pub fn push(&self, segment: CapturedSegment) -> PushOutcome {
        if self.shared.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        let outcome = match self.shared.policy {
            OverflowPolicy::DropOldest => match self.shared.queue.force_push(segment) {
                None => PushOutcome::Queued,
                Some(_evicted) => PushOutcome::DroppedOldest,
            },
            OverflowPolicy::DropNewest => match self.shared.queue.push(segment) {
                Ok(()) => PushOutcome::Queued,
                Err(_rejected) => PushOutcome::DroppedNewest,
            },
        };

        match outcome {
            PushOutcome::Queued => {
                self.shared.stats.pushed.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::DroppedOldest => {
                self.shared.stats.pushed.fetch_add(1, Ordering::Relaxed);
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::DroppedNewest => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => {}
        }
        if outcome != PushOutcome::DroppedNewest {
            self.shared.notify.notify_one();
        }
        outcome
    }

    /// Stop accepting segments; the receiver drains what is left
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}

/// Consumer handle held by the decode worker
pub struct SegmentReceiver {
    shared: Arc<Shared>,
}

impl SegmentReceiver {
    /// Wait for the next segment; `None` once closed and drained
    pub async fn recv(&self) -> Option<CapturedSegment> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(segment) = self.shared.queue.pop() {
                return Some(segment);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Take a segment without waiting
    pub fn try_recv(&self) -> Option<CapturedSegment> {
        self.shared.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}

impl Drop for SegmentReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Create a bounded queue pair
pub fn segment_queue(capacity: usize, policy: OverflowPolicy) -> (SegmentSender, SegmentReceiver) {
    assert!(capacity > 0, "segment queue capacity must be positive");
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity),
        policy,
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        stats: QueueStats::default(),
    });
    (
        SegmentSender {
            shared: shared.clone(),
        },
        SegmentReceiver { shared },
    )
}
