//! Request/response correlation
//!
//! Holds in-flight requests until the matching response shows up. Inserts
//! come from the request path, lookups from response tasks that may poll
//! for a while, so the map sits behind a single mutex. Entries older than
//! the TTL count as absent and are removed by `evict_expired`.

use crate::capture::Endpoint;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Identifier shared by a request and its response within one TCP flow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Build from a TCP sequence/ack number and the client endpoint
    pub fn new(number: u32, client: &Endpoint) -> Self {
        CorrelationKey(format!("{} {}", number, client))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored request plus the time it was enqueued
#[derive(Debug, Clone)]
pub struct PendingRequest<V> {
    pub key: CorrelationKey,
    pub request: V,
    pub enqueued_at: Instant,
}

/// Bounded-wait lookup policy
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl WaitPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        WaitPolicy {
            max_attempts,
            interval,
        }
    }

    /// Longest time a lookup can spend sleeping
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

pub struct CorrelationStore<V> {
    entries: Mutex<AHashMap<CorrelationKey, PendingRequest<V>>>,
    ttl: Duration,
}

impl<V: Clone> CorrelationStore<V> {
    pub fn new(ttl: Duration) -> Self {
        CorrelationStore {
            entries: Mutex::new(AHashMap::new()),
            ttl,
        }
    }

    /// Insert or overwrite
    pub fn put(&self, key: CorrelationKey, request: V) {
        self.put_at(key, request, Instant::now());
    }

    pub fn put_at(&self, key: CorrelationKey, request: V, now: Instant) {
        let pending = PendingRequest {
            key: key.clone(),
            request,
            enqueued_at: now,
        };
        self.entries.lock().insert(key, pending);
    }

    fn is_live(&self, pending: &PendingRequest<V>, now: Instant) -> bool {
        now.saturating_duration_since(pending.enqueued_at) <= self.ttl
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<V> {
        let now = Instant::now();
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|p| self.is_live(p, now))
            .map(|p| p.request.clone())
    }

    /// Remove and return a live entry
    pub fn take(&self, key: &CorrelationKey) -> Option<PendingRequest<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(p) if self.is_live(p, now) => entries.remove(key),
            _ => None,
        }
    }

    pub fn delete(&self, key: &CorrelationKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Poll `get` until found or the attempts are used up
    pub async fn get_with_wait(&self, key: &CorrelationKey, policy: WaitPolicy) -> Option<V> {
        if let Some(v) = self.get(key) {
            return Some(v);
        }
        for _ in 0..policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
            if let Some(v) = self.get(key) {
                return Some(v);
            }
        }
        None
    }

    /// Like `get_with_wait` but consumes the entry on match
    pub async fn take_with_wait(
        &self,
        key: &CorrelationKey,
        policy: WaitPolicy,
    ) -> Option<PendingRequest<V>> {
        if let Some(p) = self.take(key) {
            return Some(p);
        }
        for _ in 0..policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
            if let Some(p) = self.take(key) {
                return Some(p);
            }
        }
        None
    }

    /// Drop entries past their TTL; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, p| now.saturating_duration_since(p.enqueued_at) <= ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
