//! Event aggregation and the periodic publish cycle
//!
//! All mutation goes through one mutex. A publish cycle builds the report
//! from the current buckets, pushes counters and gauges, zeroes the
//! per-cycle counters, and only then evicts idle buckets and clients, so an
//! entry about to expire still contributes to one last report.

use super::bucket::{AggregateBucket, ClientEntry};
use super::report::{round, top_n, ReportRow};
use super::reservoir::{LatencyReservoir, LatencySummary};
use crate::config::{AggregationConfig, Protocol};
use crate::event::CompletedEvent;
use crate::sink::{SharedMetrics, SharedReportSink};
use ahash::AHashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::observability::publish_span;

struct AggregatorState {
    /// Per method (HTTP) or per outcome (MySQL), zeroed each cycle
    counters: AHashMap<String, u64>,
    /// `4xx` / `5xx`, zeroed each cycle
    unusual: AHashMap<String, u64>,
    latencies: LatencyReservoir,
    buckets: AHashMap<String, AggregateBucket>,
    clients: AHashMap<String, ClientEntry>,
    rng: ChaCha8Rng,
}

/// Scalars computed during a cycle, published after the lock is released
struct CycleScalars {
    counters: Vec<(String, u64)>,
    latency: Option<LatencySummary>,
    clients: usize,
}

/// What one publish cycle produced
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub rows: Vec<ReportRow>,
    pub evicted_buckets: usize,
    pub evicted_clients: usize,
}

pub struct Aggregator {
    protocol: Protocol,
    service_id: String,
    port: u16,
    config: AggregationConfig,
    state: Mutex<AggregatorState>,
    reports: SharedReportSink,
    metrics: SharedMetrics,
    cancel: CancellationToken,
}

impl Aggregator {
    pub fn new(
        protocol: Protocol,
        service_id: impl Into<String>,
        port: u16,
        config: AggregationConfig,
        reports: SharedReportSink,
        metrics: SharedMetrics,
    ) -> Self {
        Self::with_rng(
            protocol,
            service_id,
            port,
            config,
            reports,
            metrics,
            ChaCha8Rng::from_entropy(),
        )
    }

    /// Deterministic sampling for tests
    pub fn with_seed(
        protocol: Protocol,
        service_id: impl Into<String>,
        port: u16,
        config: AggregationConfig,
        reports: SharedReportSink,
        metrics: SharedMetrics,
        seed: u64,
    ) -> Self {
        Self::with_rng(
            protocol,
            service_id,
            port,
            config,
            reports,
            metrics,
            ChaCha8Rng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        protocol: Protocol,
        service_id: impl Into<String>,
        port: u16,
        config: AggregationConfig,
        reports: SharedReportSink,
        metrics: SharedMetrics,
        rng: ChaCha8Rng,
    ) -> Self {
        let state = AggregatorState {
            counters: AHashMap::new(),
            unusual: AHashMap::new(),
            latencies: LatencyReservoir::new(config.reservoir_size),
            buckets: AHashMap::new(),
            clients: AHashMap::new(),
            rng,
        };
        Aggregator {
            protocol,
            service_id: service_id.into(),
            port,
            config,
            state: Mutex::new(state),
            reports,
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn input(&self, event: &CompletedEvent) {
        self.input_at(event, Instant::now());
    }

    pub fn input_at(&self, event: &CompletedEvent, now: Instant) {
        if self.is_stopped() {
            return;
        }
        let (counter, response_bytes) = match event {
            CompletedEvent::Http(e) => (e.method.clone(), 0),
            CompletedEvent::Mysql(e) => (e.outcome.as_str().to_string(), e.response_bytes),
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;

        *state.counters.entry(counter).or_insert(0) += 1;
        if let CompletedEvent::Http(e) = event {
            if e.is_client_error() {
                *state.unusual.entry("4xx".to_string()).or_insert(0) += 1;
            } else if e.is_server_error() {
                *state.unusual.entry("5xx".to_string()).or_insert(0) += 1;
            }
        }

        let elapsed = event.elapsed();
        state.latencies.record(elapsed, &mut state.rng);

        let reservoir_size = self.config.reservoir_size;
        let bucket = state
            .buckets
            .entry(event.key().to_string())
            .or_insert_with(|| AggregateBucket::new(reservoir_size, now));
        bucket.record(elapsed, event.is_error(), response_bytes, now, &mut state.rng);

        state
            .clients
            .entry(event.remote_addr().to_string())
            .or_insert_with(|| ClientEntry::new(now))
            .touch(now);
    }

    pub fn publish_cycle(&self) -> CycleOutcome {
        self.publish_cycle_at(Instant::now())
    }

    /// Build and publish one cycle's report, counters and gauges, then evict
    pub fn publish_cycle_at(&self, now: Instant) -> CycleOutcome {
        if self.is_stopped() {
            return CycleOutcome::default();
        }
        let span = publish_span(self.protocol.as_str(), self.port);
        let _enter = span.enter();

        let (rows, scalars, evicted_buckets, evicted_clients) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let rows = self.build_rows(&state.buckets);
            let scalars = CycleScalars {
                counters: self.drain_counters(state),
                latency: state.latencies.summary(),
                clients: state.clients.len(),
            };
            state.latencies.clear();

            let window = self.config.idle_window();
            let buckets_before = state.buckets.len();
            state.buckets.retain(|_, b| !b.is_idle(now, window));
            let clients_before = state.clients.len();
            state.clients.retain(|_, c| !c.is_idle(now, window));

            (
                rows,
                scalars,
                buckets_before - state.buckets.len(),
                clients_before - state.clients.len(),
            )
        };

        if rows.is_empty() {
            debug!("nothing to report this cycle");
        } else {
            self.reports.publish_report(&rows);
        }
        self.publish_scalars(&scalars);

        if evicted_buckets > 0 || evicted_clients > 0 {
            debug!(
                buckets = evicted_buckets,
                clients = evicted_clients,
                "evicted idle entries"
            );
        }

        CycleOutcome {
            rows,
            evicted_buckets,
            evicted_clients,
        }
    }

    fn build_rows(&self, buckets: &AHashMap<String, AggregateBucket>) -> Vec<ReportRow> {
        let port = self.port.to_string();
        let rows = buckets
            .iter()
            .map(|(key, bucket)| {
                let (avg, max) = bucket
                    .latency()
                    .map(|s| (s.avg_ms(), s.max_ms()))
                    .unwrap_or((0.0, 0.0));
                ReportRow {
                    service_id: self.service_id.clone(),
                    port: port.clone(),
                    message_type: self.protocol.as_str().to_string(),
                    key: key.clone(),
                    count: bucket.count,
                    abnormal_count: bucket.error_count,
                    average_time: round(avg, 2),
                    max_time: round(max, 2),
                    cumulative_time: round(avg * bucket.count as f64, 2),
                    response_bytes: match self.protocol {
                        Protocol::Mysql => Some(bucket.response_bytes),
                        Protocol::Http => None,
                    },
                }
            })
            .collect();
        top_n(rows, self.config.top_n)
    }

    /// Snapshot the per-cycle counters as metric names and zero them
    fn drain_counters(&self, state: &mut AggregatorState) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        let mut total = 0;
        for (name, value) in state.counters.iter_mut() {
            out.push((format!("request.{}", name), *value));
            total += *value;
            *value = 0;
        }
        out.push(("request.total".to_string(), total));

        if self.protocol == Protocol::Http {
            let mut unusual_total = 0;
            for (name, value) in state.unusual.iter_mut() {
                out.push((format!("request.unusual.{}", name), *value));
                unusual_total += *value;
                *value = 0;
            }
            out.push(("request.unusual.total".to_string(), unusual_total));
        }
        out
    }

    fn publish_scalars(&self, scalars: &CycleScalars) {
        for (name, value) in &scalars.counters {
            self.metrics.count(name, *value);
        }
        let (min, avg, max) = scalars
            .latency
            .map(|s| (s.min_ms(), s.avg_ms(), s.max_ms()))
            .unwrap_or((0.0, 0.0, 0.0));
        self.metrics.gauge("requesttime.min", min);
        self.metrics.gauge("requesttime.avg", avg);
        self.metrics.gauge("requesttime.max", max);
        self.metrics.gauge("request.client", scalars.clients as f64);
    }

    /// Run publish cycles until stopped or `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.publish_interval();
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            protocol = %self.protocol,
            port = self.port,
            interval_ms = period.as_millis() as u64,
            "aggregator started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.publish_cycle();
                }
            }
        }
        debug!(port = self.port, "aggregator loop exited");
    }

    /// Stop the cycle; later inputs and publishes are ignored
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn bucket(&self, key: &str) -> Option<AggregateBucket> {
        self.state.lock().buckets.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{HttpEvent, MysqlEvent, MysqlOutcome};
    use crate::sink::{recording_metrics, recording_reports, RecordingMetrics, RecordingReportSink};
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn http(path: &str, status: u16, ms: u64, remote: &str) -> CompletedEvent {
        HttpEvent {
            method: "GET".into(),
            path: path.into(),
            version: "HTTP/1.1".into(),
            status_code: status,
            content_length: 0,
            user_agent: None,
            server: None,
            remote_addr: remote.into(),
            request_time: UNIX_EPOCH,
            response_time: UNIX_EPOCH + Duration::from_millis(ms),
            elapsed: Duration::from_millis(ms),
        }
        .into()
    }

    fn aggregator(
        protocol: Protocol,
    ) -> (Aggregator, Arc<RecordingReportSink>, Arc<RecordingMetrics>) {
        let reports = recording_reports();
        let metrics = recording_metrics();
        let agg = Aggregator::with_seed(
            protocol,
            "svc",
            5000,
            AggregationConfig::default(),
            reports.clone(),
            metrics.clone(),
            7,
        );
        (agg, reports, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_twice_counts_two() {
        let (agg, _, _) = aggregator(Protocol::Http);
        agg.input(&http("/a", 200, 10, "10.0.0.1"));
        agg.input(&http("/a", 200, 20, "10.0.0.1"));

        let bucket = agg.bucket("/a").unwrap();
        assert_eq!(bucket.count, 2);
        assert_eq!(bucket.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_clients() {
        let (agg, _, metrics) = aggregator(Protocol::Http);
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.3"] {
            agg.input(&http("/a", 200, 1, ip));
        }
        assert_eq!(agg.client_count(), 3);

        agg.publish_cycle();
        assert_eq!(metrics.last("request.client"), Some(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_row_and_counters() {
        let (agg, reports, metrics) = aggregator(Protocol::Http);
        agg.input(&http("/a", 200, 10, "10.0.0.1"));
        agg.input(&http("/a", 404, 30, "10.0.0.1"));
        agg.input(&http("/b", 503, 5, "10.0.0.2"));

        let outcome = agg.publish_cycle();
        assert_eq!(outcome.rows.len(), 2);
        let a = &outcome.rows[0];
        assert_eq!(a.key, "/a");
        assert_eq!(a.count, 2);
        assert_eq!(a.abnormal_count, 1);
        assert_eq!(a.average_time, 20.0);
        assert_eq!(a.max_time, 30.0);
        assert_eq!(a.cumulative_time, 40.0);
        assert_eq!(reports.len(), 1);

        assert_eq!(metrics.counter_total("request.GET"), 3);
        assert_eq!(metrics.counter_total("request.total"), 3);
        assert_eq!(metrics.counter_total("request.unusual.4xx"), 1);
        assert_eq!(metrics.counter_total("request.unusual.5xx"), 1);
        assert_eq!(metrics.counter_total("request.unusual.total"), 2);
        assert_eq!(metrics.last("requesttime.max"), Some(30.0));
        assert_eq!(metrics.last("requesttime.min"), Some(5.0));

        // Counters are zeroed but keep publishing.
        metrics.clear();
        agg.publish_cycle();
        assert_eq!(metrics.get_by_name("request.GET").len(), 1);
        assert_eq!(metrics.counter_total("request.GET"), 0);
        assert_eq!(metrics.last("requesttime.max"), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_bucket_reported_once_then_evicted() {
        let (agg, _, _) = aggregator(Protocol::Http);
        agg.input(&http("/old", 200, 10, "10.0.0.1"));

        tokio::time::advance(Duration::from_secs(200)).await;
        agg.input(&http("/fresh", 200, 10, "10.0.0.2"));
        tokio::time::advance(Duration::from_secs(101)).await;

        let outcome = agg.publish_cycle();
        let keys: Vec<_> = outcome.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys.iter().filter(|k| **k == "/fresh").count(), 1);
        assert!(keys.contains(&"/old"));
        assert_eq!(outcome.evicted_buckets, 1);
        assert_eq!(outcome.evicted_clients, 1);

        assert!(agg.bucket("/old").is_none());
        assert!(agg.bucket("/fresh").is_some());

        let next = agg.publish_cycle();
        assert!(next.rows.iter().all(|r| r.key != "/old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_twenty_of_twenty_five() {
        let (agg, reports, _) = aggregator(Protocol::Http);
        for i in 1..=25u64 {
            agg.input(&http(&format!("/k{}", i), 200, i * 10, "10.0.0.1"));
        }
        agg.publish_cycle();

        let rows = reports.last().unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(rows[0].key, "/k25");
        assert_eq!(rows[19].key, "/k6");
        assert!(rows
            .windows(2)
            .all(|w| w[0].cumulative_time > w[1].cumulative_time));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mysql_rows_carry_bytes_and_outcomes() {
        let (agg, _, metrics) = aggregator(Protocol::Mysql);
        let event = |outcome| -> CompletedEvent {
            MysqlEvent {
                outcome,
                statement: "SELECT ?".into(),
                remote_addr: "10.0.0.9".into(),
                elapsed: Duration::from_millis(4),
                response_bytes: 100,
            }
            .into()
        };
        agg.input(&event(MysqlOutcome::Success));
        agg.input(&event(MysqlOutcome::Error));

        let outcome = agg.publish_cycle();
        let row = &outcome.rows[0];
        assert_eq!(row.message_type, "mysql");
        assert_eq!(row.abnormal_count, 1);
        assert_eq!(row.response_bytes, Some(200));
        assert_eq!(metrics.counter_total("request.Success"), 1);
        assert_eq!(metrics.counter_total("request.Error"), 1);
        assert!(metrics.get_by_name("request.unusual.total").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_further_work() {
        let (agg, reports, _) = aggregator(Protocol::Http);
        agg.input(&http("/a", 200, 1, "10.0.0.1"));
        agg.stop();
        agg.input(&http("/a", 200, 1, "10.0.0.1"));

        let outcome = agg.publish_cycle();
        assert!(outcome.rows.is_empty());
        assert!(reports.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_on_interval() {
        let (agg, reports, _) = aggregator(Protocol::Http);
        let agg = Arc::new(agg);
        agg.input(&http("/a", 200, 1, "10.0.0.1"));

        let token = CancellationToken::new();
        let task = tokio::spawn({
            let agg = agg.clone();
            let token = token.clone();
            async move { agg.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(reports.len(), 1);

        token.cancel();
        task.await.unwrap();
    }
}
