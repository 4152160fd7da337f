//! End-to-end HTTP monitoring through the public `Monitor` API

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wire_monitor::capture::{CapturedSegment, Endpoint, PushOutcome, TcpMeta};
use wire_monitor::sink::{recording_metrics, recording_reports, RecordingMetrics, RecordingReportSink};
use wire_monitor::{Monitor, MonitorConfig, PortConfig, Protocol};

const PORT: u16 = 5000;

fn monitor() -> (Monitor, Arc<RecordingReportSink>, Arc<RecordingMetrics>) {
    let config = MonitorConfig::default()
        .with_service_id("orders")
        .with_ports(vec![PortConfig {
            port: PORT,
            protocol: Protocol::Http,
        }])
        .with_publish_interval(Duration::from_secs(5));
    let reports = recording_reports();
    let metrics = recording_metrics();
    let monitor = Monitor::new(config, reports.clone(), metrics.clone()).unwrap();
    (monitor, reports, metrics)
}

fn client(port: u16) -> Endpoint {
    Endpoint::new("192.168.1.10".parse().unwrap(), port)
}

fn server() -> Endpoint {
    Endpoint::new("192.168.1.1".parse().unwrap(), PORT)
}

fn at(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

fn request(line: &str, client_port: u16, ack: u32, ms: u64) -> CapturedSegment {
    let payload = format!("{}\r\nHost: orders\r\nUser-Agent: test\r\n\r\n", line);
    CapturedSegment::new(
        payload.into_bytes(),
        at(ms),
        Some(TcpMeta { seq: 1, ack }),
        client(client_port),
        server(),
    )
}

fn response(status: &str, client_port: u16, seq: u32, ms: u64) -> CapturedSegment {
    let payload = format!("HTTP/1.1 {}\r\nContent-Length: 2\r\n\r\n{{}}", status);
    CapturedSegment::new(
        payload.into_bytes(),
        at(ms),
        Some(TcpMeta { seq, ack: 2 }),
        server(),
        client(client_port),
    )
}

#[tokio::test(start_paused = true)]
async fn test_request_response_becomes_report_row() {
    let (monitor, reports, metrics) = monitor();
    monitor.start().unwrap();

    let sender = monitor.segment_sender(PORT).unwrap();
    assert_eq!(
        sender.push(request("GET /orders/7?full=1 HTTP/1.1", 40001, 1000, 0)),
        PushOutcome::Queued
    );
    sender.push(response("200 OK", 40001, 1000, 40));
    sender.push(request("GET /orders/8 HTTP/1.1", 40002, 2000, 100));
    sender.push(response("500 Internal Server Error", 40002, 2000, 160));

    tokio::time::sleep(Duration::from_millis(5_100)).await;

    let rows = reports.last().expect("one report after the first cycle");
    let orders_7 = rows.iter().find(|r| r.key == "/orders/7").unwrap();
    assert_eq!(orders_7.service_id, "orders");
    assert_eq!(orders_7.port, "5000");
    assert_eq!(orders_7.message_type, "http");
    assert_eq!(orders_7.count, 1);
    assert_eq!(orders_7.average_time, 40.0);

    let orders_8 = rows.iter().find(|r| r.key == "/orders/8").unwrap();
    assert_eq!(orders_8.abnormal_count, 1);
    assert_eq!(rows[0].key, "/orders/8");

    assert_eq!(metrics.counter_total("request.GET"), 2);
    assert_eq!(metrics.counter_total("request.unusual.5xx"), 1);
    assert_eq!(metrics.last("request.client"), Some(1.0));

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_response_never_reaches_report() {
    let (monitor, reports, _) = monitor();
    monitor.start().unwrap();

    monitor
        .submit(response("200 OK", 40003, 777, 0))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(reports.reports().iter().all(|rows| rows.is_empty()));
    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_final_report() {
    let (monitor, reports, _) = monitor();
    monitor.start().unwrap();

    monitor
        .submit(request("POST /checkout HTTP/1.1", 40004, 10, 0))
        .unwrap();
    monitor
        .submit(response("201 Created", 40004, 10, 12))
        .unwrap();

    monitor.shutdown().await;

    let rows = reports.last().expect("final flush publishes");
    assert_eq!(rows[0].key, "/checkout");
    assert!(monitor.aggregator(PORT).unwrap().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_pending_lookup() {
    let (monitor, _, _) = monitor();
    monitor.start().unwrap();

    monitor
        .submit(response("200 OK", 40005, 999, 0))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = tokio::time::Instant::now();
    monitor.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
}
