//! Configuration loading from disk

use std::io::Write;
use std::time::Duration;
use wire_monitor::config::OverflowPolicy;
use wire_monitor::{MonitorConfig, MonitorError, Protocol};

#[test]
fn test_load_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
service_id = "checkout"

[[ports]]
port = 8080
protocol = "http"

[[ports]]
port = 3306
protocol = "mysql"

[aggregation]
publish_interval_ms = 1000
top_n = 5

[capture]
queue_capacity = 64
overflow = "drop_newest"

[statsd]
addr = "127.0.0.1:8125"
"#
    )
    .unwrap();

    let config = MonitorConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.service_id, "checkout");
    assert_eq!(config.ports.len(), 2);
    assert_eq!(config.ports[1].protocol, Protocol::Mysql);
    assert_eq!(config.aggregation.publish_interval(), Duration::from_secs(1));
    assert_eq!(config.aggregation.top_n, 5);
    assert_eq!(config.aggregation.reservoir_size, 10_000);
    assert_eq!(config.capture.overflow, OverflowPolicy::DropNewest);
    assert_eq!(config.statsd_prefix(8080), "checkout.8080");
    assert_eq!(config.capture_filter(3306), "port 3306");
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = MonitorConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, MonitorError::Io(_)));
}

#[test]
fn test_duplicate_ports_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[[ports]]\nport = 80\nprotocol = \"http\"\n\n[[ports]]\nport = 80\nprotocol = \"http\""
    )
    .unwrap();

    let config = MonitorConfig::from_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(MonitorError::InvalidConfig(_))));
}
