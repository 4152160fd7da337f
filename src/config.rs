use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Application protocol decoded on a watched port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Mysql,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Mysql => "mysql",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Protocol::Http),
            "mysql" => Some(Protocol::Mysql),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One watched service port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub port: u16,
    pub protocol: Protocol,
}

/// What the capture queue does when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued segment to make room
    #[default]
    DropOldest,
    /// Reject the incoming segment
    DropNewest,
}

/// Settings handed through to the packet-capture collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface name; `None` lets the collaborator pick
    pub device: Option<String>,
    /// tcpdump-style filter expression, overrides the per-port filter
    pub bpf_filter: Option<String>,
    pub snaplen: u32,
    /// Capacity of the capture-to-decode queue per port
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            device: None,
            bpf_filter: None,
            snaplen: 65535,
            queue_capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Publish cycle and bucket sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub publish_interval_ms: u64,
    /// Buckets and clients untouched for this long are evicted
    pub idle_window_ms: u64,
    /// Latency samples kept per bucket
    pub reservoir_size: usize,
    /// Maximum report rows per publish
    pub top_n: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            publish_interval_ms: 5_000,
            idle_window_ms: 300_000,
            reservoir_size: 10_000,
            top_n: 20,
        }
    }
}

impl AggregationConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_millis(self.idle_window_ms)
    }
}

/// HTTP request/response correlation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub wait_attempts: u32,
    pub wait_interval_ms: u64,
    /// Pending requests older than this are treated as absent
    pub ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            wait_attempts: 5,
            wait_interval_ms: 2_000,
            ttl_ms: 10_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl CorrelationConfig {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    /// Watched port used when `PROTOCOL=mysql` arrives without `PORT`
    pub server_port: u16,
    /// Grouping key template, see `normalize::KeyFormat`
    pub key_format: String,
    /// Cap on bytes buffered for a single incomplete request packet
    pub max_buffered_bytes: usize,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        MysqlConfig {
            server_port: 3306,
            key_format: "#s:#q".to_string(),
            max_buffered_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// UDP destination for JSON report datagrams
    pub addr: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            addr: "127.0.0.1:6666".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdConfig {
    pub addr: String,
    /// Metric name prefix; defaults to `<service_id>.<port>`
    pub prefix: Option<String>,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        StatsdConfig {
            addr: "127.0.0.1:9125".to_string(),
            prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub service_id: String,
    pub ports: Vec<PortConfig>,
    pub capture: CaptureConfig,
    pub aggregation: AggregationConfig,
    pub correlation: CorrelationConfig,
    pub mysql: MysqlConfig,
    pub report: ReportConfig,
    pub statsd: StatsdConfig,
    pub logging: LoggingConfig,
    /// Time allowed for the final flush on shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            service_id: "default".to_string(),
            ports: vec![PortConfig {
                port: 5000,
                protocol: Protocol::Http,
            }],
            capture: CaptureConfig::default(),
            aggregation: AggregationConfig::default(),
            correlation: CorrelationConfig::default(),
            mysql: MysqlConfig::default(),
            report: ReportConfig::default(),
            statsd: StatsdConfig::default(),
            logging: LoggingConfig::default(),
            shutdown_grace_ms: 4_000,
        }
    }
}

impl MonitorConfig {
    /// Load from a TOML file; missing sections take their defaults
    pub fn from_file(path: &Path) -> Result<Self, MonitorError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, MonitorError> {
        let config: MonitorConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Apply `SERVICE_ID`, `PORT` and `PROTOCOL` overrides from the environment
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("SERVICE_ID").filter(|s| !s.is_empty()) {
            self.service_id = id;
        }
        let port = lookup("PORT").and_then(|s| s.trim().parse::<u16>().ok());
        let protocol = lookup("PROTOCOL").and_then(|s| Protocol::parse(&s));
        if port.is_some() || protocol.is_some() {
            let current = self.ports.first().copied().unwrap_or(PortConfig {
                port: 5000,
                protocol: Protocol::Http,
            });
            let fallback = match protocol {
                Some(Protocol::Mysql) if current.protocol != Protocol::Mysql => {
                    self.mysql.server_port
                }
                _ => current.port,
            };
            self.ports = vec![PortConfig {
                port: port.unwrap_or(fallback),
                protocol: protocol.unwrap_or(current.protocol),
            }];
        }
        self
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.ports.is_empty() {
            return Err(MonitorError::InvalidConfig("no ports configured".into()));
        }
        let mut seen = HashSet::new();
        for p in &self.ports {
            if p.port == 0 {
                return Err(MonitorError::InvalidConfig("port 0 is not watchable".into()));
            }
            if !seen.insert(p.port) {
                return Err(MonitorError::InvalidConfig(format!(
                    "port {} configured twice",
                    p.port
                )));
            }
        }
        if self.capture.queue_capacity == 0 {
            return Err(MonitorError::InvalidConfig("capture.queue_capacity must be > 0".into()));
        }
        if self.aggregation.publish_interval_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "aggregation.publish_interval_ms must be > 0".into(),
            ));
        }
        if self.aggregation.reservoir_size == 0 {
            return Err(MonitorError::InvalidConfig(
                "aggregation.reservoir_size must be > 0".into(),
            ));
        }
        if self.correlation.wait_attempts == 0 {
            return Err(MonitorError::InvalidConfig(
                "correlation.wait_attempts must be > 0".into(),
            ));
        }
        if self.correlation.sweep_interval_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "correlation.sweep_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Statsd prefix for one watched port
    pub fn statsd_prefix(&self, port: u16) -> String {
        match &self.statsd.prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}.{}", self.service_id, port),
        }
    }

    /// Capture filter for one watched port
    pub fn capture_filter(&self, port: u16) -> String {
        self.capture
            .bpf_filter
            .clone()
            .unwrap_or_else(|| format!("port {}", port))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Replace the watched ports
    pub fn with_ports(mut self, ports: Vec<PortConfig>) -> Self {
        self.ports = ports;
        self
    }

    /// Set the publish interval
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.aggregation.publish_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.aggregation.publish_interval(), Duration::from_secs(5));
        assert_eq!(config.aggregation.idle_window(), Duration::from_secs(300));
        assert_eq!(config.aggregation.reservoir_size, 10_000);
        assert_eq!(config.aggregation.top_n, 20);
        assert_eq!(config.correlation.wait_attempts, 5);
        assert_eq!(config.correlation.wait_interval(), Duration::from_secs(2));
        assert_eq!(config.mysql.server_port, 3306);
        assert_eq!(config.mysql.key_format, "#s:#q");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
            service_id = "orders"

            [[ports]]
            port = 3306
            protocol = "mysql"

            [aggregation]
            top_n = 5

            [capture]
            overflow = "drop_newest"
            "#,
        )
        .unwrap();

        assert_eq!(config.service_id, "orders");
        assert_eq!(config.ports[0].protocol, Protocol::Mysql);
        assert_eq!(config.aggregation.top_n, 5);
        assert_eq!(config.aggregation.reservoir_size, 10_000);
        assert_eq!(config.capture.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.statsd_prefix(3306), "orders.3306");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shutdown_grace_ms = 100\n[report]\naddr = \"10.0.0.9:7000\"").unwrap();

        let config = MonitorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.report.addr, "10.0.0.9:7000");
        assert_eq!(config.shutdown_grace(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = MonitorConfig::from_toml("ports = 12").unwrap_err();
        assert!(matches!(err, MonitorError::Parse(_)));
    }

    #[test]
    fn test_env_overrides_first_port() {
        let vars: HashMap<&str, &str> =
            [("PORT", "8080"), ("PROTOCOL", "MYSQL"), ("SERVICE_ID", "svc")].into();
        let config = MonitorConfig::default()
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.service_id, "svc");
        assert_eq!(
            config.ports,
            vec![PortConfig {
                port: 8080,
                protocol: Protocol::Mysql
            }]
        );
    }

    #[test]
    fn test_env_mysql_without_port_uses_server_port() {
        let mut config = MonitorConfig::default();
        config.mysql.server_port = 3307;
        let config = config.apply_vars(|name| (name == "PROTOCOL").then(|| "mysql".to_string()));

        assert_eq!(
            config.ports,
            vec![PortConfig {
                port: 3307,
                protocol: Protocol::Mysql
            }]
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_ports() {
        let config = MonitorConfig::default().with_ports(vec![
            PortConfig {
                port: 80,
                protocol: Protocol::Http,
            },
            PortConfig {
                port: 80,
                protocol: Protocol::Mysql,
            },
        ]);
        assert!(matches!(config.validate(), Err(MonitorError::InvalidConfig(_))));
    }

    #[test]
    fn test_capture_filter_falls_back_to_port() {
        let mut config = MonitorConfig::default();
        assert_eq!(config.capture_filter(5000), "port 5000");
        config.capture.bpf_filter = Some("tcp and port 80".to_string());
        assert_eq!(config.capture_filter(5000), "tcp and port 80");
    }
}
