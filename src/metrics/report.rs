//! Report rows published once per cycle

use serde::{Deserialize, Serialize};

/// One aggregated key; times are milliseconds rounded to two decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "Port")]
    pub port: String,
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Count")]
    pub count: u64,
    #[serde(rename = "AbnormalCount")]
    pub abnormal_count: u64,
    #[serde(rename = "AverageTime")]
    pub average_time: f64,
    #[serde(rename = "MaxTime")]
    pub max_time: f64,
    #[serde(rename = "CumulativeTime")]
    pub cumulative_time: f64,
    #[serde(
        rename = "ResponseBytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response_bytes: Option<u64>,
}

/// Round half up to `digits` decimals
pub fn round(value: f64, digits: i32) -> f64 {
    let pow = 10f64.powi(digits);
    ((value + 0.5 / pow) * pow).trunc() / pow
}

/// Keep the `n` rows with the largest cumulative time, largest first
pub fn top_n(mut rows: Vec<ReportRow>, n: usize) -> Vec<ReportRow> {
    rows.sort_by(|a, b| {
        b.cumulative_time
            .total_cmp(&a.cumulative_time)
            .then_with(|| a.key.cmp(&b.key))
    });
    rows.truncate(n);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, cumulative: f64) -> ReportRow {
        ReportRow {
            service_id: "svc".into(),
            port: "5000".into(),
            message_type: "http".into(),
            key: key.into(),
            count: 1,
            abnormal_count: 0,
            average_time: cumulative,
            max_time: cumulative,
            cumulative_time: cumulative,
            response_bytes: None,
        }
    }

    #[test]
    fn test_round_two_decimals() {
        assert_eq!(round(1.234, 2), 1.23);
        assert_eq!(round(1.235001, 2), 1.24);
        assert_eq!(round(0.0, 2), 0.0);
    }

    #[test]
    fn test_top_n_sorts_descending_and_truncates() {
        let rows = (0..25).map(|i| row(&format!("/k{}", i), i as f64)).collect();
        let top = top_n(rows, 20);
        assert_eq!(top.len(), 20);
        assert_eq!(top[0].cumulative_time, 24.0);
        assert_eq!(top[19].cumulative_time, 5.0);
        assert!(top.windows(2).all(|w| w[0].cumulative_time >= w[1].cumulative_time));
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(row("/a", 2.5)).unwrap();
        assert_eq!(json["ServiceID"], "svc");
        assert_eq!(json["Port"], "5000");
        assert_eq!(json["MessageType"], "http");
        assert_eq!(json["CumulativeTime"], 2.5);
        assert!(json.get("ResponseBytes").is_none());
    }
}
