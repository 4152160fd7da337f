//! DogStatsD counter/gauge publisher
//!
//! Non-blocking UDP client. Degrades to a no-op if the client cannot be
//! created.

use dogstatsd::{Client, Options};
use std::sync::Arc;

use super::recorder::MetricsRecorder;
use crate::config::StatsdConfig;

#[derive(Clone)]
pub struct StatsdRecorder {
    client: Arc<Option<Client>>,
    prefix: String,
}

impl StatsdRecorder {
    /// One recorder per watched port; `prefix` is prepended to every name
    pub fn new(config: &StatsdConfig, prefix: String) -> Self {
        let client = match Client::new(Options {
            to_addr: config.addr.clone(),
            ..Default::default()
        }) {
            Ok(c) => {
                tracing::info!(addr = %config.addr, prefix = %prefix, "statsd client ready");
                Some(c)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to create DogStatsD client: {}. Counters disabled.",
                    e
                );
                None
            }
        };

        StatsdRecorder {
            client: Arc::new(client),
            prefix,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn metric_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

impl MetricsRecorder for StatsdRecorder {
    #[inline]
    fn count(&self, name: &str, value: u64) {
        if let Some(ref client) = *self.client {
            let tags: [&str; 0] = [];
            let _ = client.count(self.metric_name(name), value as i64, tags);
        }
    }

    #[inline]
    fn gauge(&self, name: &str, value: f64) {
        if let Some(ref client) = *self.client {
            let tags: [&str; 0] = [];
            let _ = client.gauge(self.metric_name(name), value.to_string(), tags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_names() {
        let recorder = StatsdRecorder::new(&StatsdConfig::default(), "svc.5000".into());
        assert_eq!(recorder.metric_name("request.total"), "svc.5000.request.total");

        let bare = StatsdRecorder::new(&StatsdConfig::default(), String::new());
        assert_eq!(bare.metric_name("request.total"), "request.total");
        bare.count("request.total", 1);
    }
}
