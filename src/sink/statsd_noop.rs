//! Statsd stand-in used when the `statsd` feature is disabled

use super::recorder::MetricsRecorder;
use crate::config::StatsdConfig;

#[derive(Clone, Default)]
pub struct StatsdRecorder;

impl StatsdRecorder {
    #[inline(always)]
    pub fn new(_config: &StatsdConfig, _prefix: String) -> Self {
        StatsdRecorder
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        false
    }
}

impl MetricsRecorder for StatsdRecorder {
    #[inline(always)]
    fn count(&self, _name: &str, _value: u64) {}

    #[inline(always)]
    fn gauge(&self, _name: &str, _value: f64) {}
}
