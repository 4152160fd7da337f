//! Capped latency sample list
//!
//! Samples are appended until the list holds `capacity` entries; after that
//! each new sample overwrites a uniformly chosen slot. This keeps memory
//! bounded and is an approximation, not a true reservoir sample. A
//! zero-duration sample is a real sample.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LatencyReservoir {
    samples: Vec<Duration>,
    capacity: usize,
}

/// min/avg/max over the retained samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

impl LatencySummary {
    pub fn min_ms(&self) -> f64 {
        as_ms(self.min)
    }

    pub fn avg_ms(&self) -> f64 {
        as_ms(self.avg)
    }

    pub fn max_ms(&self) -> f64 {
        as_ms(self.max)
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl LatencyReservoir {
    pub fn new(capacity: usize) -> Self {
        LatencyReservoir {
            samples: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record<R: Rng + ?Sized>(&mut self, sample: Duration, rng: &mut R) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            let idx = rng.gen_range(0..self.capacity);
            self.samples[idx] = sample;
        }
    }

    pub fn summary(&self) -> Option<LatencySummary> {
        let first = *self.samples.first()?;
        let mut min = first;
        let mut max = first;
        let mut total = Duration::ZERO;
        for &s in &self.samples {
            min = min.min(s);
            max = max.max(s);
            total += s;
        }
        Some(LatencySummary {
            min,
            avg: total / self.samples.len() as u32,
            max,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
