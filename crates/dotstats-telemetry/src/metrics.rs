//! In-memory counters and gauges.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// Point-in-time value of one labelled metric.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MetricSample {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<(String, String)>,
    pub kind: MetricKind,
    pub value: f64,
}

/// Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Last value set.
struct Gauge {
    // f64 bits
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0f64.to_bits() as i64),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

type MetricKey = (String, Vec<(String, String)>);

fn key(name: &str, labels: &[(&str, &str)]) -> MetricKey {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

/// Registry of labelled counters and gauges.
pub struct MetricsRecorder {
    counters: DashMap<MetricKey, Counter>,
    gauges: DashMap<MetricKey, Gauge>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.counters
            .entry(key(name, labels))
            .or_insert_with(Counter::new)
            .increment(n);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&key(name, labels))
            .map_or(0, |c| c.get())
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges
            .entry(key(name, labels))
            .or_insert_with(Gauge::new)
            .set(value);
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges.get(&key(name, labels)).map_or(0.0, |g| g.get())
    }

    /// All metrics sorted by name, then labels.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut samples: Vec<MetricSample> = self
            .counters
            .iter()
            .map(|entry| MetricSample {
                name: entry.key().0.clone(),
                labels: entry.key().1.clone(),
                kind: MetricKind::Counter,
                value: entry.value().get() as f64,
            })
            .chain(self.gauges.iter().map(|entry| MetricSample {
                name: entry.key().0.clone(),
                labels: entry.key().1.clone(),
                kind: MetricKind::Gauge,
                value: entry.value().get(),
            }))
            .collect();
        samples.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        samples
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
