use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Histograms keep only the most recent observations.
const HISTOGRAM_WINDOW: usize = 1024;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One metric value at snapshot time. Histograms report their p50.
#[derive(Clone, Debug, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub metric_type: MetricType,
    pub value: f64,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

struct Counter(AtomicU64);

impl Counter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

/// f64 stored as raw bits.
struct Gauge(AtomicU64);

impl Gauge {
    fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }

    fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

struct Histogram {
    window: Mutex<VecDeque<f64>>,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(HISTOGRAM_WINDOW)),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        let mut window = self.window.lock();
        if window.len() == HISTOGRAM_WINDOW {
            window.pop_front();
        }
        window.push_back(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> HistogramSummary {
        let mut sorted: Vec<f64> = self.window.lock().iter().copied().collect();
        if sorted.is_empty() {
            return HistogramSummary::default();
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = sorted.len();
        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count: self.count.load(Ordering::Relaxed),
            sum: sorted.iter().sum(),
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

fn get_or_insert<T>(
    map: &RwLock<HashMap<MetricKey, Arc<T>>>,
    key: MetricKey,
    make: fn() -> T,
) -> Arc<T> {
    if let Some(existing) = map.read().get(&key) {
        return Arc::clone(existing);
    }
    Arc::clone(map.write().entry(key).or_insert_with(|| Arc::new(make())))
}

/// Thread-safe in-process metrics registry.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Arc<Counter>>>,
    gauges: RwLock<HashMap<MetricKey, Arc<Gauge>>>,
    histograms: RwLock<HashMap<MetricKey, Arc<Histogram>>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        get_or_insert(&self.counters, MetricKey::new(name, labels), Counter::new)
            .0
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(&MetricKey::new(name, labels))
            .map_or(0, |c| c.0.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        get_or_insert(&self.gauges, MetricKey::new(name, labels), Gauge::new).set(value);
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .read()
            .get(&MetricKey::new(name, labels))
            .map_or(0.0, |g| g.get())
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        get_or_insert(&self.histograms, MetricKey::new(name, labels), Histogram::new)
            .observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .read()
            .get(&MetricKey::new(name, labels))
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    /// Current value of every metric, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        for (key, c) in self.counters.read().iter() {
            samples.push(sample(key, MetricType::Counter, c.0.load(Ordering::Relaxed) as f64));
        }
        for (key, g) in self.gauges.read().iter() {
            samples.push(sample(key, MetricType::Gauge, g.get()));
        }
        for (key, h) in self.histograms.read().iter() {
            samples.push(sample(key, MetricType::Histogram, h.summary().p50));
        }
        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        samples
    }
}

fn sample(key: &MetricKey, metric_type: MetricType, value: f64) -> MetricSample {
    MetricSample {
        name: key.name.clone(),
        labels: key.labels.clone(),
        metric_type,
        value,
    }
}

/// Log a metrics snapshot every `interval` until `cancel` fires.
pub fn start_reporter(
    recorder: Arc<MetricsRecorder>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for s in recorder.snapshot() {
                        tracing::info!(
                            metric = %s.name,
                            labels = ?s.labels,
                            kind = ?s.metric_type,
                            value = s.value,
                            "metrics snapshot"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basic() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("relay_events_total", &[("outcome", "delivered")], 1);
        recorder.counter_inc("relay_events_total", &[("outcome", "delivered")], 1);
        recorder.counter_inc("relay_events_total", &[("outcome", "skipped")], 1);

        assert_eq!(recorder.counter_get("relay_events_total", &[("outcome", "delivered")]), 2);
        assert_eq!(recorder.counter_get("relay_events_total", &[("outcome", "skipped")]), 1);
        assert_eq!(recorder.counter_get("relay_events_total", &[("outcome", "rejected")]), 0);
    }

    #[test]
    fn label_order_does_not_matter() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("x", &[("a", "1"), ("b", "2")], 3);
        assert_eq!(recorder.counter_get("x", &[("b", "2"), ("a", "1")]), 3);
    }

    #[test]
    fn gauge_set_overwrites() {
        let recorder = MetricsRecorder::new();
        recorder.gauge_set("relay_position", &[], 10.0);
        recorder.gauge_set("relay_position", &[], 12.0);
        assert_eq!(recorder.gauge_get("relay_position", &[]), 12.0);
        assert_eq!(recorder.gauge_get("missing", &[]), 0.0);
    }

    #[test]
    fn histogram_percentiles() {
        let recorder = MetricsRecorder::new();
        for i in 1..=100 {
            recorder.histogram_observe("delivery_latency_ms", &[], i as f64);
        }
        let summary = recorder.histogram_summary("delivery_latency_ms", &[]);
        assert_eq!(summary.count, 100);
        assert_eq!(summary.sum, 5050.0);
        assert_eq!(summary.p50, 51.0);
        assert_eq!(summary.p95, 96.0);
        assert_eq!(summary.p99, 100.0);
    }

    #[test]
    fn histogram_window_is_bounded() {
        let recorder = MetricsRecorder::new();
        for i in 0..(HISTOGRAM_WINDOW + 10) {
            recorder.histogram_observe("h", &[], i as f64);
        }
        let summary = recorder.histogram_summary("h", &[]);
        assert_eq!(summary.count, (HISTOGRAM_WINDOW + 10) as u64);
        // The oldest ten observations were evicted.
        let expected: f64 = (10..HISTOGRAM_WINDOW + 10).map(|i| i as f64).sum();
        assert_eq!(summary.sum, expected);
    }

    #[test]
    fn empty_histogram_summary() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.histogram_summary("none", &[]), HistogramSummary::default());
    }

    #[test]
    fn snapshot_covers_all_types() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("b_counter", &[], 2);
        recorder.gauge_set("a_gauge", &[], 1.5);
        recorder.histogram_observe("c_hist", &[], 7.0);

        let snap = recorder.snapshot();
        let names: Vec<&str> = snap.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a_gauge", "b_counter", "c_hist"]);
        assert_eq!(snap[0].metric_type, MetricType::Gauge);
        assert_eq!(snap[1].value, 2.0);
        assert_eq!(snap[2].value, 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stops_on_cancel() {
        let recorder = Arc::new(MetricsRecorder::new());
        let cancel = CancellationToken::new();
        let handle = start_reporter(recorder, Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(130)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
