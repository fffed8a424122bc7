//! Runtime Metrics
//!
//! Counters, gauges and histograms for the scheduling and detection loops.
//! A single [`MetricsCollector`] is created by the binary and injected, by
//! `Arc`, into whatever records metrics.
//!
//! Histograms keep a bounded window of the most recent observations, so a
//! long session does not grow memory without limit; count, sum, min and max
//! still cover every observation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

/// Observations kept per histogram for percentile estimates
const HISTOGRAM_WINDOW: usize = 4096;

/// Metrics collector shared by all components
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Histogram>>,
    start_time: Instant,
}

impl MetricsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Add `value` to a counter
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Set a gauge
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    /// Record one histogram observation
    pub fn record_histogram(&self, name: &str, value: f64) {
        let mut histograms = self.histograms.write();
        histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .record(value);
    }

    /// Counter value
    pub fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).copied()
    }

    /// Gauge value
    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).copied()
    }

    /// Histogram statistics
    pub fn get_histogram(&self, name: &str) -> Option<HistogramStats> {
        self.histograms.read().get(name).map(Histogram::stats)
    }

    /// Copy of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: SystemTime::now(),
            uptime: self.start_time.elapsed(),
            counters: self.counters.read().clone(),
            gauges: self.gauges.read().clone(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.stats()))
                .collect(),
        }
    }

    /// Export in Prometheus text format
    ///
    /// Dots in metric names become underscores.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();
        let prom = |name: &str| name.replace('.', "_");

        let mut counters: Vec<_> = self.counters.read().iter().map(|(k, v)| (k.clone(), *v)).collect();
        counters.sort();
        for (name, value) in counters {
            let name = prom(&name);
            output.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, value));
        }

        let mut gauges: Vec<_> = self.gauges.read().iter().map(|(k, v)| (k.clone(), *v)).collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in gauges {
            let name = prom(&name);
            output.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, value));
        }

        let mut histograms: Vec<_> = self
            .histograms
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.stats()))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, stats) in histograms {
            let name = prom(&name);
            output.push_str(&format!("# TYPE {} summary\n", name));
            output.push_str(&format!("{}{{quantile=\"0.5\"}} {}\n", name, stats.p50));
            output.push_str(&format!("{}{{quantile=\"0.95\"}} {}\n", name, stats.p95));
            output.push_str(&format!("{}{{quantile=\"0.99\"}} {}\n", name, stats.p99));
            output.push_str(&format!("{}_sum {}\n", name, stats.sum));
            output.push_str(&format!("{}_count {}\n", name, stats.count));
        }

        output
    }

    /// Export as pretty JSON
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Write a report to `path`
    ///
    /// A `.prom` extension selects the Prometheus text format; anything else
    /// gets JSON.
    pub fn write_report(&self, path: &Path) -> io::Result<()> {
        let body = match path.extension().and_then(|e| e.to_str()) {
            Some("prom") => self.export_prometheus(),
            _ => self.export_json().map_err(io::Error::from)?,
        };
        std::fs::write(path, body)
    }

    /// One-line human summary of the play session metrics
    pub fn summary(&self) -> String {
        let counter = |name| self.get_counter(name).unwrap_or(0);
        let lateness = self
            .get_histogram(metric_names::DISPATCH_LATENESS_US)
            .unwrap_or_default();
        format!(
            "{} session(s), {} ticks, {} notes dispatched, {} dropped, {} actions, {} abandoned, lateness p50={:.0}us p99={:.0}us",
            counter(metric_names::SESSIONS_FINISHED),
            counter(metric_names::PLAYER_TICKS),
            counter(metric_names::NOTES_DISPATCHED),
            counter(metric_names::NOTES_DROPPED),
            counter(metric_names::ACTIONS_DISPATCHED),
            counter(metric_names::STREAMS_ABANDONED),
            lateness.p50,
            lateness.p99,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Value distribution with a bounded observation window
struct Histogram {
    window: VecDeque<f64>,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            count: 0,
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
        }
    }

    fn record(&mut self, value: f64) {
        if self.window.len() == HISTOGRAM_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    fn stats(&self) -> HistogramStats {
        if self.count == 0 {
            return HistogramStats::default();
        }

        let mean = self.sum / self.count as f64;
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        HistogramStats {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Lower-interpolated percentile of sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    let index = ((sorted_values.len() - 1) as f64 * p) as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}

/// Histogram statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    /// Number of observations
    pub count: u64,
    /// Sum of observations
    pub sum: f64,
    /// Smallest observation
    pub min: f64,
    /// Largest observation
    pub max: f64,
    /// Mean of all observations
    pub mean: f64,
    /// Median of the recent window
    pub p50: f64,
    /// 95th percentile of the recent window
    pub p95: f64,
    /// 99th percentile of the recent window
    pub p99: f64,
}

/// Point-in-time copy of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub timestamp: SystemTime,
    /// Time since the collector was created
    pub uptime: Duration,
    /// Counters
    pub counters: HashMap<String, u64>,
    /// Gauges
    pub gauges: HashMap<String, f64>,
    /// Histograms
    pub histograms: HashMap<String, HistogramStats>,
}

pub mod metric_names {
    //! Metric names used across the crate.

    /// How late each touch action was dispatched (µs)
    pub const DISPATCH_LATENESS_US: &str = "touch.dispatch_lateness_us";
    /// Touch actions sent to the sink
    pub const ACTIONS_DISPATCHED: &str = "touch.actions_dispatched";
    /// Gesture streams dropped for lack of a slot
    pub const STREAMS_ABANDONED: &str = "touch.streams_abandoned";

    /// Note detection time per frame (ms)
    pub const DETECT_MS: &str = "vision.detect_ms";

    /// Notes turned into gestures
    pub const NOTES_DISPATCHED: &str = "player.notes_dispatched";
    /// Notes discarded for low confidence
    pub const NOTES_DROPPED: &str = "player.notes_dropped";
    /// Play loop iterations
    pub const PLAYER_TICKS: &str = "player.ticks";
    /// Live notes still being sampled
    pub const PENDING_SAMPLES: &str = "player.pending_samples";
    /// Play sessions that ran to an end
    pub const SESSIONS_FINISHED: &str = "player.sessions_finished";
}

/// Measures elapsed wall time
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter(metric_names::ACTIONS_DISPATCHED, 1);
        metrics.increment_counter(metric_names::ACTIONS_DISPATCHED, 5);
        assert_eq!(metrics.get_counter(metric_names::ACTIONS_DISPATCHED), Some(6));
    }

    #[test]
    fn test_gauge() {
        let metrics = MetricsCollector::new();
        metrics.set_gauge(metric_names::PENDING_SAMPLES, 4.0);
        assert_eq!(metrics.get_gauge(metric_names::PENDING_SAMPLES), Some(4.0));
    }

    #[test]
    fn test_histogram() {
        let metrics = MetricsCollector::new();
        for v in [10.0, 20.0, 30.0] {
            metrics.record_histogram(metric_names::DETECT_MS, v);
        }
        let stats = metrics.get_histogram(metric_names::DETECT_MS).unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 20.0).abs() < 0.01);
        assert_eq!(stats.p50, 20.0);
    }

    #[test]
    fn test_histogram_window_is_bounded() {
        let mut hist = Histogram::new();
        for i in 0..(HISTOGRAM_WINDOW + 100) {
            hist.record(i as f64);
        }
        assert_eq!(hist.window.len(), HISTOGRAM_WINDOW);
        let stats = hist.stats();
        assert_eq!(stats.count, (HISTOGRAM_WINDOW + 100) as u64);
        assert_eq!(stats.min, 0.0);
    }

    #[test]
    fn test_write_report_picks_format_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let metrics = MetricsCollector::new();
        metrics.increment_counter(metric_names::NOTES_DISPATCHED, 3);
        metrics.set_gauge(metric_names::PENDING_SAMPLES, 2.0);

        let prom = dir.path().join("metrics.prom");
        metrics.write_report(&prom).unwrap();
        let text = std::fs::read_to_string(&prom).unwrap();
        assert!(text.contains("player_notes_dispatched 3"));
        assert!(text.contains("# TYPE player_pending_samples gauge"));

        let json = dir.path().join("metrics.json");
        metrics.write_report(&json).unwrap();
        let snapshot: MetricsSnapshot = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(snapshot.counters.get(metric_names::NOTES_DISPATCHED), Some(&3));
        assert_eq!(snapshot.gauges.get(metric_names::PENDING_SAMPLES), Some(&2.0));
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter(metric_names::NOTES_DISPATCHED, 42);
        metrics.record_histogram(metric_names::DISPATCH_LATENESS_US, 120.0);
        let output = metrics.export_prometheus();
        assert!(output.contains("player_notes_dispatched 42"));
        assert!(output.contains("touch_dispatch_lateness_us_count 1"));
    }

    #[test]
    fn test_json_export() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter(metric_names::PLAYER_TICKS, 1);
        assert!(metrics.export_json().unwrap().contains("player.ticks"));
    }

    #[test]
    fn test_summary() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter(metric_names::NOTES_DROPPED, 2);
        assert!(metrics.summary().contains("2 dropped"));
    }
}
