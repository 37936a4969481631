//! Aggregated gateway metrics and Prometheus text exposition.
//!
//! The hot-path primitives (counters, histograms, gauges) are lock-free;
//! a single mutex guards the sparse per-endpoint/per-model maps and the
//! sliding window of batch sizes. The exposition is a consistent snapshot
//! per metric but makes no cross-metric linearizability promise.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

use super::core::{Counter, Gauge, Histogram};
use crate::config::MetricsConfig;

/// Prometheus text format 0.0.4.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Sliding window bound for the average-batch-size gauge.
const BATCH_WINDOW: usize = 1000;

#[derive(Default)]
struct SparseMetrics {
    /// `(method, endpoint, status)` request counts.
    request_counts: HashMap<(String, String, u16), u64>,
    model_inference_counts: HashMap<String, u64>,
    model_load_times: HashMap<String, f64>,
    batch_sizes: Vec<usize>,
}

/// Process-wide metrics collector.
pub struct MetricsCollector {
    requests_total: Counter,
    request_errors: Counter,
    inference_total: Counter,
    batches_total: Counter,

    request_latency: Histogram,
    inference_latency: Histogram,
    batch_latency: Histogram,

    active_sessions: Gauge,
    loaded_models: Gauge,

    sparse: Mutex<SparseMetrics>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            requests_total: Counter::new(),
            request_errors: Counter::new(),
            inference_total: Counter::new(),
            batches_total: Counter::new(),
            request_latency: Histogram::new(&config.latency_buckets),
            inference_latency: Histogram::new(&config.latency_buckets),
            batch_latency: Histogram::new(&config.latency_buckets),
            active_sessions: Gauge::new(),
            loaded_models: Gauge::new(),
            sparse: Mutex::new(SparseMetrics::default()),
            start_time: Instant::now(),
        }
    }

    /// Record one HTTP request.
    pub fn record_request(&self, endpoint: &str, method: &str, status: u16, latency_seconds: f64) {
        self.requests_total.inc();
        self.request_latency.observe(latency_seconds);
        if status >= 400 {
            self.request_errors.inc();
        }

        let mut sparse = self.sparse.lock().unwrap();
        *sparse
            .request_counts
            .entry((method.to_string(), endpoint.to_string(), status))
            .or_insert(0) += 1;
    }

    /// Record one inference execution.
    pub fn record_inference(&self, model: &str, latency_seconds: f64) {
        self.inference_total.inc();
        self.inference_latency.observe(latency_seconds);

        let mut sparse = self.sparse.lock().unwrap();
        *sparse.model_inference_counts.entry(model.to_string()).or_insert(0) += 1;
    }

    /// Record one dispatched batch.
    pub fn record_batch(&self, batch_size: usize, latency_seconds: f64) {
        self.batches_total.inc();
        self.batch_latency.observe(latency_seconds);

        let mut sparse = self.sparse.lock().unwrap();
        sparse.batch_sizes.push(batch_size);
        if sparse.batch_sizes.len() > BATCH_WINDOW {
            sparse.batch_sizes.remove(0);
        }
    }

    /// Record how long a model took to load.
    pub fn record_model_load(&self, model: &str, load_time_seconds: f64) {
        let mut sparse = self.sparse.lock().unwrap();
        sparse.model_load_times.insert(model.to_string(), load_time_seconds);
    }

    pub fn set_active_sessions(&self, count: i64) {
        self.active_sessions.set(count as f64);
    }

    pub fn set_loaded_models(&self, count: usize) {
        self.loaded_models.set(count as f64);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.value()
    }

    pub fn request_errors_total(&self) -> u64 {
        self.request_errors.value()
    }

    pub fn batches_total(&self) -> u64 {
        self.batches_total.value()
    }

    /// Sum of the per-`(method, endpoint, status)` counters.
    pub fn request_count_sum(&self) -> u64 {
        self.sparse.lock().unwrap().request_counts.values().sum()
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Render all metrics in Prometheus text format 0.0.4.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        writeln!(out, "# HELP onnx_server_uptime_seconds Time since server started").unwrap();
        writeln!(out, "# TYPE onnx_server_uptime_seconds gauge").unwrap();
        writeln!(out, "onnx_server_uptime_seconds {}\n", self.uptime_seconds()).unwrap();

        writeln!(out, "# HELP onnx_requests_total Total number of HTTP requests").unwrap();
        writeln!(out, "# TYPE onnx_requests_total counter").unwrap();
        writeln!(out, "onnx_requests_total {}\n", self.requests_total.value()).unwrap();

        writeln!(out, "# HELP onnx_request_errors_total Total number of HTTP error responses")
            .unwrap();
        writeln!(out, "# TYPE onnx_request_errors_total counter").unwrap();
        writeln!(out, "onnx_request_errors_total {}\n", self.request_errors.value()).unwrap();

        writeln!(out, "# HELP onnx_request_duration_seconds HTTP request latency").unwrap();
        writeln!(out, "# TYPE onnx_request_duration_seconds histogram").unwrap();
        write_histogram(&mut out, "onnx_request_duration_seconds", &self.request_latency);
        out.push('\n');

        writeln!(out, "# HELP onnx_inference_total Total number of inference requests").unwrap();
        writeln!(out, "# TYPE onnx_inference_total counter").unwrap();
        writeln!(out, "onnx_inference_total {}\n", self.inference_total.value()).unwrap();

        writeln!(out, "# HELP onnx_inference_duration_seconds Inference latency").unwrap();
        writeln!(out, "# TYPE onnx_inference_duration_seconds histogram").unwrap();
        write_histogram(&mut out, "onnx_inference_duration_seconds", &self.inference_latency);
        out.push('\n');

        {
            let sparse = self.sparse.lock().unwrap();

            if !sparse.request_counts.is_empty() {
                writeln!(out, "# HELP onnx_endpoint_requests_total HTTP requests per endpoint")
                    .unwrap();
                writeln!(out, "# TYPE onnx_endpoint_requests_total counter").unwrap();
                for ((method, endpoint, status), count) in &sparse.request_counts {
                    writeln!(
                        out,
                        "onnx_endpoint_requests_total{{method=\"{method}\",endpoint=\"{endpoint}\",status=\"{status}\"}} {count}"
                    )
                    .unwrap();
                }
                out.push('\n');
            }

            if !sparse.model_inference_counts.is_empty() {
                writeln!(out, "# HELP onnx_model_inference_total Inference requests per model")
                    .unwrap();
                writeln!(out, "# TYPE onnx_model_inference_total counter").unwrap();
                for (model, count) in &sparse.model_inference_counts {
                    writeln!(out, "onnx_model_inference_total{{model=\"{model}\"}} {count}")
                        .unwrap();
                }
                out.push('\n');
            }

            if !sparse.model_load_times.is_empty() {
                writeln!(out, "# HELP onnx_model_load_time_seconds Last load time per model")
                    .unwrap();
                writeln!(out, "# TYPE onnx_model_load_time_seconds gauge").unwrap();
                for (model, seconds) in &sparse.model_load_times {
                    writeln!(out, "onnx_model_load_time_seconds{{model=\"{model}\"}} {seconds}")
                        .unwrap();
                }
                out.push('\n');
            }
        }

        writeln!(out, "# HELP onnx_batches_total Total number of batch executions").unwrap();
        writeln!(out, "# TYPE onnx_batches_total counter").unwrap();
        writeln!(out, "onnx_batches_total {}\n", self.batches_total.value()).unwrap();

        writeln!(out, "# HELP onnx_batch_duration_seconds Batch execution latency").unwrap();
        writeln!(out, "# TYPE onnx_batch_duration_seconds histogram").unwrap();
        write_histogram(&mut out, "onnx_batch_duration_seconds", &self.batch_latency);
        out.push('\n');

        {
            let sparse = self.sparse.lock().unwrap();
            if !sparse.batch_sizes.is_empty() {
                let avg: f64 = sparse.batch_sizes.iter().sum::<usize>() as f64
                    / sparse.batch_sizes.len() as f64;
                writeln!(out, "# HELP onnx_average_batch_size Average batch size").unwrap();
                writeln!(out, "# TYPE onnx_average_batch_size gauge").unwrap();
                writeln!(out, "onnx_average_batch_size {avg}\n").unwrap();
            }
        }

        writeln!(out, "# HELP onnx_active_sessions Currently active inference sessions").unwrap();
        writeln!(out, "# TYPE onnx_active_sessions gauge").unwrap();
        writeln!(out, "onnx_active_sessions {}\n", self.active_sessions.value()).unwrap();

        writeln!(out, "# HELP onnx_loaded_models Number of loaded models").unwrap();
        writeln!(out, "# TYPE onnx_loaded_models gauge").unwrap();
        writeln!(out, "onnx_loaded_models {}", self.loaded_models.value()).unwrap();

        out
    }
}

fn write_histogram(out: &mut String, name: &str, hist: &Histogram) {
    for bucket in hist.buckets() {
        if bucket.upper_bound.is_infinite() {
            writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", bucket.count()).unwrap();
        } else {
            writeln!(out, "{name}_bucket{{le=\"{}\"}} {}", bucket.upper_bound, bucket.count())
                .unwrap();
        }
    }
    writeln!(out, "{name}_sum {}", hist.sum()).unwrap();
    writeln!(out, "{name}_count {}", hist.count()).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(&MetricsConfig::default())
    }

    #[test]
    fn requests_total_equals_per_status_sum() {
        let metrics = collector();
        metrics.record_request("/v1/models/m/infer", "POST", 200, 0.01);
        metrics.record_request("/v1/models/m/infer", "POST", 200, 0.02);
        metrics.record_request("/v1/models/x/infer", "POST", 404, 0.001);
        metrics.record_request("/health", "GET", 200, 0.0005);

        assert_eq!(metrics.requests_total(), 4);
        assert_eq!(metrics.request_count_sum(), metrics.requests_total());
        assert_eq!(metrics.request_errors_total(), 1);
    }

    #[test]
    fn exposition_contains_histogram_and_gauge_lines() {
        let metrics = collector();
        for _ in 0..8 {
            metrics.record_request("/v1/models/m/infer", "POST", 200, 0.01);
        }
        metrics.record_batch(8, 0.02);
        metrics.set_loaded_models(1);

        let text = metrics.export_prometheus();
        assert!(text.contains("onnx_requests_total 8"));
        assert!(text.contains("onnx_request_duration_seconds_bucket{le=\"+Inf\"} 8"));
        assert!(text.contains("onnx_request_duration_seconds_sum"));
        assert!(text.contains("onnx_request_duration_seconds_count 8"));
        assert!(text.contains("onnx_batches_total 1"));
        assert!(text.contains("onnx_average_batch_size 8"));
        assert!(text.contains("onnx_loaded_models 1"));
    }

    #[test]
    fn batch_window_is_bounded() {
        let metrics = collector();
        for _ in 0..1100 {
            metrics.record_batch(2, 0.001);
        }
        metrics.record_batch(4, 0.001);
        let sparse = metrics.sparse.lock().unwrap();
        assert_eq!(sparse.batch_sizes.len(), BATCH_WINDOW);
    }

    #[test]
    fn per_model_counts_appear_in_exposition() {
        let metrics = collector();
        metrics.record_inference("resnet", 0.004);
        metrics.record_inference("resnet", 0.004);
        metrics.record_model_load("resnet", 0.25);

        let text = metrics.export_prometheus();
        assert!(text.contains("onnx_model_inference_total{model=\"resnet\"} 2"));
        assert!(text.contains("onnx_model_load_time_seconds{model=\"resnet\"} 0.25"));
        assert!(text.contains("onnx_inference_total 2"));
    }
}
