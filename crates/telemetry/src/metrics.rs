//! Prometheus metrics for the forecasting pipeline.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics collector for one pipeline or server instance.
///
/// Each instance owns its registry, so several collectors can live in the
/// same process (tests, `process` followed by `serve`) without clashing.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    entities_processed: IntCounter,
    entities_skipped: IntCounter,
    entities_failed: IntCounter,
    metrics_skipped: IntCounter,
    rows_written: IntCounter,
    model_latency: HistogramVec,
    api_requests: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics instance with its own registry.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let entities_processed = IntCounter::new(
            "dropout_entities_processed_total",
            "Total number of municipalities forecast and persisted",
        )?;
        registry.register(Box::new(entities_processed.clone()))?;

        let entities_skipped = IntCounter::new(
            "dropout_entities_skipped_total",
            "Total number of municipalities skipped for insufficient training data",
        )?;
        registry.register(Box::new(entities_skipped.clone()))?;

        let entities_failed = IntCounter::new(
            "dropout_entities_failed_total",
            "Total number of municipalities that failed processing",
        )?;
        registry.register(Box::new(entities_failed.clone()))?;

        let metrics_skipped = IntCounter::new(
            "dropout_accuracy_metrics_skipped_total",
            "Total number of municipalities whose accuracy metrics could not be computed",
        )?;
        registry.register(Box::new(metrics_skipped.clone()))?;

        let rows_written = IntCounter::new(
            "dropout_rows_written_total",
            "Total number of historical, forecast and metric rows upserted",
        )?;
        registry.register(Box::new(rows_written.clone()))?;

        let model_latency = HistogramVec::new(
            HistogramOpts::new(
                "dropout_model_latency_seconds",
                "Model fit and predict latency in seconds",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(model_latency.clone()))?;

        let api_requests = IntCounterVec::new(
            Opts::new("dropout_api_requests_total", "Total number of API requests served"),
            &["endpoint"],
        )?;
        registry.register(Box::new(api_requests.clone()))?;

        Ok(Self {
            registry,
            entities_processed,
            entities_skipped,
            entities_failed,
            metrics_skipped,
            rows_written,
            model_latency,
            api_requests,
        })
    }

    /// Increment the processed municipalities counter.
    pub fn inc_entities_processed(&self) {
        self.entities_processed.inc();
    }

    /// Increment the skipped municipalities counter.
    pub fn inc_entities_skipped(&self) {
        self.entities_skipped.inc();
    }

    /// Increment the failed municipalities counter.
    pub fn inc_entities_failed(&self) {
        self.entities_failed.inc();
    }

    /// Increment the skipped accuracy metrics counter.
    pub fn inc_metrics_skipped(&self) {
        self.metrics_skipped.inc();
    }

    /// Add to the rows written counter.
    pub fn inc_rows_written(&self, count: u64) {
        self.rows_written.inc_by(count);
    }

    /// Record model latency for a stage ("fit" or "predict").
    pub fn observe_model_latency(&self, stage: &str, duration_secs: f64) {
        self.model_latency.with_label_values(&[stage]).observe(duration_secs);
    }

    /// Count one API request for `endpoint`.
    pub fn inc_api_request(&self, endpoint: &str) {
        self.api_requests.with_label_values(&[endpoint]).inc();
    }

    /// Get Prometheus metrics as a string.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_do_not_clash() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.inc_entities_processed();
        first.inc_rows_written(4);
        second.inc_entities_skipped();

        let text = first.gather().unwrap();
        assert!(text.contains("dropout_entities_processed_total 1"));
        assert!(text.contains("dropout_rows_written_total 4"));
        assert!(text.contains("dropout_entities_skipped_total 0"));
    }

    #[test]
    fn test_latency_histogram_is_labelled() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_model_latency("fit", 0.01);
        let text = metrics.gather().unwrap();
        assert!(text.contains("dropout_model_latency_seconds_count{stage=\"fit\"} 1"));

        metrics.inc_api_request("forecasts");
        let text = metrics.gather().unwrap();
        assert!(text.contains("dropout_api_requests_total{endpoint=\"forecasts\"} 1"));
    }
}
