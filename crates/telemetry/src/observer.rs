//! Run observer for batch pipelines.
//!
//! The orchestrator reports every per-entity transition through a
//! [`RunObserver`] supplied by its caller, instead of writing to ambient
//! process-wide state.

use crate::metrics::Metrics;
use tracing::{error, info, warn};

/// Identifies the entity an event is about.
#[derive(Debug, Clone, Copy)]
pub struct EntityContext<'a> {
    /// Natural key of the entity (municipality code).
    pub code: i64,
    /// Display name.
    pub name: &'a str,
    /// Number of source records for the entity.
    pub records: usize,
}

/// Receives pipeline lifecycle events.
///
/// Every method has a no-op default so observers only implement what they
/// care about.
pub trait RunObserver {
    /// The batch is about to start processing `entities` entities.
    fn run_started(&self, _entities: usize) {}

    /// The entity was forecast and persisted.
    fn entity_processed(&self, _entity: EntityContext<'_>, _forecasts: usize, _with_metrics: bool) {}

    /// The entity was skipped before training.
    fn entity_skipped(&self, _entity: EntityContext<'_>, _reason: &str) {}

    /// The entity failed and its writes were rolled back.
    fn entity_failed(&self, _entity: EntityContext<'_>, _error: &str) {}

    /// Accuracy metrics could not be computed for the entity.
    fn metrics_skipped(&self, _entity: EntityContext<'_>, _reason: &str) {}

    /// Rows were upserted for an entity.
    fn rows_written(&self, _count: u64) {}

    /// A model stage ("fit" or "predict") took `seconds`.
    fn model_timing(&self, _stage: &str, _seconds: f64) {}

    /// The batch finished.
    fn run_finished(&self, _processed: usize, _skipped: usize, _failed: usize) {}
}

/// Observer that logs through `tracing` and counts through Prometheus.
#[derive(Clone)]
pub struct TelemetryObserver {
    metrics: Metrics,
}

impl TelemetryObserver {
    /// Create an observer reporting into `metrics`.
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    /// The metrics this observer reports into.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl RunObserver for TelemetryObserver {
    fn run_started(&self, entities: usize) {
        info!(entities, "Starting forecasting batch");
    }

    fn entity_processed(&self, entity: EntityContext<'_>, forecasts: usize, with_metrics: bool) {
        self.metrics.inc_entities_processed();
        info!(
            code = entity.code,
            name = entity.name,
            records = entity.records,
            forecasts,
            with_metrics,
            "Municipality processed"
        );
    }

    fn entity_skipped(&self, entity: EntityContext<'_>, reason: &str) {
        self.metrics.inc_entities_skipped();
        warn!(
            code = entity.code,
            name = entity.name,
            records = entity.records,
            reason,
            "Municipality skipped"
        );
    }

    fn entity_failed(&self, entity: EntityContext<'_>, err: &str) {
        self.metrics.inc_entities_failed();
        error!(
            code = entity.code,
            name = entity.name,
            records = entity.records,
            error = err,
            "Municipality failed"
        );
    }

    fn metrics_skipped(&self, entity: EntityContext<'_>, reason: &str) {
        self.metrics.inc_metrics_skipped();
        warn!(
            code = entity.code,
            name = entity.name,
            reason,
            "Accuracy metrics not computed"
        );
    }

    fn rows_written(&self, count: u64) {
        self.metrics.inc_rows_written(count);
    }

    fn model_timing(&self, stage: &str, seconds: f64) {
        self.metrics.observe_model_latency(stage, seconds);
    }

    fn run_finished(&self, processed: usize, skipped: usize, failed: usize) {
        info!(processed, skipped, failed, "Forecasting batch finished");
    }
}
