//! Forecasting batch over every municipality of a jurisdiction.
//!
//! The batch runs inside one database transaction. Each municipality is
//! processed inside a savepoint of that transaction: its failure rolls back
//! only its own writes and the loop moves on, while an error escaping the
//! loop drops the transaction and with it every write of the run.

use crate::dataset::{Dataset, DropoutRow};
use crate::error::{EntityError, PipelineError};
use crate::prepare::prepare_series;
use chrono::{DateTime, Datelike, Utc};
use dropout_db::models::{
    AccuracyMetricsRecord, ForecastRecord, HistoricalRecord, MetricQuality, NewMunicipality,
};
use dropout_db::{store, DbPool};
use dropout_forecasting::{
    calculate_metrics, year_end, AccuracyMetrics, ForecastPoint, ModelTrainer, SeriesPoint,
};
use dropout_telemetry::{EntityContext, RunObserver};
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use std::time::Instant;
use tracing::{debug, info};

/// Settings of a forecasting batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// State abbreviation whose municipalities are forecast.
    pub jurisdiction: String,
    /// First year held out from training; its actual value validates the model.
    pub cutoff_year: i64,
    /// Number of years forecast after the cutoff year.
    pub horizon_years: u32,
    /// Municipalities with fewer training points are skipped.
    pub min_training_points: usize,
    /// Use the last training value as the actual when the cutoff year is missing.
    pub impute_missing_validation: bool,
    /// Also store the forecast for the cutoff year itself.
    pub persist_validation_forecast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jurisdiction: "SP".to_string(),
            cutoff_year: 2024,
            horizon_years: 2,
            min_training_points: 3,
            impute_missing_validation: false,
            persist_validation_forecast: false,
        }
    }
}

impl PipelineConfig {
    /// Years the model is asked to predict: the cutoff year and the horizon.
    pub fn forecast_years(&self) -> Vec<i64> {
        (0..=i64::from(self.horizon_years))
            .map(|offset| self.cutoff_year + offset)
            .collect()
    }

    fn persists_forecast_for(&self, year: i64) -> bool {
        year > self.cutoff_year || (self.persist_validation_forecast && year == self.cutoff_year)
    }
}

/// Terminal state of one municipality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Processed,
    Skipped,
    Failed,
}

/// What happened to one municipality during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityOutcome {
    pub code: i64,
    pub name: String,
    pub state: String,
    pub status: EntityStatus,
    /// Distinct years in the source data.
    pub records: usize,
    pub training_points: usize,
    pub validation_points: usize,
    pub forecasts_written: usize,
    pub metrics: Option<AccuracyMetrics>,
    pub metrics_quality: Option<MetricQuality>,
    /// Why the municipality was skipped or failed, or why metrics are missing.
    pub reason: Option<String>,
}

/// Result of a whole batch, serialized as the run report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: PipelineConfig,
    /// Rows of the jurisdiction after filtering.
    pub source_rows: usize,
    /// Rows dropped at load time for lacking a total.
    pub dropped_missing_total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<EntityOutcome>,
}

impl RunSummary {
    /// Municipalities skipped for lack of training data.
    pub fn skip_log(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == EntityStatus::Skipped)
    }

    pub fn outcome(&self, code: i64) -> Option<&EntityOutcome> {
        self.outcomes.iter().find(|o| o.code == code)
    }
}

/// Forecasting batch bound to its storage, model and observer.
pub struct Pipeline<'a> {
    db: &'a DbPool,
    trainer: &'a dyn ModelTrainer,
    observer: &'a dyn RunObserver,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    /// Create a new pipeline.
    ///
    /// # Arguments
    /// * `db` - Database pool, already migrated
    /// * `trainer` - Fits one model per municipality
    /// * `observer` - Receives progress events
    /// * `config` - Batch settings
    pub fn new(
        db: &'a DbPool,
        trainer: &'a dyn ModelTrainer,
        observer: &'a dyn RunObserver,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            trainer,
            observer,
            config,
        }
    }

    /// Load a dataset file and run the batch on it.
    pub async fn run_path<P: AsRef<std::path::Path>>(&self, path: P) -> Result<RunSummary, PipelineError> {
        let dataset = Dataset::from_path(path)?;
        self.run(&dataset).await
    }

    /// Run the batch on an already loaded dataset.
    ///
    /// Fails, writing nothing, when the jurisdiction has no rows or when a
    /// database error escapes a municipality's savepoint.
    pub async fn run(&self, dataset: &Dataset) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        let filtered = dataset.filter_jurisdiction(&self.config.jurisdiction)?;
        let codes = filtered.entity_codes();

        info!(
            "Forecasting {} municipalities of {} (cutoff {}, {} rows)",
            codes.len(),
            self.config.jurisdiction,
            self.config.cutoff_year,
            filtered.len()
        );
        self.observer.run_started(codes.len());

        let mut tx = self.db.pool().begin().await?;
        let mut outcomes = Vec::with_capacity(codes.len());

        for code in codes {
            let rows: Vec<&DropoutRow> = filtered.rows_for(code).collect();
            let Some(first) = rows.first() else {
                continue;
            };
            let entity = EntityContext {
                code,
                name: &first.name,
                records: rows.len(),
            };

            let mut savepoint = tx.begin().await?;
            match self
                .process_entity(&mut savepoint, &filtered, entity, first, started_at)
                .await
            {
                Ok(outcome) => {
                    savepoint.commit().await?;
                    match outcome.status {
                        EntityStatus::Skipped => self
                            .observer
                            .entity_skipped(entity, outcome.reason.as_deref().unwrap_or_default()),
                        _ => self.observer.entity_processed(
                            entity,
                            outcome.forecasts_written,
                            outcome.metrics.is_some(),
                        ),
                    }
                    outcomes.push(outcome);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    let reason = err.to_string();
                    self.observer.entity_failed(entity, &reason);
                    outcomes.push(EntityOutcome {
                        code,
                        name: first.name.clone(),
                        state: first.state.clone(),
                        status: EntityStatus::Failed,
                        records: entity.records,
                        training_points: 0,
                        validation_points: 0,
                        forecasts_written: 0,
                        metrics: None,
                        metrics_quality: None,
                        reason: Some(reason),
                    });
                }
            }
        }

        tx.commit().await?;

        let count = |status: EntityStatus| outcomes.iter().filter(|o| o.status == status).count();
        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            config: self.config.clone(),
            source_rows: filtered.len(),
            dropped_missing_total: filtered.dropped_missing_total(),
            processed: count(EntityStatus::Processed),
            skipped: count(EntityStatus::Skipped),
            failed: count(EntityStatus::Failed),
            outcomes,
        };
        self.observer
            .run_finished(summary.processed, summary.skipped, summary.failed);
        Ok(summary)
    }

    async fn process_entity(
        &self,
        conn: &mut SqliteConnection,
        dataset: &Dataset,
        entity: EntityContext<'_>,
        first: &DropoutRow,
        run_at: DateTime<Utc>,
    ) -> Result<EntityOutcome, EntityError> {
        let series = prepare_series(dataset, entity.code)?;

        let municipality_id = store::register_municipality(
            conn,
            NewMunicipality {
                code: entity.code,
                name: &first.name,
                state: &first.state,
                region: &first.region,
            },
        )
        .await?;

        for row in &series.rows {
            let record = HistoricalRecord {
                municipality_id,
                year: row.year,
                total: row.total,
                grade_1: row.grades[0],
                grade_2: row.grades[1],
                grade_3: row.grades[2],
                grade_4: row.grades[3],
                non_graded: row.non_graded,
            };
            store::upsert_historical(conn, &record).await?;
        }
        self.observer.rows_written(series.rows.len() as u64);

        let (train, validation) = series.split_at(self.config.cutoff_year);
        let mut outcome = EntityOutcome {
            code: entity.code,
            name: first.name.clone(),
            state: first.state.clone(),
            status: EntityStatus::Processed,
            records: series.rows.len(),
            training_points: train.len(),
            validation_points: validation.len(),
            forecasts_written: 0,
            metrics: None,
            metrics_quality: None,
            reason: None,
        };

        if train.len() < self.config.min_training_points {
            store::delete_forecasts_except(conn, municipality_id, &[]).await?;
            store::delete_metrics(conn, municipality_id).await?;
            outcome.status = EntityStatus::Skipped;
            outcome.reason = Some(format!(
                "insufficient training data: {} points before {}, need {}",
                train.len(),
                self.config.cutoff_year,
                self.config.min_training_points
            ));
            return Ok(outcome);
        }

        let fit_started = Instant::now();
        let model = self.trainer.train(train).map_err(EntityError::Training)?;
        self.observer
            .model_timing("fit", fit_started.elapsed().as_secs_f64());

        let years = self.config.forecast_years();
        let dates = years
            .iter()
            .map(|&year| {
                i32::try_from(year)
                    .ok()
                    .and_then(year_end)
                    .ok_or(EntityError::InvalidYear(year))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let predict_started = Instant::now();
        let forecast = model.predict(&dates).map_err(EntityError::Forecast)?;
        self.observer
            .model_timing("predict", predict_started.elapsed().as_secs_f64());

        debug!(
            "{} ({}): {}",
            entity.name,
            entity.code,
            forecast
                .iter()
                .map(|p| format!("{}: {:.2} [{:.2}, {:.2}]", p.ds.year(), p.yhat, p.yhat_lower, p.yhat_upper))
                .collect::<Vec<_>>()
                .join(", ")
        );

        match self.validation_metrics(series.value_in(self.config.cutoff_year), train, &forecast) {
            Ok((metrics, quality)) => {
                outcome.metrics = Some(metrics);
                outcome.metrics_quality = Some(quality);
            }
            Err(reason) => {
                self.observer.metrics_skipped(entity, &reason);
                outcome.reason = Some(reason);
            }
        }

        let mut kept_years = Vec::new();
        for point in &forecast {
            let year = i64::from(point.ds.year());
            if !self.config.persists_forecast_for(year) {
                continue;
            }
            let record = ForecastRecord {
                municipality_id,
                year,
                estimate: point.yhat,
                lower_bound: point.yhat_lower,
                upper_bound: point.yhat_upper,
            };
            store::upsert_forecast(conn, &record).await?;
            kept_years.push(year);
        }
        store::delete_forecasts_except(conn, municipality_id, &kept_years).await?;
        outcome.forecasts_written = kept_years.len();
        let mut written = kept_years.len() as u64;

        match (outcome.metrics, outcome.metrics_quality) {
            (Some(metrics), Some(quality)) => {
                let record = AccuracyMetricsRecord {
                    municipality_id,
                    mae: metrics.mae,
                    rmse: metrics.rmse,
                    mape: metrics.mape,
                    quality,
                    computed_at: run_at,
                };
                store::upsert_metrics(conn, &record).await?;
                written += 1;
            }
            _ => {
                store::delete_metrics(conn, municipality_id).await?;
            }
        }
        self.observer.rows_written(written);

        Ok(outcome)
    }

    /// Compare the cutoff-year forecast with its actual value.
    ///
    /// The error side carries the reason metrics were not computed.
    fn validation_metrics(
        &self,
        actual: Option<f64>,
        train: &[SeriesPoint],
        forecast: &[ForecastPoint],
    ) -> Result<(AccuracyMetrics, MetricQuality), String> {
        let (actual, quality) = match (actual, self.config.impute_missing_validation) {
            (Some(value), _) => (value, MetricQuality::Observed),
            (None, true) => match train.last() {
                Some(last) => (last.y, MetricQuality::Imputed),
                None => return Err("no value available to impute".to_string()),
            },
            (None, false) => {
                return Err(format!(
                    "no actual value for validation year {}",
                    self.config.cutoff_year
                ))
            }
        };

        let predicted = forecast
            .iter()
            .find(|p| i64::from(p.ds.year()) == self.config.cutoff_year)
            .ok_or_else(|| format!("no forecast for validation year {}", self.config.cutoff_year))?;

        calculate_metrics(&[actual], &[predicted.yhat])
            .map(|metrics| (metrics, quality))
            .map_err(|e| format!("metrics not computable: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.jurisdiction, "SP");
        assert_eq!(config.forecast_years(), vec![2024, 2025, 2026]);
        assert!(!config.persists_forecast_for(2024));
        assert!(config.persists_forecast_for(2026));

        let config = PipelineConfig {
            persist_validation_forecast: true,
            ..PipelineConfig::default()
        };
        assert!(config.persists_forecast_for(2024));
        assert!(!config.persists_forecast_for(2023));
    }
}
