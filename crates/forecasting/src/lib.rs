//! Forecasting model and accuracy metrics for yearly dropout series.
//!
//! The model is Prophet from `augurs`, wrapped behind [`ModelTrainer`] and
//! [`FittedModel`] so callers only see "train on a series, predict at
//! these dates".

pub mod error;
pub mod metrics;
pub mod model;
pub mod series;

pub use error::{ForecastError, Result};
pub use metrics::{calculate_metrics, AccuracyMetrics};
pub use model::{
    FittedModel, ModelConfig, ModelTrainer, ProphetModel, ProphetTrainer, SeasonalityMode,
};
pub use series::{year_end, ForecastPoint, SeriesPoint};
