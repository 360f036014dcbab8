//! Ingestion and forecasting batch for municipal dropout rates.

pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod prepare;

pub use dataset::{Dataset, DropoutRow};
pub use error::{DatasetError, EntityError, PipelineError};
pub use pipeline::{EntityOutcome, EntityStatus, Pipeline, PipelineConfig, RunSummary};
pub use prepare::{prepare_series, PreparedSeries};
