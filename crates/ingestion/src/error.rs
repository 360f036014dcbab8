//! Error types for dataset loading and the forecasting batch.

use dropout_forecasting::ForecastError;
use std::path::PathBuf;
use thiserror::Error;

/// The source dataset could not be read or does not have the expected shape.
///
/// Every variant aborts the whole run.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("cannot read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("workbook {0} has no sheet")]
    NoSheet(PathBuf),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("invalid value {value:?} in column {column} at line {line}")]
    InvalidCell {
        column: &'static str,
        value: String,
        line: u64,
    },

    #[error("no rows left after filtering to jurisdiction {jurisdiction}")]
    Empty { jurisdiction: String },
}

/// A failure that stops the batch and rolls back every write of the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A failure confined to one municipality; the batch continues.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("no rows for municipality {0}")]
    Preparation(i64),

    #[error("year {0} cannot be represented as a date")]
    InvalidYear(i64),

    #[error("model training failed: {0}")]
    Training(#[source] ForecastError),

    #[error("forecast failed: {0}")]
    Forecast(#[source] ForecastError),

    #[error("storage failed: {0}")]
    Storage(#[from] sqlx::Error),
}
