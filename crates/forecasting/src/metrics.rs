//! Accuracy metrics for forecast evaluation.

use crate::error::{ForecastError, Result};
use serde::Serialize;

/// Accuracy of a forecast against observed values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccuracyMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error, in percent
    pub mape: f64,
}

/// Calculate MAE, RMSE and MAPE between actual and predicted values.
///
/// Every actual value must be finite and non-zero, since MAPE divides by it.
///
/// # Arguments
/// * `actual` - Observed values
/// * `predicted` - Forecast values, same length as `actual`
pub fn calculate_metrics(actual: &[f64], predicted: &[f64]) -> Result<AccuracyMetrics> {
    if actual.is_empty() || predicted.is_empty() {
        return Err(ForecastError::EmptyData);
    }

    if actual.len() != predicted.len() {
        return Err(ForecastError::DimensionMismatch {
            expected: actual.len(),
            got: predicted.len(),
        });
    }

    for (i, (a, p)) in actual.iter().zip(predicted).enumerate() {
        if !a.is_finite() || !p.is_finite() {
            return Err(ForecastError::NonFiniteValue(i));
        }
        if *a == 0.0 {
            return Err(ForecastError::ZeroActual(i));
        }
    }

    let n = actual.len() as f64;

    let mae = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n;

    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n;

    let mape = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p) / a).abs())
        .sum::<f64>()
        * 100.0
        / n;

    Ok(AccuracyMetrics {
        mae,
        rmse: mse.sqrt(),
        mape,
    })
}
