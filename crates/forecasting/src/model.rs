//! Prophet model behind the trainer seam.
//!
//! Each municipality gets its own [`Prophet`] instance, fitted with the
//! bundled WASM Stan optimizer. Timestamps are December 31 of each year,
//! passed to Prophet as Unix seconds.

use crate::error::{ForecastError, Result};
use crate::series::{ForecastPoint, SeriesPoint};
use augurs::prophet::wasmstan::WasmstanOptimizer;
use augurs::prophet::{
    FeatureMode, IntervalWidth, PositiveFloat, PredictionData, Prophet, ProphetOptions,
    SeasonalityOption, TrainingData,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::str::FromStr;
use tracing::debug;

/// How the seasonal component combines with the trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

impl FromStr for SeasonalityMode {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "additive" => Ok(Self::Additive),
            "multiplicative" => Ok(Self::Multiplicative),
            other => Err(ForecastError::InvalidParameter(format!(
                "invalid seasonality mode: {other}. Must be 'additive' or 'multiplicative'"
            ))),
        }
    }
}

impl From<SeasonalityMode> for FeatureMode {
    fn from(mode: SeasonalityMode) -> Self {
        match mode {
            SeasonalityMode::Additive => FeatureMode::Additive,
            SeasonalityMode::Multiplicative => FeatureMode::Multiplicative,
        }
    }
}

/// Hyperparameters shared by every fitted model of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub yearly_seasonality: bool,
    pub seasonality_mode: SeasonalityMode,
    /// Scale of the prior on trend slope changes; smaller is stiffer.
    pub changepoint_prior_scale: f64,
    /// Scale of the prior on seasonal coefficients.
    pub seasonality_prior_scale: f64,
    /// Coverage of the confidence interval, in (0, 1).
    pub interval_width: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            yearly_seasonality: true,
            seasonality_mode: SeasonalityMode::Multiplicative,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            interval_width: 0.80,
        }
    }
}

impl ModelConfig {
    fn prophet_options(&self) -> Result<ProphetOptions> {
        let mut opts = ProphetOptions::default();
        opts.yearly_seasonality = SeasonalityOption::Manual(self.yearly_seasonality);
        opts.weekly_seasonality = SeasonalityOption::Manual(false);
        opts.daily_seasonality = SeasonalityOption::Manual(false);
        opts.seasonality_mode = self.seasonality_mode.into();
        opts.changepoint_prior_scale =
            positive("changepoint_prior_scale", self.changepoint_prior_scale)?;
        opts.seasonality_prior_scale =
            positive("seasonality_prior_scale", self.seasonality_prior_scale)?;
        opts.interval_width = IntervalWidth::try_from(self.interval_width).map_err(|e| {
            ForecastError::InvalidParameter(format!(
                "interval_width must be in (0, 1), got {}: {e}",
                self.interval_width
            ))
        })?;
        Ok(opts)
    }
}

fn positive(name: &str, value: f64) -> Result<PositiveFloat> {
    PositiveFloat::try_from(value).map_err(|e| {
        ForecastError::InvalidParameter(format!("{name} must be positive, got {value}: {e}"))
    })
}

/// Unix seconds of midnight on `date`.
fn unix_seconds(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// A model fitted on one series, able to predict at arbitrary dates.
pub trait FittedModel {
    /// Point estimate and confidence interval for each timestamp in `ds`.
    fn predict(&self, ds: &[NaiveDate]) -> Result<Vec<ForecastPoint>>;
}

/// Fits a [`FittedModel`] on a chronological series.
pub trait ModelTrainer {
    fn train(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>>;
}

/// Trainer producing [`ProphetModel`]s with fixed hyperparameters.
#[derive(Debug, Clone, Default)]
pub struct ProphetTrainer {
    config: ModelConfig,
}

impl ProphetTrainer {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelTrainer for ProphetTrainer {
    fn train(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(ProphetModel::fit(&self.config, history)?))
    }
}

/// Prophet fitted on one municipality's series.
pub struct ProphetModel {
    prophet: Prophet<WasmstanOptimizer>,
}

impl ProphetModel {
    /// Fit Prophet on a chronological series.
    ///
    /// # Arguments
    /// * `config` - Hyperparameters
    /// * `history` - Observations with strictly increasing timestamps (at least 2)
    pub fn fit(config: &ModelConfig, history: &[SeriesPoint]) -> Result<Self> {
        let opts = config.prophet_options()?;

        if history.len() < 2 {
            return Err(ForecastError::InsufficientData {
                needed: 2,
                got: history.len(),
            });
        }
        for (i, point) in history.iter().enumerate() {
            if !point.y.is_finite() {
                return Err(ForecastError::NonFiniteValue(i));
            }
            if i > 0 && point.ds <= history[i - 1].ds {
                return Err(ForecastError::UnorderedTimestamps(i));
            }
        }

        let ds = history.iter().map(|p| unix_seconds(p.ds)).collect();
        let y = history.iter().map(|p| p.y).collect();
        let data = TrainingData::new(ds, y).map_err(model_error)?;

        let mut prophet = Prophet::new(opts, WasmstanOptimizer::new());
        prophet.fit(data, Default::default()).map_err(model_error)?;

        debug!(
            points = history.len(),
            mode = ?config.seasonality_mode,
            "Fitted Prophet model"
        );

        Ok(Self { prophet })
    }
}

impl FittedModel for ProphetModel {
    fn predict(&self, ds: &[NaiveDate]) -> Result<Vec<ForecastPoint>> {
        if ds.is_empty() {
            return Ok(Vec::new());
        }
        let timestamps = ds.iter().map(|&date| unix_seconds(date)).collect();
        let predictions = self
            .prophet
            .predict(PredictionData::new(timestamps))
            .map_err(model_error)?;

        let yhat = predictions.yhat;
        let (Some(lower), Some(upper)) = (yhat.lower, yhat.upper) else {
            return Err(ForecastError::ComputationError(
                "model returned no uncertainty interval".into(),
            ));
        };
        if yhat.point.len() != ds.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: ds.len(),
                got: yhat.point.len(),
            });
        }

        ds.iter()
            .zip(yhat.point)
            .zip(lower.into_iter().zip(upper))
            .map(|((&date, estimate), (low, high))| {
                if estimate.is_finite() && low.is_finite() && high.is_finite() {
                    Ok(ForecastPoint {
                        ds: date,
                        yhat: estimate,
                        yhat_lower: low,
                        yhat_upper: high,
                    })
                } else {
                    Err(ForecastError::ComputationError(format!(
                        "non-finite prediction for {date}"
                    )))
                }
            })
            .collect()
    }
}

fn model_error(err: augurs::prophet::Error) -> ForecastError {
    ForecastError::Model(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::year_end;

    fn yearly(start: i32, values: &[f64]) -> Vec<SeriesPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &y)| SeriesPoint::new(year_end(start + i as i32).unwrap(), y))
            .collect()
    }

    fn future(years: &[i32]) -> Vec<NaiveDate> {
        years.iter().map(|&y| year_end(y).unwrap()).collect()
    }

    #[test]
    fn test_linear_trend_extrapolates() {
        let history = yearly(2018, &[12.0, 11.5, 11.0, 10.5, 10.0, 9.5]);
        let model = ProphetModel::fit(&ModelConfig::default(), &history).unwrap();
        let forecast = model.predict(&future(&[2024, 2025, 2026])).unwrap();

        assert_eq!(forecast.len(), 3);
        assert!((forecast[0].yhat - 9.0).abs() < 0.3, "got {}", forecast[0].yhat);
        assert!(forecast[0].yhat > forecast[1].yhat);
        assert!(forecast[1].yhat > forecast[2].yhat);
        for point in &forecast {
            assert!(point.yhat_lower <= point.yhat && point.yhat <= point.yhat_upper);
        }
    }

    #[test]
    fn test_trainer_returns_usable_handle() {
        let trainer = ProphetTrainer::default();
        let fitted = trainer.train(&yearly(2018, &[1.0, 2.0, 3.0])).unwrap();
        let forecast = fitted.predict(&future(&[2021])).unwrap();
        assert!(forecast[0].yhat > 3.0, "got {}", forecast[0].yhat);
        assert!(fitted.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        let config = ModelConfig::default();
        assert_eq!(
            ProphetModel::fit(&config, &yearly(2018, &[1.0])).err(),
            Some(ForecastError::InsufficientData { needed: 2, got: 1 })
        );

        let mut unordered = yearly(2018, &[1.0, 2.0, 3.0]);
        unordered.swap(1, 2);
        assert_eq!(
            ProphetModel::fit(&config, &unordered).err(),
            Some(ForecastError::UnorderedTimestamps(2))
        );

        assert_eq!(
            ProphetModel::fit(&config, &yearly(2018, &[1.0, f64::NAN, 3.0])).err(),
            Some(ForecastError::NonFiniteValue(1))
        );

        let bad_width = ModelConfig {
            interval_width: 1.5,
            ..ModelConfig::default()
        };
        assert!(matches!(
            ProphetModel::fit(&bad_width, &yearly(2018, &[1.0, 2.0, 3.0])),
            Err(ForecastError::InvalidParameter(_))
        ));

        let bad_prior = ModelConfig {
            changepoint_prior_scale: -1.0,
            ..ModelConfig::default()
        };
        assert!(matches!(
            ProphetModel::fit(&bad_prior, &yearly(2018, &[1.0, 2.0, 3.0])),
            Err(ForecastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_year_end_timestamps() {
        assert_eq!(unix_seconds(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 86_400);
        assert_eq!(unix_seconds(year_end(2024).unwrap()), 1_735_603_200);
    }

    #[test]
    fn test_seasonality_mode_parsing() {
        assert_eq!("Multiplicative".parse::<SeasonalityMode>().unwrap(), SeasonalityMode::Multiplicative);
        assert_eq!("additive".parse::<SeasonalityMode>().unwrap(), SeasonalityMode::Additive);
        assert!("weekly".parse::<SeasonalityMode>().is_err());
        assert!(matches!(FeatureMode::from(SeasonalityMode::Additive), FeatureMode::Additive));
    }
}
