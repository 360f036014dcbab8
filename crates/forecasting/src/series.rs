//! Time-indexed values going into and out of the model.

use chrono::NaiveDate;
use serde::Serialize;

/// One observation of a yearly series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Observation timestamp (December 31 of the observed year).
    pub ds: NaiveDate,
    /// Observed value.
    pub y: f64,
}

impl SeriesPoint {
    pub fn new(ds: NaiveDate, y: f64) -> Self {
        Self { ds, y }
    }
}

/// One predicted point with its confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub ds: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// December 31 of `year`, the timestamp a yearly observation is stamped with.
///
/// Returns `None` for years outside chrono's supported range.
pub fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_year_end() {
        let ds = year_end(2024).unwrap();
        assert_eq!((ds.year(), ds.month(), ds.day()), (2024, 12, 31));
        assert!(year_end(i32::MAX).is_none());
    }
}
