//! Per-municipality series preparation.

use crate::dataset::{Dataset, DropoutRow};
use crate::error::EntityError;
use dropout_forecasting::{year_end, SeriesPoint};
use std::collections::BTreeMap;

/// A municipality's yearly totals ready for training.
#[derive(Debug, Clone)]
pub struct PreparedSeries<'a> {
    /// One row per year, oldest first.
    pub rows: Vec<&'a DropoutRow>,
    /// `rows` stamped at December 31 of each year.
    pub points: Vec<SeriesPoint>,
}

impl PreparedSeries<'_> {
    /// Split the series at `cutoff_year`: training is strictly before it,
    /// validation is the rest.
    pub fn split_at(&self, cutoff_year: i64) -> (&[SeriesPoint], &[SeriesPoint]) {
        let idx = self.rows.partition_point(|row| row.year < cutoff_year);
        self.points.split_at(idx)
    }

    /// Value observed in `year`, if any.
    pub fn value_in(&self, year: i64) -> Option<f64> {
        self.rows.iter().find(|row| row.year == year).map(|row| row.total)
    }
}

/// Extract the chronological series of one municipality.
///
/// When a year appears more than once the last row in file order wins.
///
/// # Arguments
/// * `dataset` - Filtered dataset
/// * `code` - Municipality code
pub fn prepare_series(dataset: &Dataset, code: i64) -> Result<PreparedSeries<'_>, EntityError> {
    let by_year: BTreeMap<i64, &DropoutRow> = dataset.rows_for(code).map(|row| (row.year, row)).collect();
    if by_year.is_empty() {
        return Err(EntityError::Preparation(code));
    }

    let mut rows = Vec::with_capacity(by_year.len());
    let mut points = Vec::with_capacity(by_year.len());
    for (year, row) in by_year {
        let ds = i32::try_from(year)
            .ok()
            .and_then(year_end)
            .ok_or(EntityError::InvalidYear(year))?;
        rows.push(row);
        points.push(SeriesPoint::new(ds, row.total));
    }
    Ok(PreparedSeries { rows, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn dataset() -> Dataset {
        let data = "\
UF,Código do Município,Nome do Município,Região,Ano,Total
SP,3509502,Campinas,Sudeste,2022,3.0
SP,3500105,Adamantina,Sudeste,2020,9.0
SP,3509502,Campinas,Sudeste,2020,1.0
SP,3509502,Campinas,Sudeste,2021,2.0
SP,3509502,Campinas,Sudeste,2024,4.0
SP,3509502,Campinas,Sudeste,2021,2.5
";
        Dataset::from_reader(data.as_bytes()).unwrap()
    }

    #[test]
    fn test_sorted_and_stamped_at_year_end() {
        let dataset = dataset();
        let series = prepare_series(&dataset, 3509502).unwrap();
        let years: Vec<i32> = series.points.iter().map(|p| p.ds.year()).collect();
        assert_eq!(years, vec![2020, 2021, 2022, 2024]);
        assert!(series.points.iter().all(|p| p.ds.month() == 12 && p.ds.day() == 31));
        // Duplicate 2021: last row wins.
        assert_eq!(series.points[1].y, 2.5);
        assert_eq!(series.rows.len(), 4);
    }

    #[test]
    fn test_split_at_cutoff() {
        let dataset = dataset();
        let series = prepare_series(&dataset, 3509502).unwrap();
        let (train, validation) = series.split_at(2024);
        assert_eq!(train.len(), 3);
        assert_eq!(validation.len(), 1);
        assert_eq!(series.value_in(2024), Some(4.0));
        assert_eq!(series.value_in(2023), None);
    }

    #[test]
    fn test_unknown_code() {
        let dataset = dataset();
        assert!(matches!(
            prepare_series(&dataset, 1),
            Err(EntityError::Preparation(1))
        ));
    }
}
