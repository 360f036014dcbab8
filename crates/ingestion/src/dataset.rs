//! Loading of the municipal dropout-rate dataset.
//!
//! The source is an Excel workbook or a CSV export with one row per
//! municipality and year. Both are decoded through the same serde record.
//! Numeric cells may carry the `--` missing marker, be empty, or use a
//! decimal comma; all of those are normalized here so downstream code only
//! sees `Option<f64>`.

use crate::error::DatasetError;
use calamine::{open_workbook_auto, Reader};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Marker the source uses for a missing numeric value.
pub const MISSING_MARKER: &str = "--";

/// Tag value of rows that aggregate every category.
pub const AGGREGATE_TAG: &str = "Total";

const COL_CODE: &str = "Código do Município";
const COL_YEAR: &str = "Ano";
const REQUIRED_COLUMNS: [&str; 6] = [
    "UF",
    COL_CODE,
    "Nome do Município",
    "Região",
    COL_YEAR,
    "Total",
];

/// Extensions read as spreadsheets; anything else is read as CSV.
const WORKBOOK_EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xls", "ods"];

/// One row as it appears in the source, before validation.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "UF")]
    state: String,
    #[serde(rename = "Código do Município")]
    code: String,
    #[serde(rename = "Nome do Município")]
    name: String,
    #[serde(rename = "Região")]
    region: String,
    #[serde(rename = "Ano")]
    year: String,
    #[serde(rename = "Total", deserialize_with = "rate")]
    total: Option<f64>,
    #[serde(rename = "1ªsérie", default, deserialize_with = "rate")]
    grade_1: Option<f64>,
    #[serde(rename = "2ªsérie", default, deserialize_with = "rate")]
    grade_2: Option<f64>,
    #[serde(rename = "3ªsérie", default, deserialize_with = "rate")]
    grade_3: Option<f64>,
    #[serde(rename = "4ªsérie", default, deserialize_with = "rate")]
    grade_4: Option<f64>,
    #[serde(rename = "Não-Seriado", default, deserialize_with = "rate")]
    non_graded: Option<f64>,
    #[serde(rename = "Localização", default)]
    location: Option<String>,
    #[serde(rename = "Dependência Administrativa", default)]
    administration: Option<String>,
}

fn rate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let cell = Option::<String>::deserialize(deserializer)?;
    Ok(cell.as_deref().and_then(parse_rate))
}

impl RawRow {
    /// Validate the row; `None` when it has no total.
    fn into_row(self, line: u64) -> Result<Option<DropoutRow>, DatasetError> {
        let Some(total) = self.total else {
            return Ok(None);
        };
        Ok(Some(DropoutRow {
            code: parse_integer(&self.code, COL_CODE, line)?,
            year: parse_integer(&self.year, COL_YEAR, line)?,
            state: self.state,
            name: self.name,
            region: self.region,
            total,
            grades: [self.grade_1, self.grade_2, self.grade_3, self.grade_4],
            non_graded: self.non_graded,
            location: self.location,
            administration: self.administration,
        }))
    }
}

/// One municipality-year row of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropoutRow {
    pub state: String,
    pub code: i64,
    pub name: String,
    pub region: String,
    pub year: i64,
    /// Total dropout rate, in percent.
    pub total: f64,
    pub grades: [Option<f64>; 4],
    pub non_graded: Option<f64>,
    /// Location tag (urban, rural or the aggregate), when the column exists.
    pub location: Option<String>,
    /// Administrative dependency tag, when the column exists.
    pub administration: Option<String>,
}

impl DropoutRow {
    fn is_aggregate(&self) -> bool {
        let aggregate = |tag: &Option<String>| tag.as_deref().map_or(true, |t| t == AGGREGATE_TAG);
        aggregate(&self.location) && aggregate(&self.administration)
    }
}

/// Rows of the dataset with a known total, in file order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<DropoutRow>,
    dropped_missing_total: usize,
}

impl Dataset {
    /// Load a dataset file.
    ///
    /// # Arguments
    /// * `path` - Excel workbook (first sheet) or CSV file, `,` or `;` separated
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        info!("Loading dataset from {}", path.display());
        if is_workbook(path) {
            return Self::from_workbook(path);
        }
        let data = std::fs::read(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&data)
    }

    /// Load a dataset from any CSV reader.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, DatasetError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| DatasetError::Csv(e.into()))?;
        Self::from_bytes(&data)
    }

    fn from_bytes(data: &[u8]) -> Result<Self, DatasetError> {
        let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
        let mut reader = ReaderBuilder::new()
            .delimiter(detect_delimiter(data))
            .trim(csv::Trim::All)
            .from_reader(data);

        let headers = reader.headers()?.clone();
        let records = reader.into_records().map(|record| {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            Ok((line, record))
        });
        Self::from_records(&headers, records)
    }

    fn from_workbook(path: &Path) -> Result<Self, DatasetError> {
        let workbook_error = |source: calamine::Error| DatasetError::Workbook {
            path: path.to_path_buf(),
            source,
        };
        let mut workbook = open_workbook_auto(path).map_err(workbook_error)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| DatasetError::NoSheet(path.to_path_buf()))?
            .map_err(workbook_error)?;

        let mut rows = range.rows().map(|cells| {
            cells
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .collect::<StringRecord>()
        });
        let headers = rows.next().unwrap_or_default();
        let records = rows.zip(2u64..).map(|(record, line)| Ok((line, record)));
        Self::from_records(&headers, records)
    }

    fn from_records<I>(headers: &StringRecord, records: I) -> Result<Self, DatasetError>
    where
        I: Iterator<Item = Result<(u64, StringRecord), DatasetError>>,
    {
        check_headers(headers)?;

        let mut rows = Vec::new();
        let mut dropped_missing_total = 0;
        for record in records {
            let (line, record) = record?;
            let raw: RawRow = record.deserialize(Some(headers))?;
            match raw.into_row(line)? {
                Some(row) => rows.push(row),
                None => dropped_missing_total += 1,
            }
        }

        debug!(
            "Parsed {} rows, dropped {} without a total",
            rows.len(),
            dropped_missing_total
        );
        Ok(Self {
            rows,
            dropped_missing_total,
        })
    }

    /// Keep the aggregate rows of one jurisdiction.
    ///
    /// Rows whose location or administrative tag is present and not the
    /// aggregate tag are removed. Fails when nothing is left.
    pub fn filter_jurisdiction(&self, jurisdiction: &str) -> Result<Dataset, DatasetError> {
        let filtered = Dataset {
            rows: self
                .rows
                .iter()
                .filter(|row| row.state == jurisdiction && row.is_aggregate())
                .cloned()
                .collect(),
            dropped_missing_total: self.dropped_missing_total,
        };
        if filtered.is_empty() {
            return Err(DatasetError::Empty {
                jurisdiction: jurisdiction.to_string(),
            });
        }
        info!("Filtered dataset to {} rows for {}", filtered.len(), jurisdiction);
        Ok(filtered)
    }

    pub fn rows(&self) -> &[DropoutRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows dropped at load time because their total was missing.
    pub fn dropped_missing_total(&self) -> usize {
        self.dropped_missing_total
    }

    /// Distinct municipality codes in order of first appearance.
    pub fn entity_codes(&self) -> Vec<i64> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.code))
            .map(|row| row.code)
            .collect()
    }

    /// Rows of one municipality, in file order.
    pub fn rows_for(&self, code: i64) -> impl Iterator<Item = &DropoutRow> {
        self.rows.iter().filter(move |row| row.code == code)
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| WORKBOOK_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn check_headers(headers: &StringRecord) -> Result<(), DatasetError> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|name| !headers.iter().any(|h| h.trim() == **name))
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DatasetError::MissingColumns(missing))
    }
}

fn detect_delimiter(data: &[u8]) -> u8 {
    let header = data.split(|b| *b == b'\n').next().unwrap_or_default();
    let count = |c: u8| header.iter().filter(|b| **b == c).count();
    if count(b';') > count(b',') {
        b';'
    } else {
        b','
    }
}

/// Parse a rate cell; missing markers and unparsable text are `None`.
pub fn parse_rate(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell == MISSING_MARKER {
        return None;
    }
    cell.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_integer(cell: &str, column: &'static str, line: u64) -> Result<i64, DatasetError> {
    let cell = cell.trim();
    let invalid = || DatasetError::InvalidCell {
        column,
        value: cell.to_string(),
        line,
    };
    if let Ok(value) = cell.parse::<i64>() {
        return Ok(value);
    }
    // Spreadsheet exports sometimes render integer columns as `2020.0`.
    let value = cell.parse::<f64>().map_err(|_| invalid())?;
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Ok(value as i64)
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
UF,Código do Município,Nome do Município,Região,Ano,Localização,Dependência Administrativa,Total,1ªsérie,Não-Seriado
SP,3509502,Campinas,Sudeste,2020,Total,Total,2.5,3.0,--
SP,3509502,Campinas,Sudeste,2020,Urbana,Total,9.9,9.9,9.9
SP,3509502,Campinas,Sudeste,2021,Total,Total,--,1.0,
SP,3550308,São Paulo,Sudeste,2020,Total,Total,\"1,5\",,
RJ,3304557,Rio de Janeiro,Sudeste,2020,Total,Total,4.0,,
";

    #[test]
    fn test_missing_marker_and_decimal_comma() {
        let dataset = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.dropped_missing_total(), 1);

        let campinas = &dataset.rows()[0];
        assert_eq!(campinas.code, 3509502);
        assert_eq!(campinas.total, 2.5);
        assert_eq!(campinas.grades, [Some(3.0), None, None, None]);
        assert_eq!(campinas.non_graded, None);

        let sao_paulo = &dataset.rows()[2];
        assert_eq!(sao_paulo.total, 1.5);
    }

    #[test]
    fn test_filters_jurisdiction_and_aggregate_rows() {
        let dataset = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        let sp = dataset.filter_jurisdiction("SP").unwrap();
        assert_eq!(sp.len(), 2);
        assert_eq!(sp.entity_codes(), vec![3509502, 3550308]);
        assert!(sp.rows().iter().all(|r| r.location.as_deref() == Some("Total")));

        let err = dataset.filter_jurisdiction("MG").unwrap_err();
        assert!(matches!(err, DatasetError::Empty { .. }));
    }

    #[test]
    fn test_semicolon_delimiter_without_tags() {
        let data = "UF;Código do Município;Nome do Município;Região;Ano;Total\n\
                    SP;3500105;Adamantina;Sudeste;2019.0;3,25\n";
        let dataset = Dataset::from_reader(data.as_bytes()).unwrap();
        let row = &dataset.rows()[0];
        assert_eq!((row.year, row.total), (2019, 3.25));
        assert!(row.location.is_none());
        assert_eq!(dataset.filter_jurisdiction("SP").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_columns() {
        let data = "UF,Nome do Município,Total\nSP,Campinas,1.0\n";
        match Dataset::from_reader(data.as_bytes()).unwrap_err() {
            DatasetError::MissingColumns(cols) => {
                assert_eq!(cols, vec!["Código do Município", "Região", "Ano"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_year_is_fatal() {
        let data = "UF,Código do Município,Nome do Município,Região,Ano,Total\n\
                    SP,3500105,Adamantina,Sudeste,20x9,1.0\n";
        let err = Dataset::from_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidCell { column: "Ano", line: 2, .. }));
    }

    #[test]
    fn test_extra_columns_are_ignored_and_empty_tags_count_as_aggregate() {
        let data = "Ano,Código do Município,UF,Nome do Município,Região,Total,Observação,Localização\n\
                    2021,3500105,SP,Adamantina,Sudeste,1.0,revisado,\n";
        let dataset = Dataset::from_reader(data.as_bytes()).unwrap();
        let row = &dataset.rows()[0];
        assert_eq!((row.code, row.year, row.total), (3500105, 2021, 1.0));
        assert_eq!(row.location, None);
        assert_eq!(dataset.filter_jurisdiction("SP").unwrap().len(), 1);
    }

    #[test]
    fn test_workbook_uses_same_normalization() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/dropout_sample.xlsx");
        let dataset = Dataset::from_path(path).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.dropped_missing_total(), 1);

        let first = &dataset.rows()[0];
        assert_eq!((first.code, first.year, first.total), (3509502, 2022, 4.0));
        assert_eq!(first.grades, [Some(1.5), None, None, Some(2.0)]);
        assert_eq!(first.non_graded, None);
        assert_eq!(dataset.rows()[1].total, 3.5);

        let sp = dataset.filter_jurisdiction("SP").unwrap();
        assert_eq!(sp.entity_codes(), vec![3509502]);
        let years: Vec<i64> = sp.rows_for(3509502).map(|r| r.year).collect();
        assert_eq!(years, vec![2022, 2023]);
    }

    #[test]
    fn test_workbook_extensions() {
        assert!(is_workbook(Path::new("base_sp_abandono.xlsx")));
        assert!(is_workbook(Path::new("BASE.XLS")));
        assert!(!is_workbook(Path::new("base_sp_abandono.csv")));
        assert!(!is_workbook(Path::new("base")));
    }

    #[test]
    fn test_missing_workbook() {
        let err = Dataset::from_path("/nonexistent/base.xlsx").unwrap_err();
        assert!(matches!(err, DatasetError::Workbook { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Dataset::from_path("/nonexistent/base.csv").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate(" 12,5 "), Some(12.5));
        assert_eq!(parse_rate("--"), None);
        assert_eq!(parse_rate(""), None);
        assert_eq!(parse_rate("n/a"), None);
        assert_eq!(parse_rate("NaN"), None);
    }
}
