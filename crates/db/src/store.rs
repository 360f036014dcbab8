//! Natural-key writes used by the forecasting pipeline.
//!
//! Every function takes a plain connection so callers decide the
//! transaction boundary (the pipeline runs them inside per-entity
//! savepoints of one batch transaction).

use crate::models::{
    AccuracyMetricsRecord, ForecastRecord, HistoricalRecord, Municipality, NewMunicipality,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// Lowercased form of a municipality name, as stored for name matching.
///
/// SQLite's `lower()` only folds ASCII, so names like "SÃO PAULO" are
/// folded here.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

/// Register a municipality if its code is new and return its id.
///
/// An existing municipality is left untouched.
pub async fn register_municipality(
    conn: &mut SqliteConnection,
    municipality: NewMunicipality<'_>,
) -> sqlx::Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO municipalities (code, name, name_folded, state, region)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(code) DO NOTHING
        "#,
    )
    .bind(municipality.code)
    .bind(municipality.name)
    .bind(fold_name(municipality.name))
    .bind(municipality.state)
    .bind(municipality.region)
    .execute(&mut *conn)
    .await?;

    sqlx::query_scalar("SELECT id FROM municipalities WHERE code = ?")
        .bind(municipality.code)
        .fetch_one(&mut *conn)
        .await
}

/// Insert or update the historical record for (municipality, year).
pub async fn upsert_historical(
    conn: &mut SqliteConnection,
    record: &HistoricalRecord,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO historical_records (
            municipality_id, year, total, grade_1, grade_2, grade_3, grade_4, non_graded
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(municipality_id, year) DO UPDATE SET
            total = excluded.total,
            grade_1 = excluded.grade_1,
            grade_2 = excluded.grade_2,
            grade_3 = excluded.grade_3,
            grade_4 = excluded.grade_4,
            non_graded = excluded.non_graded
        "#,
    )
    .bind(record.municipality_id)
    .bind(record.year)
    .bind(record.total)
    .bind(record.grade_1)
    .bind(record.grade_2)
    .bind(record.grade_3)
    .bind(record.grade_4)
    .bind(record.non_graded)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert or update the forecast for (municipality, year).
pub async fn upsert_forecast(
    conn: &mut SqliteConnection,
    record: &ForecastRecord,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO forecast_records (
            municipality_id, year, estimate, lower_bound, upper_bound
        ) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(municipality_id, year) DO UPDATE SET
            estimate = excluded.estimate,
            lower_bound = excluded.lower_bound,
            upper_bound = excluded.upper_bound
        "#,
    )
    .bind(record.municipality_id)
    .bind(record.year)
    .bind(record.estimate)
    .bind(record.lower_bound)
    .bind(record.upper_bound)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete forecasts of a municipality whose year is not in `keep_years`.
///
/// Returns the number of rows deleted.
pub async fn delete_forecasts_except(
    conn: &mut SqliteConnection,
    municipality_id: i64,
    keep_years: &[i64],
) -> sqlx::Result<u64> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("DELETE FROM forecast_records WHERE municipality_id = ");
    qb.push_bind(municipality_id);
    if !keep_years.is_empty() {
        qb.push(" AND year NOT IN (");
        let mut years = qb.separated(", ");
        for year in keep_years {
            years.push_bind(*year);
        }
        years.push_unseparated(")");
    }
    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Overwrite the accuracy metrics of a municipality.
pub async fn upsert_metrics(
    conn: &mut SqliteConnection,
    record: &AccuracyMetricsRecord,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO accuracy_metrics (
            municipality_id, mae, rmse, mape, quality, computed_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(municipality_id) DO UPDATE SET
            mae = excluded.mae,
            rmse = excluded.rmse,
            mape = excluded.mape,
            quality = excluded.quality,
            computed_at = excluded.computed_at
        "#,
    )
    .bind(record.municipality_id)
    .bind(record.mae)
    .bind(record.rmse)
    .bind(record.mape)
    .bind(record.quality)
    .bind(record.computed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Remove the accuracy metrics of a municipality, if any.
pub async fn delete_metrics(conn: &mut SqliteConnection, municipality_id: i64) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM accuracy_metrics WHERE municipality_id = ?")
        .bind(municipality_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Look up a municipality by its code.
pub async fn municipality_by_code(
    conn: &mut SqliteConnection,
    code: i64,
) -> sqlx::Result<Option<Municipality>> {
    sqlx::query_as("SELECT id, code, name, state, region FROM municipalities WHERE code = ?")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
}

/// Historical records of a municipality, oldest first.
pub async fn historical_for(
    conn: &mut SqliteConnection,
    municipality_id: i64,
) -> sqlx::Result<Vec<HistoricalRecord>> {
    sqlx::query_as(
        r#"
        SELECT municipality_id, year, total, grade_1, grade_2, grade_3, grade_4, non_graded
        FROM historical_records WHERE municipality_id = ? ORDER BY year
        "#,
    )
    .bind(municipality_id)
    .fetch_all(&mut *conn)
    .await
}

/// Forecasts of a municipality, earliest year first.
pub async fn forecasts_for(
    conn: &mut SqliteConnection,
    municipality_id: i64,
) -> sqlx::Result<Vec<ForecastRecord>> {
    sqlx::query_as(
        r#"
        SELECT municipality_id, year, estimate, lower_bound, upper_bound
        FROM forecast_records WHERE municipality_id = ? ORDER BY year
        "#,
    )
    .bind(municipality_id)
    .fetch_all(&mut *conn)
    .await
}

/// Accuracy metrics of a municipality, if computed.
pub async fn metrics_for(
    conn: &mut SqliteConnection,
    municipality_id: i64,
) -> sqlx::Result<Option<AccuracyMetricsRecord>> {
    sqlx::query_as(
        r#"
        SELECT municipality_id, mae, rmse, mape, quality, computed_at
        FROM accuracy_metrics WHERE municipality_id = ?
        "#,
    )
    .bind(municipality_id)
    .fetch_optional(&mut *conn)
    .await
}
