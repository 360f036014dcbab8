//! Read-only, filtered and paginated views for the presentation layer.

use crate::models::{ForecastView, HistoricalView, MetricsView};
use crate::store::fold_name;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

/// Largest page size a caller may request; also the default.
pub const MAX_PER_PAGE: u32 = 10_000;

/// The three listable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Historical,
    Forecasts,
    Metrics,
}

/// Columns a listing can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Municipality,
    Year,
    Total,
    Estimate,
    Mae,
    Rmse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortKey {
    /// Parse a sort key if `view` allows sorting by it.
    pub fn for_view(view: View, key: &str) -> Option<Self> {
        let key = match key {
            "municipality" => SortKey::Municipality,
            "year" => SortKey::Year,
            "total" => SortKey::Total,
            "estimate" => SortKey::Estimate,
            "mae" => SortKey::Mae,
            "rmse" => SortKey::Rmse,
            _ => return None,
        };
        view.sortable_by(key).then_some(key)
    }

    fn column(self) -> &'static str {
        match self {
            SortKey::Municipality => "m.name",
            SortKey::Year => "r.year",
            SortKey::Total => "r.total",
            SortKey::Estimate => "r.estimate",
            SortKey::Mae => "r.mae",
            SortKey::Rmse => "r.rmse",
        }
    }
}

impl SortOrder {
    /// `"desc"` sorts descending, anything else ascending.
    pub fn parse(order: &str) -> Self {
        if order.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl View {
    fn sortable_by(self, key: SortKey) -> bool {
        match self {
            View::Historical => matches!(key, SortKey::Municipality | SortKey::Year | SortKey::Total),
            View::Forecasts => matches!(key, SortKey::Municipality | SortKey::Year | SortKey::Estimate),
            View::Metrics => matches!(key, SortKey::Municipality | SortKey::Mae | SortKey::Rmse),
        }
    }

    fn has_year(self) -> bool {
        !matches!(self, View::Metrics)
    }

    fn from_clause(self) -> &'static str {
        match self {
            View::Historical => {
                "FROM historical_records r JOIN municipalities m ON m.id = r.municipality_id"
            }
            View::Forecasts => {
                "FROM forecast_records r JOIN municipalities m ON m.id = r.municipality_id"
            }
            View::Metrics => {
                "FROM accuracy_metrics r JOIN municipalities m ON m.id = r.municipality_id"
            }
        }
    }

    fn default_order(self) -> &'static str {
        match self {
            View::Historical => "r.year DESC, m.name ASC",
            View::Forecasts => "m.name ASC, r.year ASC",
            View::Metrics => "m.name ASC",
        }
    }
}

/// Filters, ordering and page requested by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Case-insensitive substring of the municipality name.
    pub name_contains: Option<String>,
    /// Exact year; ignored by views without a year.
    pub year: Option<i64>,
    pub sort: Option<(SortKey, SortOrder)>,
    /// 1-indexed page number.
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            name_contains: None,
            year: None,
            sort: None,
            page: 1,
            per_page: MAX_PER_PAGE,
        }
    }
}

/// One page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// List historical records.
pub async fn list_historical(pool: &SqlitePool, query: &ListQuery) -> sqlx::Result<Page<HistoricalView>> {
    list(
        pool,
        View::Historical,
        query,
        "SELECT m.name AS municipality, m.code AS municipality_code, r.year, r.total, \
         r.grade_1, r.grade_2, r.grade_3, r.grade_4, r.non_graded",
    )
    .await
}

/// List forecast records.
pub async fn list_forecasts(pool: &SqlitePool, query: &ListQuery) -> sqlx::Result<Page<ForecastView>> {
    list(
        pool,
        View::Forecasts,
        query,
        "SELECT m.name AS municipality, m.code AS municipality_code, r.year, r.estimate, \
         r.lower_bound, r.upper_bound",
    )
    .await
}

/// List accuracy metrics.
pub async fn list_metrics(pool: &SqlitePool, query: &ListQuery) -> sqlx::Result<Page<MetricsView>> {
    list(
        pool,
        View::Metrics,
        query,
        "SELECT m.name AS municipality, m.code AS municipality_code, r.mae, r.rmse, r.mape, \
         r.quality, r.computed_at",
    )
    .await
}

/// Number of registered municipalities.
pub async fn count_municipalities(pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM municipalities")
        .fetch_one(pool)
        .await
}

/// Earliest and latest year with historical data, if any.
pub async fn historical_year_range(pool: &SqlitePool) -> sqlx::Result<Option<(i64, i64)>> {
    year_range(pool, "SELECT MIN(year), MAX(year) FROM historical_records").await
}

/// First and last stored forecast year.
pub async fn forecast_year_range(pool: &SqlitePool) -> sqlx::Result<Option<(i64, i64)>> {
    year_range(pool, "SELECT MIN(year), MAX(year) FROM forecast_records").await
}

async fn year_range(pool: &SqlitePool, sql: &str) -> sqlx::Result<Option<(i64, i64)>> {
    let (min, max): (Option<i64>, Option<i64>) = sqlx::query_as(sql).fetch_one(pool).await?;
    Ok(min.zip(max))
}

async fn list<T>(pool: &SqlitePool, view: View, query: &ListQuery, select: &str) -> sqlx::Result<Page<T>>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let mut count_qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT COUNT(*) {}", view.from_clause()));
    push_filters(&mut count_qb, view, query);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;
    let total = total.max(0) as u64;

    let per_page = query.per_page.clamp(1, MAX_PER_PAGE);
    let total_pages = total.div_ceil(u64::from(per_page)) as u32;
    // Out-of-range pages resolve to the last page.
    let page = query.page.clamp(1, total_pages.max(1));
    let offset = u64::from(page - 1) * u64::from(per_page);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("{} {}", select, view.from_clause()));
    push_filters(&mut qb, view, query);
    qb.push(" ORDER BY ");
    match query.sort {
        Some((key, order)) => {
            qb.push(key.column()).push(" ").push(order.keyword());
        }
        None => {
            qb.push(view.default_order());
        }
    }
    qb.push(", r.id ASC LIMIT ")
        .push_bind(i64::from(per_page))
        .push(" OFFSET ")
        .push_bind(offset as i64);

    let items = qb.build_query_as::<T>().fetch_all(pool).await?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
        total_pages,
    })
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, view: View, query: &ListQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(name) = query.name_contains.as_deref().filter(|n| !n.is_empty()) {
        qb.push(" AND m.name_folded LIKE ")
            .push_bind(format!("%{}%", escape_like(&fold_name(name))))
            .push(" ESCAPE '\\'");
    }
    if view.has_year() {
        if let Some(year) = query.year {
            qb.push(" AND r.year = ").push_bind(year);
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AccuracyMetricsRecord, ForecastRecord, HistoricalRecord, MetricQuality, NewMunicipality,
    };
    use crate::store;
    use crate::DbPool;
    use chrono::Utc;

    async fn seeded() -> DbPool {
        let db = DbPool::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let towns = [
            (3500105, "Adamantina", 2.0),
            (3509502, "Campinas", 1.0),
            (3550308, "São Paulo", 3.0),
        ];
        for (code, name, base) in towns {
            let id = store::register_municipality(
                &mut conn,
                NewMunicipality { code, name, state: "SP", region: "Sudeste" },
            )
            .await
            .unwrap();
            for (offset, year) in (2021..=2023).enumerate() {
                let record = HistoricalRecord {
                    municipality_id: id,
                    year,
                    total: base + offset as f64,
                    grade_1: None,
                    grade_2: None,
                    grade_3: None,
                    grade_4: None,
                    non_graded: None,
                };
                store::upsert_historical(&mut conn, &record).await.unwrap();
            }
            let forecast = ForecastRecord {
                municipality_id: id,
                year: 2025,
                estimate: base,
                lower_bound: base - 0.5,
                upper_bound: base + 0.5,
            };
            store::upsert_forecast(&mut conn, &forecast).await.unwrap();
            let metrics = AccuracyMetricsRecord {
                municipality_id: id,
                mae: base / 10.0,
                rmse: base / 5.0,
                mape: base,
                quality: MetricQuality::Observed,
                computed_at: Utc::now(),
            };
            store::upsert_metrics(&mut conn, &metrics).await.unwrap();
        }
        drop(conn);
        db
    }

    #[test]
    fn test_sort_whitelist() {
        assert_eq!(SortKey::for_view(View::Historical, "total"), Some(SortKey::Total));
        assert_eq!(SortKey::for_view(View::Historical, "estimate"), None);
        assert_eq!(SortKey::for_view(View::Forecasts, "estimate"), Some(SortKey::Estimate));
        assert_eq!(SortKey::for_view(View::Metrics, "year"), None);
        assert_eq!(SortKey::for_view(View::Metrics, "rmse"), Some(SortKey::Rmse));
        assert_eq!(SortKey::for_view(View::Metrics, "mape"), None);
        assert_eq!(SortKey::for_view(View::Historical, "total; DROP TABLE x"), None);
        assert_eq!(SortOrder::parse("DESC"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Asc);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }

    #[tokio::test]
    async fn test_historical_default_order_is_newest_first() {
        let db = seeded().await;
        let page = list_historical(db.pool(), &ListQuery::default()).await.unwrap();
        assert_eq!(page.total, 9);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.items[0].year, 2023);
        assert_eq!(page.items[0].municipality, "Adamantina");
        assert_eq!(page.items[8].year, 2021);
    }

    #[tokio::test]
    async fn test_filters_by_name_and_year() {
        let db = seeded().await;
        let query = ListQuery {
            name_contains: Some("CAMP".into()),
            year: Some(2022),
            ..ListQuery::default()
        };
        let page = list_historical(db.pool(), &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].municipality, "Campinas");
        assert_eq!(page.items[0].total, 2.0);

        for (needle, expected) in [("SÃO", "São Paulo"), ("são p", "São Paulo"), ("AMANTINA", "Adamantina")] {
            let query = ListQuery {
                name_contains: Some(needle.into()),
                ..ListQuery::default()
            };
            let page = list_forecasts(db.pool(), &query).await.unwrap();
            assert_eq!(page.total, 1, "{needle}");
            assert_eq!(page.items[0].municipality, expected);
        }

        let none = ListQuery {
            name_contains: Some("%".into()),
            ..ListQuery::default()
        };
        assert_eq!(list_historical(db.pool(), &none).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_year_filter_ignored_for_metrics() {
        let db = seeded().await;
        let query = ListQuery {
            year: Some(1999),
            sort: Some((SortKey::Rmse, SortOrder::Desc)),
            ..ListQuery::default()
        };
        let page = list_metrics(db.pool(), &query).await.unwrap();
        assert_eq!(page.total, 3);
        let names: Vec<&str> = page.items.iter().map(|m| m.municipality.as_str()).collect();
        assert_eq!(names, vec!["São Paulo", "Adamantina", "Campinas"]);
    }

    #[tokio::test]
    async fn test_pagination_clamps_to_last_page() {
        let db = seeded().await;
        let query = ListQuery {
            sort: Some((SortKey::Estimate, SortOrder::Asc)),
            page: 7,
            per_page: 2,
            ..ListQuery::default()
        };
        let page = list_forecasts(db.pool(), &query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.page, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].municipality, "São Paulo");
    }

    #[tokio::test]
    async fn test_summary_queries() {
        let db = seeded().await;
        assert_eq!(count_municipalities(db.pool()).await.unwrap(), 3);
        assert_eq!(historical_year_range(db.pool()).await.unwrap(), Some((2021, 2023)));
        assert_eq!(forecast_year_range(db.pool()).await.unwrap(), Some((2025, 2025)));

        let empty = DbPool::new(":memory:").await.unwrap();
        empty.migrate().await.unwrap();
        assert_eq!(historical_year_range(empty.pool()).await.unwrap(), None);
        assert_eq!(forecast_year_range(empty.pool()).await.unwrap(), None);
        let page = list_forecasts(empty.pool(), &ListQuery::default()).await.unwrap();
        assert_eq!((page.total, page.total_pages, page.page), (0, 0, 1));
    }
}
