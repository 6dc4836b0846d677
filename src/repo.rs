//! Table-generic helpers. Table and column names are interpolated into SQL,
//! so both must come from the whitelists below.

use sqlx::{Row, SqlitePool};

use crate::{AppError, AppResult};

const TABLES: &[&str] = &[
    "users",
    "sessions",
    "vehicles",
    "vehicle_registrations",
    "title_events",
    "accident_records",
    "mileage_records",
    "ownership_records",
    "theft_records",
    "telemetry_traces",
    "crowdsourced_reports",
    "vehicle_reports",
    "report_purchases",
    "audit_logs",
    "search_queries",
    "data_providers",
    "provider_data_feeds",
];

const GROUP_COLUMNS: &[&str] = &[
    "make",
    "year",
    "current_title_status",
    "severity",
    "search_type",
    "status",
    "action",
];

const TIME_COLUMNS: &[&str] = &["created_at", "timestamp", "requested_at", "expires_at"];

#[allow(clippy::result_large_err)]
fn ensure_table(table: &str) -> AppResult<()> {
    if TABLES.contains(&table) {
        Ok(())
    } else {
        Err(AppError::new("DB/INVALID_TABLE", "invalid table").with_context("table", table))
    }
}

#[allow(clippy::result_large_err)]
fn ensure_column(allowed: &[&str], column: &str) -> AppResult<()> {
    if allowed.contains(&column) {
        Ok(())
    } else {
        Err(AppError::new("DB/INVALID_COLUMN", "invalid column").with_context("column", column))
    }
}

pub async fn count(pool: &SqlitePool, table: &str) -> AppResult<i64> {
    ensure_table(table)?;
    let sql = format!("SELECT COUNT(*) FROM {table}");
    Ok(sqlx::query_scalar(&sql).fetch_one(pool).await?)
}

/// Count rows where an integer flag column equals `value`.
pub async fn count_flag(pool: &SqlitePool, table: &str, column: &str, value: bool) -> AppResult<i64> {
    ensure_table(table)?;
    ensure_column(&["is_stolen", "consenting_for_tracking", "is_paid"], column)?;
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?");
    Ok(sqlx::query_scalar(&sql)
        .bind(i64::from(value))
        .fetch_one(pool)
        .await?)
}

pub async fn count_status(pool: &SqlitePool, table: &str, status: &str) -> AppResult<i64> {
    ensure_table(table)?;
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE status = ?");
    Ok(sqlx::query_scalar(&sql)
        .bind(status)
        .fetch_one(pool)
        .await?)
}

/// `(value, count)` pairs for one column. Values are rendered as text so
/// integer columns such as `year` group the same way.
pub async fn group_counts(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    order: GroupOrder,
    limit: Option<i64>,
) -> AppResult<Vec<(String, i64)>> {
    ensure_table(table)?;
    ensure_column(GROUP_COLUMNS, column)?;
    let order_by = match order {
        GroupOrder::CountDesc => "n DESC, value ASC".to_string(),
        GroupOrder::ValueAsc => format!("{column} ASC"),
        GroupOrder::ValueDesc => format!("{column} DESC"),
    };
    let sql = format!(
        "SELECT CAST({column} AS TEXT) AS value, COUNT(*) AS n FROM {table} \
         GROUP BY {column} ORDER BY {order_by} LIMIT ?"
    );
    let rows = sqlx::query(&sql)
        .bind(limit.unwrap_or(-1))
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|row| -> Result<(String, i64), sqlx::Error> {
            Ok((row.try_get("value")?, row.try_get("n")?))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AppError::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOrder {
    CountDesc,
    ValueAsc,
    ValueDesc,
}

/// Delete rows whose time column is older than `cutoff_ms`; returns the
/// number removed.
pub async fn delete_older_than(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    cutoff_ms: i64,
) -> AppResult<u64> {
    ensure_table(table)?;
    ensure_column(TIME_COLUMNS, column)?;
    let sql = format!("DELETE FROM {table} WHERE {column} < ?");
    let res = sqlx::query(&sql).bind(cutoff_ms).execute(pool).await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;

    #[tokio::test]
    async fn rejects_unknown_tables_and_columns() {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();

        let err = count(&pool, "sqlite_master").await.unwrap_err();
        assert_eq!(err.code(), "DB/INVALID_TABLE");
        let err = group_counts(&pool, "vehicles", "vin; DROP TABLE users", GroupOrder::CountDesc, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DB/INVALID_COLUMN");
        let err = delete_older_than(&pool, "users", "username", 0).await.unwrap_err();
        assert_eq!(err.code(), "DB/INVALID_COLUMN");
    }

    #[tokio::test]
    async fn counts_empty_tables() {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        assert_eq!(count(&pool, "vehicles").await.unwrap(), 0);
        assert_eq!(count_flag(&pool, "vehicles", "is_stolen", true).await.unwrap(), 0);
        assert!(group_counts(&pool, "vehicles", "make", GroupOrder::CountDesc, Some(10))
            .await
            .unwrap()
            .is_empty());
    }
}
