//! SQLite pool construction and the transaction helper every multi-row write
//! goes through.

use anyhow::{Context, Result as AnyResult};
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Effective connection settings as SQLite reports them after open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pragmas {
    pub sqlite_version: String,
    pub journal_mode: String,
    pub foreign_keys: bool,
    pub busy_timeout_ms: i64,
}

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(opts)
        .await
        .with_context(|| format!("open sqlite database {}", db_path.display()))?;

    let pragmas = read_pragmas(&pool).await?;
    info!(
        target: "autosentinel",
        event = "db_open",
        path = %db_path.display(),
        sqlite_version = %pragmas.sqlite_version,
        journal_mode = %pragmas.journal_mode,
        foreign_keys = pragmas.foreign_keys,
        busy_timeout_ms = pragmas.busy_timeout_ms
    );
    if !pragmas.journal_mode.eq_ignore_ascii_case("wal") {
        warn!(target: "autosentinel", event = "db_not_wal", journal_mode = %pragmas.journal_mode);
    }
    Ok(pool)
}

/// Single-connection in-memory database; every connection would otherwise see
/// its own empty schema.
pub async fn open_memory_pool() -> AnyResult<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .context("open in-memory sqlite database")
}

pub async fn read_pragmas(pool: &SqlitePool) -> Result<Pragmas, sqlx::Error> {
    let sqlite_version: String = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(pool)
        .await?;
    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(pool)
        .await?;
    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(pool)
        .await?;
    let busy_timeout_ms: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
        .fetch_one(pool)
        .await?;
    Ok(Pragmas {
        sqlite_version,
        journal_mode,
        foreign_keys: foreign_keys == 1,
        busy_timeout_ms,
    })
}

/// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
pub async fn run_in_tx<R, E, F>(pool: &SqlitePool, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    let mut tx = pool.begin().await?;
    let outcome = f(&mut tx).await;
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            debug!(target: "autosentinel", event = "db_tx_commit");
            Ok(value)
        }
        Err(err) => {
            match tx.rollback().await {
                Ok(()) => debug!(target: "autosentinel", event = "db_tx_rollback"),
                Err(rb) => {
                    error!(target: "autosentinel", event = "db_tx_rollback_failed", error = %rb)
                }
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;
    use futures::FutureExt;

    async fn plates_pool() -> SqlitePool {
        let pool = open_memory_pool().await.expect("memory pool");
        sqlx::query("CREATE TABLE plates (plate TEXT PRIMARY KEY, vin TEXT NOT NULL)")
            .execute(&pool)
            .await
            .expect("create table");
        pool
    }

    async fn plate_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM plates")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commits_on_success() {
        let pool = plates_pool().await;
        run_in_tx(&pool, |tx| {
            async move {
                sqlx::query("INSERT INTO plates VALUES ('ABC123', '1HGCM82633A004352')")
                    .execute(&mut **tx)
                    .await?;
                Ok::<_, AppError>(())
            }
            .boxed()
        })
        .await
        .expect("tx commits");
        assert_eq!(plate_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn rolls_back_everything_on_error() {
        let pool = plates_pool().await;
        let err = run_in_tx(&pool, |tx| {
            async move {
                sqlx::query("INSERT INTO plates VALUES ('ABC123', '1HGCM82633A004352')")
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("INSERT INTO plates VALUES ('ABC123', '2HGCM82633A004352')")
                    .execute(&mut **tx)
                    .await?;
                Ok::<_, AppError>(())
            }
            .boxed()
        })
        .await
        .expect_err("duplicate plate fails");
        assert_eq!(err.code(), AppError::UNIQUE_VIOLATION);
        assert_eq!(plate_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn file_pool_runs_wal_with_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_sqlite_pool(&dir.path().join("db").join("a.sqlite3"))
            .await
            .unwrap();
        let pragmas = read_pragmas(&pool).await.unwrap();
        assert_eq!(pragmas.journal_mode.to_lowercase(), "wal");
        assert!(pragmas.foreign_keys);
        assert_eq!(pragmas.busy_timeout_ms, 5000);
    }
}
