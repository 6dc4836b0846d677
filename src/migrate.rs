//! Forward-only schema migrations embedded in the binary.
//!
//! Each file runs in its own transaction and is recorded with a checksum of
//! its cleaned SQL. A file whose checksum changes after it was applied stops
//! startup rather than leaving the schema in an unknown state.

use sha2::{Digest, Sha256};
use sqlx::{Executor, SqlitePool};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::time::now_ms;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MigrationError {
    #[error("migration {0} edited after application")]
    Edited(String),
}

struct Migration {
    version: &'static str,
    sql: &'static str,
}

macro_rules! migration {
    ($file:literal) => {
        Migration {
            version: $file,
            sql: include_str!(concat!("../migrations/", $file)),
        }
    };
}

static MIGRATIONS: &[Migration] = &[
    migration!("202410010900_accounts.sql"),
    migration!("202410010910_vehicles.sql"),
    migration!("202410010920_reports.sql"),
    migration!("202410010930_observability.sql"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: String,
    pub applied_at: i64,
}

/// Comment and blank-line edits do not change the checksum.
fn clean(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

fn statements(cleaned: &str) -> impl Iterator<Item = &str> {
    cleaned.split(';').map(str::trim).filter(|s| !s.is_empty())
}

pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|m| m.version)
}

/// Apply every pending migration. Returns the versions applied by this call.
pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<Vec<&'static str>> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version    TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum   TEXT NOT NULL\
         )",
    )
    .await?;

    let recorded: HashMap<String, String> =
        sqlx::query_as::<_, (String, String)>("SELECT version, checksum FROM schema_migrations")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let cleaned = clean(migration.sql);
        let sum = checksum(&cleaned);

        match recorded.get(migration.version) {
            Some(stored) if *stored == sum => {
                debug!(target: "autosentinel", event = "migration_already_applied", version = migration.version);
                continue;
            }
            Some(_) => {
                error!(target: "autosentinel", event = "migration_checksum_mismatch", version = migration.version);
                return Err(MigrationError::Edited(migration.version.to_string()).into());
            }
            None => {}
        }

        let mut tx = pool.begin().await?;
        for stmt in statements(&cleaned) {
            if let Err(err) = sqlx::query(stmt).execute(&mut *tx).await {
                error!(
                    target: "autosentinel",
                    event = "migration_stmt_error",
                    version = migration.version,
                    error = %err
                );
                return Err(err.into());
            }
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(now_ms())
            .bind(&sum)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(target: "autosentinel", event = "migration_applied", version = migration.version);
        applied.push(migration.version);
    }
    Ok(applied)
}

pub async fn applied_versions(pool: &SqlitePool) -> anyhow::Result<Vec<AppliedMigration>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT version, applied_at FROM schema_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(version, applied_at)| AppliedMigration { version, applied_at })
        .collect())
}
