//! AutoSentinel: vehicle history records, paid reports and the audit trail
//! behind them, served over HTTP.

pub mod accounts;
pub mod audit;
pub mod config;
pub mod crowdsourced;
pub mod db;
pub mod error;
pub mod history;
pub mod http;
pub mod id;
pub mod logging;
pub mod maintenance;
pub mod migrate;
pub mod model;
pub mod pagination;
pub mod providers;
pub mod repo;
pub mod reports;
pub mod role;
pub mod search;
pub mod state;
pub mod stats;
pub mod telemetry;
pub mod time;
pub mod vehicles;
pub mod vin;

pub use error::{AppError, AppResult, ErrorKind};
pub use state::AppState;

use anyhow::Context;

use crate::config::AppConfig;

/// Open the configured database and bring its schema up to date.
pub async fn open_and_migrate(config: &AppConfig) -> anyhow::Result<sqlx::SqlitePool> {
    let pool = db::open_sqlite_pool(&config.db_path).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;
    Ok(pool)
}
