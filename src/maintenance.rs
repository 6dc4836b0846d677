//! On-demand retention cleanup.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Retention;
use crate::repo;
use crate::time::{days_ago_ms, now_ms};
use crate::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub search_queries: u64,
    pub telemetry_traces: u64,
    pub audit_logs: u64,
    pub sessions: u64,
}

/// Delete analytics rows older than their retention windows, plus every
/// session that has already expired.
pub async fn prune(pool: &SqlitePool, retention: &Retention) -> AppResult<PruneSummary> {
    let summary = PruneSummary {
        search_queries: repo::delete_older_than(
            pool,
            "search_queries",
            "created_at",
            days_ago_ms(retention.search_days),
        )
        .await?,
        telemetry_traces: repo::delete_older_than(
            pool,
            "telemetry_traces",
            "timestamp",
            days_ago_ms(retention.telemetry_days),
        )
        .await?,
        audit_logs: repo::delete_older_than(
            pool,
            "audit_logs",
            "timestamp",
            days_ago_ms(retention.audit_days),
        )
        .await?,
        sessions: repo::delete_older_than(pool, "sessions", "expires_at", now_ms()).await?,
    };
    tracing::info!(
        target: "autosentinel",
        event = "prune_complete",
        search_queries = summary.search_queries,
        telemetry_traces = summary.telemetry_traces,
        audit_logs = summary.audit_logs,
        sessions = summary.sessions
    );
    Ok(summary)
}
