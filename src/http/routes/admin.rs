//! Dashboards, the audit trail and the provider registry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::audit::{self, AuditFilter};
use crate::http::extract::{CurrentUser, JsonBody};
use crate::model::{AuditLog, DataProvider, ProviderDataFeed};
use crate::pagination::{Page, PageParams};
use crate::providers::{self, NewProvider};
use crate::state::AppState;
use crate::stats::{self, AdminDashboard, UserDashboard};
use crate::AppResult;

const FEED_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct FeedFilter {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<UserDashboard>> {
    Ok(Json(stats::user_dashboard(&state.pool, &user).await?))
}

pub async fn admin_dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<AdminDashboard>> {
    Ok(Json(stats::admin_dashboard(&state.pool, &user).await?))
}

pub async fn audit_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<AuditFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<AuditLog>>> {
    let logs = audit::list(
        &state.pool,
        &user,
        &filter,
        page.requested(),
        state.config.page_sizes.audit,
    )
    .await?;
    Ok(Json(logs))
}

pub async fn list_providers(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<DataProvider>>> {
    Ok(Json(providers::list(&state.pool, &user).await?))
}

pub async fn create_provider(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(input): JsonBody<NewProvider>,
) -> AppResult<(StatusCode, Json<DataProvider>)> {
    let provider = providers::create(&state.pool, &user, input).await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

pub async fn provider_feeds(
    Path(provider_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<FeedFilter>,
) -> AppResult<Json<Vec<ProviderDataFeed>>> {
    let feeds = providers::feeds(
        &state.pool,
        &user,
        &provider_id,
        filter.status.as_deref(),
        FEED_LIMIT,
    )
    .await?;
    Ok(Json(feeds))
}
