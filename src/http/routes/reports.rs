use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::http::extract::{CurrentUser, JsonBody, VinPath};
use crate::model::{ReportPurchase, RequestContext, VehicleReport};
use crate::pagination::{Page, PageParams};
use crate::reports::{self, ReportDetail, ReportRequest};
use crate::state::AppState;
use crate::AppResult;

/// Generation runs inline; a failed or timed-out run still answers 201 with
/// the `failed` report.
pub async fn generate(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<ReportRequest>,
) -> AppResult<(StatusCode, Json<VehicleReport>)> {
    let report = reports::request(
        &state.pool,
        &user,
        &vin,
        input,
        state.report_settings(),
        &ctx,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<VehicleReport>>> {
    let reports = reports::list_own(
        &state.pool,
        &user,
        page.requested(),
        state.config.page_sizes.reports,
    )
    .await?;
    Ok(Json(reports))
}

pub async fn detail(
    Path(report_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
) -> AppResult<Json<ReportDetail>> {
    Ok(Json(reports::detail(&state.pool, &user, &report_id, &ctx).await?))
}

pub async fn purchase(
    Path(report_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
) -> AppResult<(StatusCode, Json<ReportPurchase>)> {
    let purchase = reports::purchase(&state.pool, &user, &report_id, &ctx).await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

pub async fn refund(
    Path(report_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
) -> AppResult<Json<ReportPurchase>> {
    Ok(Json(reports::refund(&state.pool, &user, &report_id, &ctx).await?))
}
