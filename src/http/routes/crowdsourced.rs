use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::crowdsourced::{self, NewCrowdsourcedReport};
use crate::http::extract::{CurrentUser, JsonBody, VinPath};
use crate::model::{CrowdsourcedReport, CrowdsourcedType, RequestContext, VehicleSummary};
use crate::pagination::{Page, PageParams};
use crate::state::AppState;
use crate::vehicles;
use crate::AppResult;

#[derive(Debug, Serialize)]
pub struct SubmitForm {
    pub vehicle: VehicleSummary,
    pub report_types: &'static [CrowdsourcedType],
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilter {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModerationRequest {
    pub action: String,
}

pub async fn submit_form(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> AppResult<Json<SubmitForm>> {
    let vehicle = vehicles::get_by_vin(&state.pool, &vin).await?;
    Ok(Json(SubmitForm {
        vehicle: VehicleSummary::from(&vehicle),
        report_types: CrowdsourcedType::ALL,
    }))
}

pub async fn submit(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewCrowdsourcedReport>,
) -> AppResult<(StatusCode, Json<CrowdsourcedReport>)> {
    let report = crowdsourced::submit(&state.pool, &user, &vin, input, &ctx).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(filter): Query<StatusFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<CrowdsourcedReport>>> {
    let reports = crowdsourced::list(
        &state.pool,
        filter.status.as_deref(),
        page.requested(),
        state.config.page_sizes.crowdsourced,
    )
    .await?;
    Ok(Json(reports))
}

/// Pending report as the moderator sees it before deciding.
pub async fn review(
    Path(report_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<CrowdsourcedReport>> {
    user.role.require_admin()?;
    Ok(Json(crowdsourced::get(&state.pool, &report_id).await?))
}

pub async fn moderate(
    Path(report_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(body): JsonBody<ModerationRequest>,
) -> AppResult<Json<CrowdsourcedReport>> {
    let report = crowdsourced::moderate(&state.pool, &user, &report_id, &body.action, &ctx).await?;
    Ok(Json(report))
}
