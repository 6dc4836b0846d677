//! Vehicle listing, detail pages and the append-only history feeds.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::history::{
    self, NewAccident, NewMileage, NewOwnership, NewRegistration, NewTheft, NewTitleEvent,
    TheftRecovery,
};
use crate::http::extract::{CurrentUser, JsonBody, MaybeUser, VinPath};
use crate::model::{
    AccidentRecord, MileageRecord, OwnershipRecord, Registration, RequestContext, TelemetryTrace,
    TheftRecord, TitleEvent, Vehicle,
};
use crate::pagination::PageParams;
use crate::state::AppState;
use crate::telemetry::{self, NewTelemetryPoint, TrackingView};
use crate::vehicles::{self, NewVehicle, VehicleDetail, VehicleFilter, VehicleHistory, VehicleListing};
use crate::AppResult;

type Created<T> = (StatusCode, Json<T>);

fn created<T>(value: T) -> Created<T> {
    (StatusCode::CREATED, Json(value))
}

#[derive(Debug, Deserialize)]
pub struct TrackingConsent {
    pub consent: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<VehicleFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<VehicleListing>> {
    let listing = vehicles::list(
        &state.pool,
        &filter,
        page.requested(),
        state.config.page_sizes.vehicles,
    )
    .await?;
    Ok(Json(listing))
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewVehicle>,
) -> AppResult<Created<Vehicle>> {
    Ok(created(vehicles::create(&state.pool, &user, input, &ctx).await?))
}

pub async fn detail(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ctx: RequestContext,
) -> AppResult<Json<VehicleDetail>> {
    Ok(Json(vehicles::detail(&state.pool, &vin, user.as_ref(), &ctx).await?))
}

pub async fn history(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
) -> AppResult<Json<VehicleHistory>> {
    Ok(Json(vehicles::full_history(&state.pool, &vin).await?))
}

pub async fn tracking(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ctx: RequestContext,
) -> AppResult<Json<TrackingView>> {
    let view = telemetry::tracking(
        &state.pool,
        &vin,
        user.as_ref(),
        state.config.telemetry_window,
        &ctx,
    )
    .await?;
    Ok(Json(view))
}

pub async fn set_tracking_consent(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(body): JsonBody<TrackingConsent>,
) -> AppResult<Json<Vehicle>> {
    let vehicle = vehicles::set_tracking_consent(&state.pool, &user, &vin, body.consent, &ctx).await?;
    Ok(Json(vehicle))
}

pub async fn append_telemetry(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(input): JsonBody<NewTelemetryPoint>,
) -> AppResult<Created<TelemetryTrace>> {
    Ok(created(telemetry::append_point(&state.pool, &user, &vin, input).await?))
}

pub async fn add_registration(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewRegistration>,
) -> AppResult<Created<Registration>> {
    Ok(created(history::add_registration(&state.pool, &user, &vin, input, &ctx).await?))
}

pub async fn add_title_event(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewTitleEvent>,
) -> AppResult<Created<TitleEvent>> {
    Ok(created(history::add_title_event(&state.pool, &user, &vin, input, &ctx).await?))
}

pub async fn add_accident(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewAccident>,
) -> AppResult<Created<AccidentRecord>> {
    Ok(created(history::add_accident(&state.pool, &user, &vin, input, &ctx).await?))
}

pub async fn add_mileage(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewMileage>,
) -> AppResult<Created<MileageRecord>> {
    Ok(created(history::add_mileage(&state.pool, &user, &vin, input, &ctx).await?))
}

pub async fn add_ownership(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewOwnership>,
) -> AppResult<Created<OwnershipRecord>> {
    Ok(created(history::add_ownership(&state.pool, &user, &vin, input, &ctx).await?))
}

pub async fn report_theft(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<NewTheft>,
) -> AppResult<Created<TheftRecord>> {
    Ok(created(history::report_theft(&state.pool, &user, &vin, input, &ctx).await?))
}

pub async fn recover_theft(
    Path(theft_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(input): JsonBody<TheftRecovery>,
) -> AppResult<Json<TheftRecord>> {
    Ok(Json(history::recover_theft(&state.pool, &user, &theft_id, input, &ctx).await?))
}

pub async fn stolen(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<Vehicle>>> {
    user.role.require_admin()?;
    Ok(Json(vehicles::stolen(&state.pool).await?))
}
