//! Flat JSON endpoints for integrations.

use axum::{extract::State, Json};

use crate::http::extract::{MaybeUser, VinPath};
use crate::model::{RequestContext, VehicleSummary};
use crate::state::AppState;
use crate::telemetry::{self, TelemetryData};
use crate::vehicles;
use crate::AppResult;

pub async fn vehicle_lookup(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
) -> AppResult<Json<VehicleSummary>> {
    let vehicle = vehicles::get_by_vin(&state.pool, &vin).await?;
    Ok(Json(VehicleSummary::from(&vehicle)))
}

/// The consent check runs before authentication, so a vehicle without
/// tracking consent answers 403 to everyone.
pub async fn telemetry_data(
    VinPath(vin): VinPath,
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ctx: RequestContext,
) -> AppResult<Json<TelemetryData>> {
    let data = telemetry::points(
        &state.pool,
        &vin,
        user.as_ref(),
        state.config.telemetry_window,
        &ctx,
    )
    .await?;
    Ok(Json(data))
}
