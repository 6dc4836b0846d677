//! GPS traces and the consent gate in front of them.
//!
//! Nothing in this module hands out a trace for a vehicle that has not
//! consented to tracking. A missing consent is an error, never an empty list.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::audit::{self, AuditEntry};
use crate::id::new_uuid_v7;
use crate::model::{
    AuditAction, RequestContext, TelemetryPoint, TelemetryTrace, User, Vehicle,
    TRACKING_NOT_ENABLED,
};
use crate::role::Capability;
use crate::time::now_ms;
use crate::vehicles;
use crate::vin::Vin;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct NewTelemetryPoint {
    /// Unix milliseconds; defaults to the time of receipt.
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub odometer: Option<i64>,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingView {
    pub vehicle: Vehicle,
    pub telemetry: Vec<TelemetryTrace>,
}

/// Body of `/api/vehicle/{vin}/telemetry/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub data: Vec<TelemetryPoint>,
}

#[allow(clippy::result_large_err)]
pub fn ensure_tracking(vehicle: &Vehicle) -> AppResult<()> {
    if vehicle.consenting_for_tracking {
        Ok(())
    } else {
        Err(AppError::forbidden("TRACKING", TRACKING_NOT_ENABLED)
            .with_context("vehicle_id", vehicle.id.clone()))
    }
}

/// Resolve a vehicle whose traces may be shown to `viewer`.
///
/// Checks run in a fixed order: lookup (404), consent (403), then the
/// caller's session (401) and capability (403).
pub async fn gate(pool: &SqlitePool, vin: &Vin, viewer: Option<&User>) -> AppResult<Vehicle> {
    let vehicle = vehicles::get_by_vin(pool, vin).await?;
    ensure_tracking(&vehicle)?;
    let viewer = viewer.ok_or_else(|| AppError::unauthenticated("Authentication required"))?;
    viewer.role.require(Capability::ViewTelemetry)?;
    Ok(vehicle)
}

fn decode_trace(row: &SqliteRow) -> AppResult<TelemetryTrace> {
    Ok(TelemetryTrace {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        timestamp: row.try_get("timestamp")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        accuracy: row.try_get("accuracy")?,
        speed: row.try_get("speed")?,
        heading: row.try_get("heading")?,
        altitude: row.try_get("altitude")?,
        odometer: row.try_get("odometer")?,
        device_id: row.try_get("device_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Newest first. Callers must have passed the consent gate.
pub(crate) async fn recent(
    pool: &SqlitePool,
    vehicle_id: &str,
    limit: u32,
) -> AppResult<Vec<TelemetryTrace>> {
    let rows = sqlx::query(
        "SELECT id, vehicle_id, timestamp, latitude, longitude, accuracy, speed, heading, altitude, \
         odometer, device_id, created_at FROM telemetry_traces WHERE vehicle_id = ? \
         ORDER BY timestamp DESC, id DESC LIMIT ?",
    )
    .bind(vehicle_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_trace).collect()
}

pub async fn tracking(
    pool: &SqlitePool,
    vin: &Vin,
    viewer: Option<&User>,
    window: u32,
    ctx: &RequestContext,
) -> AppResult<TrackingView> {
    let vehicle = gate(pool, vin, viewer).await?;
    let telemetry = recent(pool, &vehicle.id, window).await?;
    audit::record(
        pool,
        AuditEntry::new(AuditAction::View, "TelemetryTrace")
            .by(viewer)
            .resource(&vehicle.id)
            .vehicle(&vehicle.id)
            .field("telemetry"),
        ctx,
    )
    .await;
    Ok(TrackingView { vehicle, telemetry })
}

pub async fn points(
    pool: &SqlitePool,
    vin: &Vin,
    viewer: Option<&User>,
    window: u32,
    ctx: &RequestContext,
) -> AppResult<TelemetryData> {
    let view = tracking(pool, vin, viewer, window, ctx).await?;
    Ok(TelemetryData {
        data: view.telemetry.iter().map(TelemetryPoint::from).collect(),
    })
}

#[allow(clippy::result_large_err)]
fn validate_point(input: &NewTelemetryPoint) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&input.latitude) || !(-180.0..=180.0).contains(&input.longitude) {
        return Err(AppError::validation("COORDINATES", "Coordinates are out of range")
            .with_context("latitude", input.latitude.to_string())
            .with_context("longitude", input.longitude.to_string()));
    }
    if input.speed.is_some_and(|s| s < 0.0) {
        return Err(AppError::validation("SPEED", "Speed cannot be negative"));
    }
    Ok(())
}

/// Append one point. Vehicles without tracking consent refuse new points.
pub async fn append_point(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewTelemetryPoint,
) -> AppResult<TelemetryTrace> {
    actor.role.require(Capability::ManageFleet)?;
    let vehicle = vehicles::get_by_vin(pool, vin).await?;
    ensure_tracking(&vehicle)?;
    validate_point(&input)?;

    let now = now_ms();
    let trace = TelemetryTrace {
        id: new_uuid_v7(),
        vehicle_id: vehicle.id.clone(),
        timestamp: input.timestamp.unwrap_or(now),
        latitude: input.latitude,
        longitude: input.longitude,
        accuracy: input.accuracy,
        speed: input.speed,
        heading: input.heading,
        altitude: input.altitude,
        odometer: input.odometer,
        device_id: input.device_id,
        created_at: now,
    };
    sqlx::query(
        "INSERT INTO telemetry_traces (id, vehicle_id, timestamp, latitude, longitude, accuracy, \
         speed, heading, altitude, odometer, device_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&trace.id)
    .bind(&trace.vehicle_id)
    .bind(trace.timestamp)
    .bind(trace.latitude)
    .bind(trace.longitude)
    .bind(trace.accuracy)
    .bind(trace.speed)
    .bind(trace.heading)
    .bind(trace.altitude)
    .bind(trace.odometer)
    .bind(&trace.device_id)
    .bind(trace.created_at)
    .execute(pool)
    .await?;
    tracing::debug!(target: "autosentinel", event = "telemetry_appended", vehicle_id = %vehicle.id);
    Ok(trace)
}
