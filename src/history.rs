//! Append-only history tables hanging off a vehicle.
//!
//! Corrections are new rows; nothing here updates or deletes a history row
//! except closing out a theft case on recovery.

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::audit::{self, AuditEntry};
use crate::db::run_in_tx;
use crate::id::new_uuid_v7;
use crate::model::{
    decode_enum, AccidentRecord, AccidentSource, AuditAction, MileageRecord, MileageSource,
    OwnerType, OwnershipRecord, Registration, RequestContext, Severity, TheftRecord, TheftStatus,
    TitleEvent, TitleEventType, TitleStatus, User, Vehicle,
};
use crate::role::Capability;
use crate::time::{now_ms, parse_date};
use crate::vehicles;
use crate::vin::Vin;
use crate::{AppError, AppResult};
use futures::FutureExt;

fn flag(row: &SqliteRow, column: &str) -> Result<bool, sqlx::Error> {
    Ok(row.try_get::<i64, _>(column)? != 0)
}

fn limit_or_all(limit: Option<i64>) -> i64 {
    limit.unwrap_or(-1)
}

// ---- readers ---------------------------------------------------------------

fn decode_registration(row: &SqliteRow) -> AppResult<Registration> {
    Ok(Registration {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        plate_number: row.try_get("plate_number")?,
        state: row.try_get("state")?,
        country: row.try_get("country")?,
        issued_date: row.try_get("issued_date")?,
        expiry_date: row.try_get("expiry_date")?,
        is_current: flag(row, "is_current")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn registrations(pool: &SqlitePool, vehicle_id: &str) -> AppResult<Vec<Registration>> {
    let rows = sqlx::query(
        "SELECT id, vehicle_id, plate_number, state, country, issued_date, expiry_date, is_current, \
         created_at FROM vehicle_registrations WHERE vehicle_id = ? ORDER BY issued_date DESC, id DESC",
    )
    .bind(vehicle_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_registration).collect()
}

fn decode_title_event(row: &SqliteRow) -> AppResult<TitleEvent> {
    let event_type: String = row.try_get("event_type")?;
    let title_status: String = row.try_get("title_status")?;
    Ok(TitleEvent {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        event_type: decode_enum("event_type", &event_type)?,
        event_date: row.try_get("event_date")?,
        title_status: decode_enum("title_status", &title_status)?,
        state: row.try_get("state")?,
        title_number: row.try_get("title_number")?,
        odometer_reading: row.try_get("odometer_reading")?,
        odometer_unit: row.try_get("odometer_unit")?,
        notes: row.try_get("notes")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Newest first.
pub async fn title_events(
    pool: &SqlitePool,
    vehicle_id: &str,
    limit: Option<i64>,
) -> AppResult<Vec<TitleEvent>> {
    let rows = sqlx::query(
        "SELECT id, vehicle_id, event_type, event_date, title_status, state, title_number, \
         odometer_reading, odometer_unit, notes, source, created_at FROM title_events \
         WHERE vehicle_id = ? ORDER BY event_date DESC, created_at DESC LIMIT ?",
    )
    .bind(vehicle_id)
    .bind(limit_or_all(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_title_event).collect()
}

fn decode_accident(row: &SqliteRow) -> AppResult<AccidentRecord> {
    let severity: String = row.try_get("severity")?;
    let source: String = row.try_get("source")?;
    Ok(AccidentRecord {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        accident_date: row.try_get("accident_date")?,
        severity: decode_enum("severity", &severity)?,
        source: decode_enum("source", &source)?,
        damage_description: row.try_get("damage_description")?,
        estimated_damage_cost_cents: row.try_get("estimated_damage_cost_cents")?,
        location_city: row.try_get("location_city")?,
        location_state: row.try_get("location_state")?,
        airbag_deployed: flag(row, "airbag_deployed")?,
        is_structural_damage: flag(row, "is_structural_damage")?,
        report_number: row.try_get("report_number")?,
        verified: flag(row, "verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Newest first.
pub async fn accidents(
    pool: &SqlitePool,
    vehicle_id: &str,
    limit: Option<i64>,
) -> AppResult<Vec<AccidentRecord>> {
    let rows = sqlx::query(
        "SELECT id, vehicle_id, accident_date, severity, source, damage_description, \
         estimated_damage_cost_cents, location_city, location_state, airbag_deployed, \
         is_structural_damage, report_number, verified, created_at, updated_at \
         FROM accident_records WHERE vehicle_id = ? ORDER BY accident_date DESC, created_at DESC LIMIT ?",
    )
    .bind(vehicle_id)
    .bind(limit_or_all(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_accident).collect()
}

fn decode_mileage(row: &SqliteRow) -> AppResult<MileageRecord> {
    let source: String = row.try_get("source")?;
    Ok(MileageRecord {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        recorded_date: row.try_get("recorded_date")?,
        mileage: row.try_get("mileage")?,
        unit: row.try_get("unit")?,
        source: decode_enum("source", &source)?,
        source_detail: row.try_get("source_detail")?,
        is_rollback_suspected: flag(row, "is_rollback_suspected")?,
        verified: flag(row, "verified")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Oldest first, so the odometer reads forward.
pub async fn mileage(
    pool: &SqlitePool,
    vehicle_id: &str,
    limit: Option<i64>,
) -> AppResult<Vec<MileageRecord>> {
    let rows = sqlx::query(
        "SELECT id, vehicle_id, recorded_date, mileage, unit, source, source_detail, \
         is_rollback_suspected, verified, created_at FROM mileage_records \
         WHERE vehicle_id = ? ORDER BY recorded_date ASC, created_at ASC LIMIT ?",
    )
    .bind(vehicle_id)
    .bind(limit_or_all(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_mileage).collect()
}

fn decode_ownership(row: &SqliteRow) -> AppResult<OwnershipRecord> {
    let owner_type: String = row.try_get("owner_type")?;
    Ok(OwnershipRecord {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        owner_sequence: row.try_get("owner_sequence")?,
        owner_type: decode_enum("owner_type", &owner_type)?,
        ownership_start: row.try_get("ownership_start")?,
        ownership_end: row.try_get("ownership_end")?,
        is_current: flag(row, "is_current")?,
        state: row.try_get("state")?,
        ownership_duration_days: row.try_get("ownership_duration_days")?,
        owner_hash: row.try_get("owner_hash")?,
        consented_to_tracking: flag(row, "consented_to_tracking")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Owner identity is withheld unless both the vehicle and that owner
/// consented to tracking.
pub fn redact_owner(vehicle: &Vehicle, mut record: OwnershipRecord) -> OwnershipRecord {
    if !(vehicle.consenting_for_tracking && record.consented_to_tracking) {
        record.owner_hash = None;
    }
    record
}

/// By owner sequence, with owner identity redacted per consent.
pub async fn ownership(pool: &SqlitePool, vehicle: &Vehicle) -> AppResult<Vec<OwnershipRecord>> {
    let rows = sqlx::query(
        "SELECT id, vehicle_id, owner_sequence, owner_type, ownership_start, ownership_end, \
         is_current, state, ownership_duration_days, owner_hash, consented_to_tracking, created_at \
         FROM ownership_records WHERE vehicle_id = ? ORDER BY owner_sequence ASC",
    )
    .bind(&vehicle.id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| decode_ownership(row).map(|record| redact_owner(vehicle, record)))
        .collect()
}

/// Ownership history as readers see it: withheld entirely while the vehicle
/// does not consent to tracking. The owner count on the vehicle stays public.
pub async fn visible_ownership(
    pool: &SqlitePool,
    vehicle: &Vehicle,
) -> AppResult<Option<Vec<OwnershipRecord>>> {
    if !vehicle.consenting_for_tracking {
        return Ok(None);
    }
    ownership(pool, vehicle).await.map(Some)
}

fn decode_theft(row: &SqliteRow) -> AppResult<TheftRecord> {
    let status: String = row.try_get("status")?;
    Ok(TheftRecord {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        status: decode_enum("status", &status)?,
        reported_date: row.try_get("reported_date")?,
        recovered_date: row.try_get("recovered_date")?,
        reporting_agency: row.try_get("reporting_agency")?,
        case_number: row.try_get("case_number")?,
        theft_location_city: row.try_get("theft_location_city")?,
        theft_location_state: row.try_get("theft_location_state")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const THEFT_COLUMNS: &str = "id, vehicle_id, status, reported_date, recovered_date, \
     reporting_agency, case_number, theft_location_city, theft_location_state, notes, created_at, \
     updated_at";

/// Newest report first.
pub async fn thefts(pool: &SqlitePool, vehicle_id: &str) -> AppResult<Vec<TheftRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {THEFT_COLUMNS} FROM theft_records WHERE vehicle_id = ? \
         ORDER BY reported_date DESC, created_at DESC"
    ))
    .bind(vehicle_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_theft).collect()
}

// ---- appenders -------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewRegistration {
    pub plate_number: String,
    pub state: String,
    #[serde(default)]
    pub country: Option<String>,
    pub issued_date: NaiveDate,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub is_current: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTitleEvent {
    pub event_type: TitleEventType,
    pub event_date: NaiveDate,
    pub title_status: TitleStatus,
    pub state: String,
    #[serde(default)]
    pub title_number: Option<String>,
    #[serde(default)]
    pub odometer_reading: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccident {
    pub accident_date: NaiveDate,
    pub severity: Severity,
    pub source: AccidentSource,
    #[serde(default)]
    pub damage_description: Option<String>,
    #[serde(default)]
    pub estimated_damage_cost_cents: Option<i64>,
    #[serde(default)]
    pub location_city: Option<String>,
    #[serde(default)]
    pub location_state: Option<String>,
    #[serde(default)]
    pub airbag_deployed: bool,
    #[serde(default)]
    pub is_structural_damage: bool,
    #[serde(default)]
    pub report_number: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMileage {
    pub recorded_date: NaiveDate,
    pub mileage: i64,
    pub source: MileageSource,
    #[serde(default)]
    pub source_detail: Option<String>,
    #[serde(default = "default_true")]
    pub verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOwnership {
    pub owner_type: OwnerType,
    pub ownership_start: NaiveDate,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub owner_hash: Option<String>,
    #[serde(default)]
    pub consented_to_tracking: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTheft {
    pub reported_date: NaiveDate,
    pub reporting_agency: String,
    #[serde(default)]
    pub case_number: Option<String>,
    #[serde(default)]
    pub theft_location_city: Option<String>,
    #[serde(default)]
    pub theft_location_state: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TheftRecovery {
    pub recovered_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

#[allow(clippy::result_large_err)]
fn required(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        Err(AppError::validation("REQUIRED", format!("{field} is required"))
            .with_context("field", field.to_string()))
    } else {
        Ok(())
    }
}

async fn writable_vehicle(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
) -> AppResult<Vehicle> {
    actor.role.require(Capability::ManageFleet)?;
    vehicles::get_by_vin(pool, vin).await
}

async fn audit_append(
    pool: &SqlitePool,
    actor: &User,
    resource_type: &'static str,
    id: &str,
    vehicle: &Vehicle,
    ctx: &RequestContext,
) {
    audit::record(
        pool,
        AuditEntry::new(AuditAction::Create, resource_type)
            .by(Some(actor))
            .resource(id)
            .vehicle(&vehicle.id),
        ctx,
    )
    .await;
}

pub async fn add_registration(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewRegistration,
    ctx: &RequestContext,
) -> AppResult<Registration> {
    let vehicle = writable_vehicle(pool, actor, vin).await?;
    required("plate_number", &input.plate_number)?;
    required("state", &input.state)?;
    let id = new_uuid_v7();
    let now = now_ms();
    let plate = input.plate_number.trim().to_ascii_uppercase();
    let country = input.country.unwrap_or_else(|| "US".to_string());
    let vehicle_id = vehicle.id.clone();
    let row_id = id.clone();

    run_in_tx(pool, move |tx| {
        async move {
            if input.is_current {
                sqlx::query("UPDATE vehicle_registrations SET is_current = 0 WHERE vehicle_id = ?")
                    .bind(&vehicle_id)
                    .execute(&mut **tx)
                    .await?;
            }
            sqlx::query(
                "INSERT INTO vehicle_registrations (id, vehicle_id, plate_number, state, country, \
                 issued_date, expiry_date, is_current, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row_id)
            .bind(&vehicle_id)
            .bind(&plate)
            .bind(input.state.trim())
            .bind(&country)
            .bind(input.issued_date.to_string())
            .bind(input.expiry_date.map(|d| d.to_string()))
            .bind(i64::from(input.is_current))
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|err| {
                AppError::from(err).on_unique_violation(|| {
                    AppError::conflict("PLATE", "That plate is already registered")
                        .with_context("plate_number", plate.clone())
                })
            })?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    audit_append(pool, actor, "VehicleRegistration", &id, &vehicle, ctx).await;
    let rows = registrations(pool, &vehicle.id).await?;
    rows.into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| AppError::not_found("REGISTRATION", "Registration not found"))
}

/// Appends a title event and moves the vehicle's current brand to it when it
/// is the newest event on file.
pub async fn add_title_event(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewTitleEvent,
    ctx: &RequestContext,
) -> AppResult<TitleEvent> {
    let vehicle = writable_vehicle(pool, actor, vin).await?;
    required("state", &input.state)?;
    required("source", &input.source)?;
    if input.odometer_reading.is_some_and(|o| o < 0) {
        return Err(AppError::validation("MILEAGE", "Odometer reading cannot be negative"));
    }
    let id = new_uuid_v7();
    let now = now_ms();
    let vehicle_id = vehicle.id.clone();
    let row_id = id.clone();
    let event_date = input.event_date.to_string();

    run_in_tx(pool, move |tx| {
        async move {
            let newer: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM title_events WHERE vehicle_id = ? AND event_date > ? LIMIT 1",
            )
            .bind(&vehicle_id)
            .bind(&event_date)
            .fetch_optional(&mut **tx)
            .await?;
            sqlx::query(
                "INSERT INTO title_events (id, vehicle_id, event_type, event_date, title_status, \
                 state, title_number, odometer_reading, odometer_unit, notes, source, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'miles', ?, ?, ?)",
            )
            .bind(&row_id)
            .bind(&vehicle_id)
            .bind(input.event_type.as_str())
            .bind(&event_date)
            .bind(input.title_status.as_str())
            .bind(input.state.trim())
            .bind(&input.title_number)
            .bind(input.odometer_reading)
            .bind(&input.notes)
            .bind(input.source.trim())
            .bind(now)
            .execute(&mut **tx)
            .await?;
            if newer.is_none() {
                sqlx::query(
                    "UPDATE vehicles SET current_title_status = ?, updated_at = ?, last_reported_at = ? \
                     WHERE id = ?",
                )
                .bind(input.title_status.as_str())
                .bind(now)
                .bind(now)
                .bind(&vehicle_id)
                .execute(&mut **tx)
                .await?;
            }
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    audit_append(pool, actor, "TitleEvent", &id, &vehicle, ctx).await;
    let events = title_events(pool, &vehicle.id, None).await?;
    events
        .into_iter()
        .find(|e| e.id == id)
        .ok_or_else(|| AppError::not_found("TITLE_EVENT", "Title event not found"))
}

pub async fn add_accident(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewAccident,
    ctx: &RequestContext,
) -> AppResult<AccidentRecord> {
    let vehicle = writable_vehicle(pool, actor, vin).await?;
    if input.estimated_damage_cost_cents.is_some_and(|c| c < 0) {
        return Err(AppError::validation("DAMAGE_COST", "Damage cost cannot be negative"));
    }
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO accident_records (id, vehicle_id, accident_date, severity, source, \
         damage_description, estimated_damage_cost_cents, location_city, location_state, \
         airbag_deployed, is_structural_damage, report_number, verified, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&vehicle.id)
    .bind(input.accident_date.to_string())
    .bind(input.severity.as_str())
    .bind(input.source.as_str())
    .bind(&input.damage_description)
    .bind(input.estimated_damage_cost_cents)
    .bind(&input.location_city)
    .bind(&input.location_state)
    .bind(i64::from(input.airbag_deployed))
    .bind(i64::from(input.is_structural_damage))
    .bind(&input.report_number)
    .bind(i64::from(input.verified))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    audit_append(pool, actor, "AccidentRecord", &id, &vehicle, ctx).await;
    let rows = accidents(pool, &vehicle.id, None).await?;
    rows.into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| AppError::not_found("ACCIDENT", "Accident record not found"))
}

/// Appends an odometer reading. A reading below the latest earlier reading
/// is kept but flagged as a suspected rollback and does not move the
/// vehicle's current mileage.
pub async fn add_mileage(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewMileage,
    ctx: &RequestContext,
) -> AppResult<MileageRecord> {
    let vehicle = writable_vehicle(pool, actor, vin).await?;
    if input.mileage < 0 {
        return Err(AppError::validation("MILEAGE", "Mileage cannot be negative"));
    }
    let id = new_uuid_v7();
    let now = now_ms();
    let vehicle_id = vehicle.id.clone();
    let row_id = id.clone();
    let recorded_date = input.recorded_date.to_string();

    let suspected = run_in_tx(pool, move |tx| {
        async move {
            let previous: Option<i64> = sqlx::query_scalar(
                "SELECT mileage FROM mileage_records WHERE vehicle_id = ? AND recorded_date <= ? \
                 ORDER BY recorded_date DESC, created_at DESC LIMIT 1",
            )
            .bind(&vehicle_id)
            .bind(&recorded_date)
            .fetch_optional(&mut **tx)
            .await?;
            let suspected = previous.is_some_and(|prev| input.mileage < prev);

            sqlx::query(
                "INSERT INTO mileage_records (id, vehicle_id, recorded_date, mileage, unit, source, \
                 source_detail, is_rollback_suspected, verified, created_at) \
                 VALUES (?, ?, ?, ?, 'miles', ?, ?, ?, ?, ?)",
            )
            .bind(&row_id)
            .bind(&vehicle_id)
            .bind(&recorded_date)
            .bind(input.mileage)
            .bind(input.source.as_str())
            .bind(&input.source_detail)
            .bind(i64::from(suspected))
            .bind(i64::from(input.verified))
            .bind(now)
            .execute(&mut **tx)
            .await?;

            if !suspected {
                sqlx::query(
                    "UPDATE vehicles SET current_mileage = MAX(current_mileage, ?), updated_at = ?, \
                     last_reported_at = ? WHERE id = ?",
                )
                .bind(input.mileage)
                .bind(now)
                .bind(now)
                .bind(&vehicle_id)
                .execute(&mut **tx)
                .await?;
            }
            Ok::<_, AppError>(suspected)
        }
        .boxed()
    })
    .await?;

    if suspected {
        tracing::warn!(
            target: "autosentinel",
            event = "mileage_rollback_suspected",
            vehicle_id = %vehicle.id,
            mileage = input.mileage
        );
    }
    audit_append(pool, actor, "MileageRecord", &id, &vehicle, ctx).await;
    let rows = mileage(pool, &vehicle.id, None).await?;
    rows.into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| AppError::not_found("MILEAGE", "Mileage record not found"))
}

/// Appends the next owner. The previous current owner is closed out on the
/// new owner's start date and the vehicle's owner count follows the sequence.
pub async fn add_ownership(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewOwnership,
    ctx: &RequestContext,
) -> AppResult<OwnershipRecord> {
    let vehicle = writable_vehicle(pool, actor, vin).await?;
    let id = new_uuid_v7();
    let now = now_ms();
    let vehicle_id = vehicle.id.clone();
    let row_id = id.clone();
    let start = input.ownership_start;

    run_in_tx(pool, move |tx| {
        async move {
            let previous = sqlx::query(
                "SELECT id, ownership_start FROM ownership_records WHERE vehicle_id = ? AND is_current = 1",
            )
            .bind(&vehicle_id)
            .fetch_optional(&mut **tx)
            .await?;
            if let Some(prev) = previous {
                let prev_id: String = prev.try_get("id")?;
                let prev_start: String = prev.try_get("ownership_start")?;
                let duration = parse_date("ownership_start", &prev_start)
                    .ok()
                    .map(|s| (start - s).num_days().max(0));
                sqlx::query(
                    "UPDATE ownership_records SET is_current = 0, ownership_end = ?, \
                     ownership_duration_days = ? WHERE id = ?",
                )
                .bind(start.to_string())
                .bind(duration)
                .bind(&prev_id)
                .execute(&mut **tx)
                .await?;
            }

            let next_sequence: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(owner_sequence), 0) + 1 FROM ownership_records WHERE vehicle_id = ?",
            )
            .bind(&vehicle_id)
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query(
                "INSERT INTO ownership_records (id, vehicle_id, owner_sequence, owner_type, \
                 ownership_start, is_current, state, owner_hash, consented_to_tracking, created_at) \
                 VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
            )
            .bind(&row_id)
            .bind(&vehicle_id)
            .bind(next_sequence)
            .bind(input.owner_type.as_str())
            .bind(start.to_string())
            .bind(&input.state)
            .bind(&input.owner_hash)
            .bind(i64::from(input.consented_to_tracking))
            .bind(now)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                "UPDATE vehicles SET current_owner_count = MAX(current_owner_count, ?), updated_at = ? \
                 WHERE id = ?",
            )
            .bind(next_sequence)
            .bind(now)
            .bind(&vehicle_id)
            .execute(&mut **tx)
            .await?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    audit_append(pool, actor, "OwnershipRecord", &id, &vehicle, ctx).await;
    let refreshed = vehicles::get_by_id(pool, &vehicle.id).await?;
    let rows = ownership(pool, &refreshed).await?;
    rows.into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| AppError::not_found("OWNERSHIP", "Ownership record not found"))
}

/// Opens a theft case and marks the vehicle stolen.
pub async fn report_theft(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: NewTheft,
    ctx: &RequestContext,
) -> AppResult<TheftRecord> {
    let vehicle = writable_vehicle(pool, actor, vin).await?;
    required("reporting_agency", &input.reporting_agency)?;
    let id = new_uuid_v7();
    let now = now_ms();
    let vehicle_id = vehicle.id.clone();
    let row_id = id.clone();

    run_in_tx(pool, move |tx| {
        async move {
            sqlx::query(
                "INSERT INTO theft_records (id, vehicle_id, status, reported_date, reporting_agency, \
                 case_number, theft_location_city, theft_location_state, notes, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row_id)
            .bind(&vehicle_id)
            .bind(TheftStatus::Reported.as_str())
            .bind(input.reported_date.to_string())
            .bind(input.reporting_agency.trim())
            .bind(&input.case_number)
            .bind(&input.theft_location_city)
            .bind(&input.theft_location_state)
            .bind(&input.notes)
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await?;
            sqlx::query("UPDATE vehicles SET is_stolen = 1, updated_at = ?, last_reported_at = ? WHERE id = ?")
                .bind(now)
                .bind(now)
                .bind(&vehicle_id)
                .execute(&mut **tx)
                .await?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(target: "autosentinel", event = "theft_reported", vehicle_id = %vehicle.id, theft_id = %id);
    audit_append(pool, actor, "TheftRecord", &id, &vehicle, ctx).await;
    get_theft(pool, &id).await
}

async fn get_theft(pool: &SqlitePool, id: &str) -> AppResult<TheftRecord> {
    let row = sqlx::query(&format!("SELECT {THEFT_COLUMNS} FROM theft_records WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::not_found("THEFT", "Theft record not found").with_context("theft_id", id.to_string())
        })?;
    decode_theft(&row)
}

/// Marks an open case recovered. The vehicle stays flagged stolen while any
/// other case remains open.
pub async fn recover_theft(
    pool: &SqlitePool,
    actor: &User,
    theft_id: &str,
    input: TheftRecovery,
    ctx: &RequestContext,
) -> AppResult<TheftRecord> {
    actor.role.require(Capability::ManageFleet)?;
    let theft = get_theft(pool, theft_id).await?;
    if theft.status != TheftStatus::Reported {
        return Err(AppError::conflict("THEFT_STATE", "Theft case is not open")
            .with_context("status", theft.status.as_str()));
    }
    let now = now_ms();
    let vehicle_id = theft.vehicle_id.clone();
    let row_id = theft.id.clone();

    run_in_tx(pool, move |tx| {
        async move {
            sqlx::query(
                "UPDATE theft_records SET status = ?, recovered_date = ?, \
                 notes = COALESCE(?, notes), updated_at = ? WHERE id = ?",
            )
            .bind(TheftStatus::Recovered.as_str())
            .bind(input.recovered_date.to_string())
            .bind(&input.notes)
            .bind(now)
            .bind(&row_id)
            .execute(&mut **tx)
            .await?;
            let open: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM theft_records WHERE vehicle_id = ? AND status = 'reported'",
            )
            .bind(&vehicle_id)
            .fetch_one(&mut **tx)
            .await?;
            if open == 0 {
                sqlx::query("UPDATE vehicles SET is_stolen = 0, updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(&vehicle_id)
                    .execute(&mut **tx)
                    .await?;
            }
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(target: "autosentinel", event = "theft_recovered", vehicle_id = %theft.vehicle_id, theft_id = %theft.id);
    audit::record(
        pool,
        AuditEntry::new(AuditAction::Update, "TheftRecord")
            .by(Some(actor))
            .resource(&theft.id)
            .vehicle(&theft.vehicle_id)
            .field("status"),
        ctx,
    )
    .await;
    get_theft(pool, theft_id).await
}
