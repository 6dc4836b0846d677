//! Purchasable vehicle reports.
//!
//! A report is generated inline when requested: `pending` on insert, then
//! `processing`, then `completed` with its snapshot or `failed` with a
//! reason. Full content is readable only once a completed purchase exists.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::audit::{self, AuditEntry};
use crate::db::run_in_tx;
use crate::history;
use crate::id::new_uuid_v7;
use crate::model::{
    decode_enum, decode_json, AuditAction, PaymentStatus, ReportPurchase, ReportStatus,
    RequestContext, TelemetryPoint, User, Vehicle, VehicleReport, REPORT_ACCESS_DENIED,
    REPORT_NOT_FOUND,
};
use crate::pagination::{Page, PageWindow};
use crate::role::Capability;
use crate::telemetry;
use crate::time::now_ms;
use crate::vehicles;
use crate::vin::Vin;
use crate::{AppError, AppResult};

pub const ALREADY_PURCHASED: &str = "CONFLICT/ALREADY_PURCHASED";
pub const REPORT_STATE: &str = "CONFLICT/REPORT_STATE";

/// Snapshot keys visible before purchase.
const BASIC_FIELDS: &[&str] = &["vin", "make", "model", "year", "title_status", "mileage", "owner_count"];

/// Snapshot keys that depend on the vehicle's tracking consent at read time,
/// not only at generation time.
const CONSENT_GATED_FIELDS: &[&str] = &["telemetry", "ownership"];

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    #[serde(default)]
    pub include_telemetry: bool,
    #[serde(default = "default_owner_history")]
    pub include_owner_history: bool,
}

impl Default for ReportRequest {
    fn default() -> Self {
        ReportRequest {
            include_telemetry: false,
            include_owner_history: true,
        }
    }
}

fn default_owner_history() -> bool {
    true
}

#[derive(Debug, Clone, Copy)]
pub struct ReportSettings {
    pub price_cents: i64,
    pub timeout: Duration,
    pub telemetry_window: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportView {
    Basic,
    Full,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDetail {
    pub report: VehicleReport,
    pub view: ReportView,
    pub purchase: Option<ReportPurchase>,
}

const REPORT_SELECT: &str = "SELECT r.id, r.vehicle_id, v.vin, r.requested_by, r.status, r.is_paid, \
     r.price_cents, r.include_telemetry, r.include_owner_history, r.json_data, r.failure_reason, \
     r.generation_started_at, r.generation_completed_at, r.created_at, r.updated_at, \
     v.consenting_for_tracking AS vehicle_consents \
     FROM vehicle_reports r JOIN vehicles v ON v.id = r.vehicle_id";

/// Drop consent-gated sections once the vehicle has withdrawn consent.
fn withhold_tracked(data: Value, vehicle_consents: bool) -> Value {
    match data {
        Value::Object(mut map) if !vehicle_consents => {
            for key in CONSENT_GATED_FIELDS {
                map.remove(*key);
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn decode_report(row: &SqliteRow) -> AppResult<VehicleReport> {
    let status: String = row.try_get("status")?;
    let vehicle_consents = row.try_get::<i64, _>("vehicle_consents")? != 0;
    Ok(VehicleReport {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        vin: row.try_get("vin")?,
        requested_by: row.try_get("requested_by")?,
        status: decode_enum("status", &status)?,
        is_paid: row.try_get::<i64, _>("is_paid")? != 0,
        price_cents: row.try_get("price_cents")?,
        include_telemetry: row.try_get::<i64, _>("include_telemetry")? != 0,
        include_owner_history: row.try_get::<i64, _>("include_owner_history")? != 0,
        json_data: decode_json(row.try_get("json_data")?)
            .map(|data| withhold_tracked(data, vehicle_consents)),
        failure_reason: row.try_get("failure_reason")?,
        generation_started_at: row.try_get("generation_started_at")?,
        generation_completed_at: row.try_get("generation_completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_purchase(row: &SqliteRow) -> AppResult<ReportPurchase> {
    let status: String = row.try_get("payment_status")?;
    Ok(ReportPurchase {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        user_id: row.try_get("user_id")?,
        amount_cents: row.try_get("amount_cents")?,
        payment_status: decode_enum("payment_status", &status)?,
        payment_method: row.try_get("payment_method")?,
        transaction_id: row.try_get("transaction_id")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<VehicleReport> {
    let row = sqlx::query(&format!("{REPORT_SELECT} WHERE r.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::not_found("REPORT", REPORT_NOT_FOUND).with_context("report_id", id.to_string())
        })?;
    decode_report(&row)
}

pub async fn purchase_for(pool: &SqlitePool, report_id: &str) -> AppResult<Option<ReportPurchase>> {
    let row = sqlx::query(
        "SELECT id, report_id, user_id, amount_cents, payment_status, payment_method, transaction_id, \
         created_at, completed_at FROM report_purchases WHERE report_id = ?",
    )
    .bind(report_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(decode_purchase).transpose()
}

/// Move a report from `from` to `to`. The row must still be in `from`.
async fn transition(
    pool: &SqlitePool,
    id: &str,
    from: ReportStatus,
    to: ReportStatus,
    failure_reason: Option<&str>,
) -> AppResult<()> {
    if !from.can_transition_to(to) {
        return Err(state_error(from, to));
    }
    let now = now_ms();
    let started = (to == ReportStatus::Processing).then_some(now);
    let res = sqlx::query(
        "UPDATE vehicle_reports SET status = ?1, updated_at = ?2, \
         generation_started_at = COALESCE(?3, generation_started_at), \
         failure_reason = COALESCE(?4, failure_reason), \
         generation_completed_at = CASE WHEN ?1 = 'failed' THEN ?2 ELSE generation_completed_at END \
         WHERE id = ?5 AND status = ?6",
    )
    .bind(to.as_str())
    .bind(now)
    .bind(started)
    .bind(failure_reason)
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(state_error(from, to).with_context("report_id", id.to_string()));
    }
    Ok(())
}

fn state_error(from: ReportStatus, to: ReportStatus) -> AppError {
    AppError::new(REPORT_STATE, "Report cannot move to that state")
        .with_context("from", from.as_str())
        .with_context("to", to.as_str())
}

async fn build_snapshot(
    pool: &SqlitePool,
    vehicle: &Vehicle,
    include_owner_history: bool,
    include_telemetry: bool,
    telemetry_window: u32,
) -> AppResult<Value> {
    let accidents = history::accidents(pool, &vehicle.id, None).await?;
    let title_events = history::title_events(pool, &vehicle.id, None).await?;
    let thefts = history::thefts(pool, &vehicle.id).await?;

    let mut snapshot = json!({
        "vin": vehicle.vin,
        "make": vehicle.make,
        "model": vehicle.model,
        "year": vehicle.year,
        "title_status": vehicle.current_title_status,
        "mileage": vehicle.current_mileage,
        "owner_count": vehicle.current_owner_count,
        "accidents": accidents.iter().map(|a| json!({
            "date": a.accident_date,
            "severity": a.severity,
            "structural_damage": a.is_structural_damage,
            "airbag_deployed": a.airbag_deployed,
        })).collect::<Vec<_>>(),
        "title_events": title_events.iter().map(|e| json!({
            "date": e.event_date,
            "event_type": e.event_type,
            "title_status": e.title_status,
            "state": e.state,
        })).collect::<Vec<_>>(),
        "theft_records": thefts.iter().map(|t| json!({
            "reported_date": t.reported_date,
            "recovered_date": t.recovered_date,
            "status": t.status,
        })).collect::<Vec<_>>(),
    });

    if include_owner_history {
        let owners = history::visible_ownership(pool, vehicle).await?.unwrap_or_default();
        snapshot["ownership"] = json!(owners
            .iter()
            .map(|o| json!({
                "sequence": o.owner_sequence,
                "owner_type": o.owner_type,
                "start": o.ownership_start,
                "end": o.ownership_end,
                "state": o.state,
                "duration_days": o.ownership_duration_days,
            }))
            .collect::<Vec<_>>());
    }
    if include_telemetry {
        telemetry::ensure_tracking(vehicle)?;
        let traces = telemetry::recent(pool, &vehicle.id, telemetry_window).await?;
        snapshot["telemetry"] = json!(traces.iter().map(TelemetryPoint::from).collect::<Vec<_>>());
    }
    Ok(snapshot)
}

async fn complete(pool: &SqlitePool, id: &str, snapshot: Value) -> AppResult<()> {
    let report_id = id.to_string();
    let body = snapshot.to_string();
    run_in_tx(pool, move |tx| {
        async move {
            let now = now_ms();
            let res = sqlx::query(
                "UPDATE vehicle_reports SET status = ?, json_data = ?, generation_completed_at = ?, \
                 updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(ReportStatus::Completed.as_str())
            .bind(&body)
            .bind(now)
            .bind(now)
            .bind(&report_id)
            .bind(ReportStatus::Processing.as_str())
            .execute(&mut **tx)
            .await?;
            if res.rows_affected() == 0 {
                return Err(state_error(ReportStatus::Processing, ReportStatus::Completed)
                    .with_context("report_id", report_id.clone()));
            }
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await
}

/// Drive a `processing` report to a terminal state with the outcome of
/// `work`, bounded by `timeout`.
pub(crate) async fn finish<F>(pool: &SqlitePool, id: &str, timeout: Duration, work: F) -> AppResult<()>
where
    F: Future<Output = AppResult<Value>>,
{
    let failure = match tokio::time::timeout(timeout, work).await {
        Ok(Ok(snapshot)) => match complete(pool, id, snapshot).await {
            Ok(()) => return Ok(()),
            Err(err) => err.to_string(),
        },
        Ok(Err(err)) => err.to_string(),
        Err(_) => format!("generation exceeded {}ms", timeout.as_millis()),
    };
    tracing::warn!(
        target: "autosentinel",
        event = "report_generation_failed",
        report_id = %id,
        reason = %failure
    );
    transition(pool, id, ReportStatus::Processing, ReportStatus::Failed, Some(failure.as_str())).await
}

/// Request and synchronously generate a report for `vin`.
///
/// Telemetry and owner history are only included when the vehicle consents
/// to tracking at request time; otherwise the flags are stored as false.
pub async fn request(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    input: ReportRequest,
    settings: ReportSettings,
    ctx: &RequestContext,
) -> AppResult<VehicleReport> {
    let vehicle = vehicles::get_by_vin(pool, vin).await?;
    let include_telemetry = input.include_telemetry && vehicle.consenting_for_tracking;
    let include_owner_history = input.include_owner_history && vehicle.consenting_for_tracking;
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO vehicle_reports (id, vehicle_id, requested_by, status, is_paid, price_cents, \
         include_telemetry, include_owner_history, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&vehicle.id)
    .bind(&actor.id)
    .bind(ReportStatus::Pending.as_str())
    .bind(settings.price_cents)
    .bind(i64::from(include_telemetry))
    .bind(i64::from(include_owner_history))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    tracing::info!(target: "autosentinel", event = "report_requested", report_id = %id, vehicle_id = %vehicle.id);

    transition(pool, &id, ReportStatus::Pending, ReportStatus::Processing, None).await?;
    finish(
        pool,
        &id,
        settings.timeout,
        build_snapshot(
            pool,
            &vehicle,
            include_owner_history,
            include_telemetry,
            settings.telemetry_window,
        ),
    )
    .await?;

    audit::record(
        pool,
        AuditEntry::new(AuditAction::Create, "VehicleReport")
            .by(Some(actor))
            .resource(&id)
            .vehicle(&vehicle.id),
        ctx,
    )
    .await;
    get(pool, &id).await
}

/// The caller's own reports, newest first.
pub async fn list_own(
    pool: &SqlitePool,
    user: &User,
    requested_page: u32,
    per_page: u32,
) -> AppResult<Page<VehicleReport>> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_reports WHERE requested_by = ?")
        .bind(&user.id)
        .fetch_one(pool)
        .await?;
    let window = PageWindow::resolve(requested_page, per_page, total);
    let rows = sqlx::query(&format!(
        "{REPORT_SELECT} WHERE r.requested_by = ? ORDER BY r.created_at DESC, r.id DESC LIMIT ? OFFSET ?"
    ))
    .bind(&user.id)
    .bind(window.limit())
    .bind(window.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .iter()
        .map(|row| decode_report(row).map(listed))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(window.into_page(items))
}

pub async fn recent_for_user(pool: &SqlitePool, user_id: &str, limit: i64) -> AppResult<Vec<VehicleReport>> {
    let rows = sqlx::query(&format!(
        "{REPORT_SELECT} WHERE r.requested_by = ? ORDER BY r.created_at DESC, r.id DESC LIMIT ?"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(|row| decode_report(row).map(listed)).collect()
}

fn is_requester(report: &VehicleReport, user: &User) -> bool {
    report.requested_by.as_deref() == Some(user.id.as_str())
}

/// Strip the snapshot down to the pre-purchase fields.
fn basic_view(mut report: VehicleReport) -> VehicleReport {
    report.json_data = report.json_data.map(|data| {
        let mut basic = serde_json::Map::new();
        for key in BASIC_FIELDS {
            if let Some(value) = data.get(*key) {
                basic.insert((*key).to_string(), value.clone());
            }
        }
        Value::Object(basic)
    });
    report
}

/// Listings never carry more than the basic fields of an unpaid report.
fn listed(report: VehicleReport) -> VehicleReport {
    if report.is_paid {
        report
    } else {
        basic_view(report)
    }
}

/// Requesters and report auditors may read a report; everyone else gets
/// `FORBIDDEN/REPORT`. Unpaid reports show only the basic fields unless the
/// viewer may read every report.
pub async fn detail(
    pool: &SqlitePool,
    viewer: &User,
    id: &str,
    ctx: &RequestContext,
) -> AppResult<ReportDetail> {
    let report = get(pool, id).await?;
    let privileged = viewer.role.allows(Capability::ViewAllReports);
    if !is_requester(&report, viewer) && !privileged {
        audit::record(
            pool,
            AuditEntry::new(AuditAction::AccessRestricted, "VehicleReport")
                .by(Some(viewer))
                .resource(&report.id)
                .vehicle(&report.vehicle_id),
            ctx,
        )
        .await;
        return Err(AppError::forbidden("REPORT", REPORT_ACCESS_DENIED)
            .with_context("report_id", report.id.clone()));
    }

    audit::record(
        pool,
        AuditEntry::new(AuditAction::View, "VehicleReport")
            .by(Some(viewer))
            .resource(&report.id)
            .vehicle(&report.vehicle_id),
        ctx,
    )
    .await;

    let purchase = purchase_for(pool, &report.id).await?;
    let (report, view) = if report.is_paid || privileged {
        (report, ReportView::Full)
    } else {
        (basic_view(report), ReportView::Basic)
    };
    Ok(ReportDetail {
        report,
        view,
        purchase,
    })
}

fn already_purchased(report_id: &str) -> AppError {
    AppError::new(ALREADY_PURCHASED, "This report has already been purchased")
        .with_context("report_id", report_id.to_string())
}

/// Simulated checkout. The purchase row and the report's paid flag are
/// written in one transaction; a second purchase of the same report is a
/// conflict and leaves the first row untouched.
pub async fn purchase(
    pool: &SqlitePool,
    actor: &User,
    report_id: &str,
    ctx: &RequestContext,
) -> AppResult<ReportPurchase> {
    actor.role.require(Capability::PurchaseReport)?;
    let report = get(pool, report_id).await?;
    if !is_requester(&report, actor) && !actor.role.allows(Capability::FullAccess) {
        return Err(AppError::forbidden("REPORT", REPORT_ACCESS_DENIED)
            .with_context("report_id", report.id.clone()));
    }
    if report.is_paid {
        return Err(already_purchased(&report.id));
    }
    if report.status != ReportStatus::Completed {
        return Err(AppError::new(REPORT_STATE, "Report is not ready for purchase")
            .with_context("status", report.status.as_str()));
    }

    let purchase_id = new_uuid_v7();
    let now = now_ms();
    let rid = report.id.clone();
    let pid = purchase_id.clone();
    let user_id = actor.id.clone();
    let amount = report.price_cents;
    run_in_tx(pool, move |tx| {
        async move {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT id FROM report_purchases WHERE report_id = ?")
                    .bind(&rid)
                    .fetch_optional(&mut **tx)
                    .await?;
            if existing.is_some() {
                return Err(already_purchased(&rid));
            }
            sqlx::query(
                "INSERT INTO report_purchases (id, report_id, user_id, amount_cents, payment_status, \
                 payment_method, transaction_id, created_at, completed_at) \
                 VALUES (?, ?, ?, ?, ?, 'credit_card', ?, ?, ?)",
            )
            .bind(&pid)
            .bind(&rid)
            .bind(&user_id)
            .bind(amount)
            .bind(PaymentStatus::Completed.as_str())
            .bind(format!("TXN{now}"))
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|err| AppError::from(err).on_unique_violation(|| already_purchased(&rid)))?;
            let flipped = sqlx::query(
                "UPDATE vehicle_reports SET is_paid = 1, updated_at = ? WHERE id = ? AND is_paid = 0",
            )
            .bind(now)
            .bind(&rid)
            .execute(&mut **tx)
            .await?;
            if flipped.rows_affected() == 0 {
                return Err(already_purchased(&rid));
            }
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(
        target: "autosentinel",
        event = "report_purchased",
        report_id = %report.id,
        purchase_id = %purchase_id,
        amount_cents = amount
    );
    audit::record(
        pool,
        AuditEntry::new(AuditAction::Export, "VehicleReport")
            .by(Some(actor))
            .resource(&report.id)
            .vehicle(&report.vehicle_id)
            .metadata(json!({ "purchase_id": purchase_id, "amount_cents": amount })),
        ctx,
    )
    .await;

    purchase_for(pool, &report.id)
        .await?
        .ok_or_else(|| AppError::not_found("PURCHASE", "Purchase not found"))
}

/// Mark a completed purchase refunded and lock the report again.
pub async fn refund(
    pool: &SqlitePool,
    actor: &User,
    report_id: &str,
    ctx: &RequestContext,
) -> AppResult<ReportPurchase> {
    actor.role.require(Capability::FullAccess)?;
    let report = get(pool, report_id).await?;
    let existing = purchase_for(pool, &report.id)
        .await?
        .ok_or_else(|| AppError::not_found("PURCHASE", "Purchase not found"))?;
    if existing.payment_status != PaymentStatus::Completed {
        return Err(AppError::conflict("PAYMENT_STATE", "Only completed purchases can be refunded")
            .with_context("payment_status", existing.payment_status.as_str()));
    }

    let rid = report.id.clone();
    let pid = existing.id.clone();
    run_in_tx(pool, move |tx| {
        async move {
            let now = now_ms();
            sqlx::query("UPDATE report_purchases SET payment_status = ? WHERE id = ?")
                .bind(PaymentStatus::Refunded.as_str())
                .bind(&pid)
                .execute(&mut **tx)
                .await?;
            sqlx::query("UPDATE vehicle_reports SET is_paid = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(&rid)
                .execute(&mut **tx)
                .await?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;

    audit::record(
        pool,
        AuditEntry::new(AuditAction::Update, "ReportPurchase")
            .by(Some(actor))
            .resource(&existing.id)
            .vehicle(&report.vehicle_id)
            .field("payment_status"),
        ctx,
    )
    .await;
    tracing::info!(target: "autosentinel", event = "report_refunded", report_id = %report.id);
    purchase_for(pool, &report.id)
        .await?
        .ok_or_else(|| AppError::not_found("PURCHASE", "Purchase not found"))
}

pub async fn count_purchases_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM report_purchases WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?,
    )
}

pub async fn count_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_reports WHERE requested_by = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?,
    )
}
