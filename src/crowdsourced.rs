//! User-submitted observations about a vehicle and their moderation.

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::audit::{self, AuditEntry};
use crate::id::new_uuid_v7;
use crate::model::{
    decode_enum, AuditAction, CrowdsourcedReport, CrowdsourcedStatus, CrowdsourcedType,
    RequestContext, User,
};
use crate::pagination::{Page, PageWindow};
use crate::time::now_ms;
use crate::vehicles;
use crate::vin::Vin;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct NewCrowdsourcedReport {
    pub report_type: CrowdsourcedType,
    pub report_date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub location_city: Option<String>,
    #[serde(default)]
    pub location_state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moderation {
    Verify,
    Reject,
    Duplicate,
}

impl std::str::FromStr for Moderation {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "verify" => Ok(Moderation::Verify),
            "reject" => Ok(Moderation::Reject),
            "duplicate" => Ok(Moderation::Duplicate),
            other => Err(AppError::validation("MODERATION_ACTION", "Unknown moderation action")
                .with_context("action", other.to_string())),
        }
    }
}

impl Moderation {
    fn outcome(self) -> CrowdsourcedStatus {
        match self {
            Moderation::Verify => CrowdsourcedStatus::Verified,
            Moderation::Reject => CrowdsourcedStatus::Rejected,
            Moderation::Duplicate => CrowdsourcedStatus::Duplicate,
        }
    }
}

const SELECT: &str = "SELECT c.id, c.vehicle_id, v.vin, c.submitted_by, u.username AS submitted_by_username, \
     c.report_type, c.status, c.report_date, c.description, c.location_city, c.location_state, \
     c.verified_by, c.verified_at, c.created_at, c.updated_at \
     FROM crowdsourced_reports c JOIN vehicles v ON v.id = c.vehicle_id \
     LEFT JOIN users u ON u.id = c.submitted_by";

fn decode(row: &SqliteRow) -> AppResult<CrowdsourcedReport> {
    let report_type: String = row.try_get("report_type")?;
    let status: String = row.try_get("status")?;
    Ok(CrowdsourcedReport {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        vin: row.try_get("vin")?,
        submitted_by: row.try_get("submitted_by")?,
        submitted_by_username: row.try_get("submitted_by_username")?,
        report_type: decode_enum("report_type", &report_type)?,
        status: decode_enum("status", &status)?,
        report_date: row.try_get("report_date")?,
        description: row.try_get("description")?,
        location_city: row.try_get("location_city")?,
        location_state: row.try_get("location_state")?,
        verified_by: row.try_get("verified_by")?,
        verified_at: row.try_get("verified_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<CrowdsourcedReport> {
    let row = sqlx::query(&format!("{SELECT} WHERE c.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::not_found("CROWDSOURCED", "Report not found").with_context("id", id.to_string())
        })?;
    decode(&row)
}

/// New submissions always start `pending`.
pub async fn submit(
    pool: &SqlitePool,
    author: &User,
    vin: &Vin,
    input: NewCrowdsourcedReport,
    ctx: &RequestContext,
) -> AppResult<CrowdsourcedReport> {
    let vehicle = vehicles::get_by_vin(pool, vin).await?;
    let description = input.description.trim();
    if description.is_empty() {
        return Err(AppError::validation("REQUIRED", "description is required")
            .with_context("field", "description"));
    }
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO crowdsourced_reports (id, vehicle_id, submitted_by, report_type, status, \
         report_date, description, location_city, location_state, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&vehicle.id)
    .bind(&author.id)
    .bind(input.report_type.as_str())
    .bind(CrowdsourcedStatus::Pending.as_str())
    .bind(input.report_date.to_string())
    .bind(description)
    .bind(&input.location_city)
    .bind(&input.location_state)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    audit::record(
        pool,
        AuditEntry::new(AuditAction::Create, "CrowdsourcedReport")
            .by(Some(author))
            .resource(&id)
            .vehicle(&vehicle.id),
        ctx,
    )
    .await;
    get(pool, &id).await
}

/// Newest first, optionally narrowed to one status.
pub async fn list(
    pool: &SqlitePool,
    status: Option<&str>,
    requested_page: u32,
    per_page: u32,
) -> AppResult<Page<CrowdsourcedReport>> {
    let status = match status.filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<CrowdsourcedStatus>()?),
        None => None,
    };
    let status = status.map(CrowdsourcedStatus::as_str);
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM crowdsourced_reports WHERE (?1 IS NULL OR status = ?1)")
            .bind(status)
            .fetch_one(pool)
            .await?;
    let window = PageWindow::resolve(requested_page, per_page, total);
    let rows = sqlx::query(&format!(
        "{SELECT} WHERE (?1 IS NULL OR c.status = ?1) ORDER BY c.created_at DESC, c.id DESC \
         LIMIT ?2 OFFSET ?3"
    ))
    .bind(status)
    .bind(window.limit())
    .bind(window.offset())
    .fetch_all(pool)
    .await?;
    let items = rows.iter().map(decode).collect::<AppResult<Vec<_>>>()?;
    Ok(window.into_page(items))
}

/// Admin moderation. Verifying stamps the moderator and time.
pub async fn moderate(
    pool: &SqlitePool,
    moderator: &User,
    id: &str,
    action: &str,
    ctx: &RequestContext,
) -> AppResult<CrowdsourcedReport> {
    moderator.role.require_admin()?;
    let action = action.parse::<Moderation>()?;
    let report = get(pool, id).await?;
    let now = now_ms();
    let verified = action == Moderation::Verify;
    sqlx::query(
        "UPDATE crowdsourced_reports SET status = ?, \
         verified_by = CASE WHEN ? THEN ? ELSE verified_by END, \
         verified_at = CASE WHEN ? THEN ? ELSE verified_at END, updated_at = ? WHERE id = ?",
    )
    .bind(action.outcome().as_str())
    .bind(verified)
    .bind(&moderator.id)
    .bind(verified)
    .bind(now)
    .bind(now)
    .bind(&report.id)
    .execute(pool)
    .await?;
    tracing::info!(
        target: "autosentinel",
        event = "crowdsourced_moderated",
        report_id = %report.id,
        status = action.outcome().as_str()
    );
    audit::record(
        pool,
        AuditEntry::new(AuditAction::Update, "CrowdsourcedReport")
            .by(Some(moderator))
            .resource(&report.id)
            .vehicle(&report.vehicle_id)
            .field("status"),
        ctx,
    )
    .await;
    get(pool, &report.id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, NewAccount, RegistrationOrigin};
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;
    use crate::vehicles::NewVehicle;

    async fn account(pool: &SqlitePool, name: &str, role: &str) -> User {
        register(
            pool,
            NewAccount {
                username: name.into(),
                password: "pw".into(),
                role: Some(role.into()),
                ..Default::default()
            },
            RegistrationOrigin::Operator,
            10,
        )
        .await
        .unwrap()
    }

    async fn setup() -> (SqlitePool, User, Vin) {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        let fleet = account(&pool, "fleet", "fleet_admin").await;
        let input: NewVehicle = serde_json::from_value(serde_json::json!({
            "vin": "1HGCM82633A004352", "make": "Honda", "model": "Accord", "year": 2003
        }))
        .unwrap();
        vehicles::create(&pool, &fleet, input, &RequestContext::default())
            .await
            .unwrap();
        let guest = account(&pool, "spotter", "guest").await;
        (pool, guest, Vin::parse("1HGCM82633A004352").unwrap())
    }

    fn sighting() -> NewCrowdsourcedReport {
        NewCrowdsourcedReport {
            report_type: CrowdsourcedType::Sighting,
            report_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: "Parked outside the library".into(),
            location_city: Some("Austin".into()),
            location_state: Some("TX".into()),
        }
    }

    #[tokio::test]
    async fn submissions_start_pending_and_filter_by_status() {
        let (pool, guest, vin) = setup().await;
        let ctx = RequestContext::default();
        let report = submit(&pool, &guest, &vin, sighting(), &ctx).await.unwrap();
        assert_eq!(report.status, CrowdsourcedStatus::Pending);
        assert_eq!(report.submitted_by_username.as_deref(), Some("spotter"));
        assert_eq!(report.vin, "1HGCM82633A004352");

        assert_eq!(list(&pool, Some("pending"), 1, 20).await.unwrap().total, 1);
        assert_eq!(list(&pool, Some("verified"), 1, 20).await.unwrap().total, 0);
        assert_eq!(list(&pool, None, 1, 20).await.unwrap().total, 1);
        let err = list(&pool, Some("lost"), 1, 20).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION/CROWDSOURCED_STATUS");
    }

    #[tokio::test]
    async fn moderation_is_admin_only_and_stamps_verifier() {
        let (pool, guest, vin) = setup().await;
        let auditor = account(&pool, "auditor", "auditor").await;
        let ctx = RequestContext::default();
        let report = submit(&pool, &guest, &vin, sighting(), &ctx).await.unwrap();

        let err = moderate(&pool, &guest, &report.id, "verify", &ctx).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/ADMIN");
        let err = moderate(&pool, &auditor, &report.id, "promote", &ctx).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION/MODERATION_ACTION");

        let verified = moderate(&pool, &auditor, &report.id, "verify", &ctx).await.unwrap();
        assert_eq!(verified.status, CrowdsourcedStatus::Verified);
        assert_eq!(verified.verified_by.as_deref(), Some(auditor.id.as_str()));
        assert!(verified.verified_at.is_some());

        let second = submit(&pool, &guest, &vin, sighting(), &ctx).await.unwrap();
        let dup = moderate(&pool, &auditor, &second.id, "duplicate", &ctx).await.unwrap();
        assert_eq!(dup.status, CrowdsourcedStatus::Duplicate);
        assert!(dup.verified_by.is_none());
    }

    #[tokio::test]
    async fn blank_description_is_rejected() {
        let (pool, guest, vin) = setup().await;
        let mut input = sighting();
        input.description = "  ".into();
        let err = submit(&pool, &guest, &vin, input, &RequestContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION/REQUIRED");
    }
}
