//! Vehicle rows: creation, lookup by VIN, listing and the detail views.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::audit::{self, AuditEntry};
use crate::history;
use crate::id::new_uuid_v7;
use crate::model::{
    decode_enum, AccidentRecord, AuditAction, MileageRecord, OwnershipRecord, Registration,
    RequestContext, TheftRecord, TitleEvent, TitleStatus, User, Vehicle, VEHICLE_NOT_FOUND,
};
use crate::pagination::{Page, PageWindow};
use crate::role::Capability;
use crate::time::now_ms;
use crate::vin::Vin;
use crate::{AppError, AppResult};

pub(crate) const VEHICLE_COLUMNS: &str = "id, vin, make, model, year, trim, body_style, color, \
     engine, transmission, drivetrain, fuel_type, displacement, cylinders, manufacture_country, \
     manufacture_plant, manufacture_date, current_mileage, current_title_status, is_stolen, \
     current_owner_count, consenting_for_tracking, tracking_consent_date, created_at, updated_at, \
     last_reported_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewVehicle {
    pub vin: Vin,
    pub make: String,
    pub model: String,
    pub year: i64,
    #[serde(default)]
    pub trim: Option<String>,
    #[serde(default)]
    pub body_style: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub transmission: Option<String>,
    #[serde(default)]
    pub drivetrain: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub displacement: Option<f64>,
    #[serde(default)]
    pub cylinders: Option<i64>,
    #[serde(default)]
    pub manufacture_country: Option<String>,
    #[serde(default)]
    pub manufacture_plant: Option<String>,
    #[serde(default)]
    pub manufacture_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub current_mileage: i64,
    #[serde(default)]
    pub current_title_status: Option<TitleStatus>,
    #[serde(default)]
    pub consenting_for_tracking: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleFilter {
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleListing {
    pub vehicles: Page<Vehicle>,
    pub makes: Vec<String>,
    pub years: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleDetail {
    pub vehicle: Vehicle,
    pub registrations: Vec<Registration>,
    pub title_events: Vec<TitleEvent>,
    pub accidents: Vec<AccidentRecord>,
    pub mileage_records: Vec<MileageRecord>,
    /// `None` while the vehicle does not consent to tracking.
    pub ownership_records: Option<Vec<OwnershipRecord>>,
    pub theft_records: Vec<TheftRecord>,
    pub has_accidents: bool,
    pub has_theft: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleHistory {
    pub vehicle: Vehicle,
    pub title_events: Vec<TitleEvent>,
    pub accidents: Vec<AccidentRecord>,
    pub mileage_records: Vec<MileageRecord>,
}

fn flag(row: &SqliteRow, column: &str) -> Result<bool, sqlx::Error> {
    Ok(row.try_get::<i64, _>(column)? != 0)
}

pub(crate) fn decode_vehicle(row: &SqliteRow) -> AppResult<Vehicle> {
    let status: String = row.try_get("current_title_status")?;
    Ok(Vehicle {
        id: row.try_get("id")?,
        vin: row.try_get("vin")?,
        make: row.try_get("make")?,
        model: row.try_get("model")?,
        year: row.try_get("year")?,
        trim: row.try_get("trim")?,
        body_style: row.try_get("body_style")?,
        color: row.try_get("color")?,
        engine: row.try_get("engine")?,
        transmission: row.try_get("transmission")?,
        drivetrain: row.try_get("drivetrain")?,
        fuel_type: row.try_get("fuel_type")?,
        displacement: row.try_get("displacement")?,
        cylinders: row.try_get("cylinders")?,
        manufacture_country: row.try_get("manufacture_country")?,
        manufacture_plant: row.try_get("manufacture_plant")?,
        manufacture_date: row.try_get("manufacture_date")?,
        current_mileage: row.try_get("current_mileage")?,
        current_title_status: decode_enum("current_title_status", &status)?,
        is_stolen: flag(row, "is_stolen")?,
        current_owner_count: row.try_get("current_owner_count")?,
        consenting_for_tracking: flag(row, "consenting_for_tracking")?,
        tracking_consent_date: row.try_get("tracking_consent_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_reported_at: row.try_get("last_reported_at")?,
    })
}

fn not_found(vin: &str) -> AppError {
    AppError::not_found("VEHICLE", VEHICLE_NOT_FOUND).with_context("vin", vin.to_string())
}

pub async fn find_by_vin(pool: &SqlitePool, vin: &Vin) -> AppResult<Option<Vehicle>> {
    let sql = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE vin = ?");
    let row = sqlx::query(&sql)
        .bind(vin.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(decode_vehicle).transpose()
}

pub async fn get_by_vin(pool: &SqlitePool, vin: &Vin) -> AppResult<Vehicle> {
    find_by_vin(pool, vin)
        .await?
        .ok_or_else(|| not_found(vin.as_str()))
}

pub async fn get_by_id(pool: &SqlitePool, id: &str) -> AppResult<Vehicle> {
    let sql = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("VEHICLE", VEHICLE_NOT_FOUND).with_context("id", id.to_string()))?;
    decode_vehicle(&row)
}

#[allow(clippy::result_large_err)]
fn validate_new(input: &NewVehicle) -> AppResult<()> {
    if input.make.trim().is_empty() || input.model.trim().is_empty() {
        return Err(AppError::validation("VEHICLE", "Make and model are required"));
    }
    if !(1900..=2100).contains(&input.year) {
        return Err(AppError::validation("YEAR", "Year must be between 1900 and 2100")
            .with_context("year", input.year.to_string()));
    }
    if input.current_mileage < 0 {
        return Err(AppError::validation("MILEAGE", "Mileage cannot be negative"));
    }
    Ok(())
}

pub async fn create(
    pool: &SqlitePool,
    actor: &User,
    input: NewVehicle,
    ctx: &RequestContext,
) -> AppResult<Vehicle> {
    actor.role.require(Capability::ManageFleet)?;
    validate_new(&input)?;

    let id = new_uuid_v7();
    let now = now_ms();
    let status = input.current_title_status.unwrap_or(TitleStatus::Clean);
    sqlx::query(
        "INSERT INTO vehicles (id, vin, make, model, year, trim, body_style, color, engine, \
         transmission, drivetrain, fuel_type, displacement, cylinders, manufacture_country, \
         manufacture_plant, manufacture_date, current_mileage, current_title_status, is_stolen, \
         current_owner_count, consenting_for_tracking, tracking_consent_date, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(input.vin.as_str())
    .bind(input.make.trim())
    .bind(input.model.trim())
    .bind(input.year)
    .bind(&input.trim)
    .bind(&input.body_style)
    .bind(&input.color)
    .bind(&input.engine)
    .bind(&input.transmission)
    .bind(&input.drivetrain)
    .bind(&input.fuel_type)
    .bind(input.displacement)
    .bind(input.cylinders)
    .bind(&input.manufacture_country)
    .bind(&input.manufacture_plant)
    .bind(input.manufacture_date.map(|d| d.to_string()))
    .bind(input.current_mileage)
    .bind(status.as_str())
    .bind(i64::from(input.consenting_for_tracking))
    .bind(input.consenting_for_tracking.then_some(now))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| {
        AppError::from(err).on_unique_violation(|| {
            AppError::conflict("VIN", "A vehicle with this VIN already exists")
                .with_context("vin", input.vin.to_string())
        })
    })?;

    audit::record(
        pool,
        AuditEntry::new(AuditAction::Create, "Vehicle")
            .by(Some(actor))
            .resource(&id)
            .vehicle(&id),
        ctx,
    )
    .await;
    tracing::info!(target: "autosentinel", event = "vehicle_created", vehicle_id = %id, vin = %input.vin);
    get_by_id(pool, &id).await
}

/// Grant or withdraw tracking consent for a vehicle.
pub async fn set_tracking_consent(
    pool: &SqlitePool,
    actor: &User,
    vin: &Vin,
    consent: bool,
    ctx: &RequestContext,
) -> AppResult<Vehicle> {
    actor.role.require(Capability::ManageFleet)?;
    let vehicle = get_by_vin(pool, vin).await?;
    let now = now_ms();
    sqlx::query(
        "UPDATE vehicles SET consenting_for_tracking = ?, tracking_consent_date = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(i64::from(consent))
    .bind(consent.then_some(now))
    .bind(now)
    .bind(&vehicle.id)
    .execute(pool)
    .await?;
    audit::record(
        pool,
        AuditEntry::new(AuditAction::Update, "Vehicle")
            .by(Some(actor))
            .resource(&vehicle.id)
            .vehicle(&vehicle.id)
            .field("consenting_for_tracking"),
        ctx,
    )
    .await;
    get_by_id(pool, &vehicle.id).await
}

/// Newest first with exact-match filters, plus the facet values for the
/// filter controls.
pub async fn list(
    pool: &SqlitePool,
    filter: &VehicleFilter,
    requested_page: u32,
    per_page: u32,
) -> AppResult<VehicleListing> {
    let make = filter.make.as_deref().filter(|m| !m.is_empty());
    let year = match filter.year.as_deref().filter(|y| !y.is_empty()) {
        Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
            AppError::validation("YEAR", "Year must be a number").with_context("year", raw.to_string())
        })?),
        None => None,
    };
    let status = match filter.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<TitleStatus>()?),
        None => None,
    };

    let where_clause = "WHERE (?1 IS NULL OR make = ?1) AND (?2 IS NULL OR year = ?2) \
                        AND (?3 IS NULL OR current_title_status = ?3)";
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM vehicles {where_clause}"))
        .bind(make)
        .bind(year)
        .bind(status.map(TitleStatus::as_str))
        .fetch_one(pool)
        .await?;
    let window = PageWindow::resolve(requested_page, per_page, total);
    let rows = sqlx::query(&format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles {where_clause} \
         ORDER BY created_at DESC, id DESC LIMIT ?4 OFFSET ?5"
    ))
    .bind(make)
    .bind(year)
    .bind(status.map(TitleStatus::as_str))
    .bind(window.limit())
    .bind(window.offset())
    .fetch_all(pool)
    .await?;
    let vehicles = rows.iter().map(decode_vehicle).collect::<AppResult<Vec<_>>>()?;

    let makes: Vec<String> = sqlx::query_scalar("SELECT DISTINCT make FROM vehicles ORDER BY make")
        .fetch_all(pool)
        .await?;
    let years: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT year FROM vehicles ORDER BY year DESC")
        .fetch_all(pool)
        .await?;

    Ok(VehicleListing {
        vehicles: window.into_page(vehicles),
        makes,
        years,
    })
}

/// Detail view. Writes a `view` audit row for every lookup that resolves.
pub async fn detail(
    pool: &SqlitePool,
    vin: &Vin,
    viewer: Option<&User>,
    ctx: &RequestContext,
) -> AppResult<VehicleDetail> {
    let vehicle = get_by_vin(pool, vin).await?;

    audit::record(
        pool,
        AuditEntry::new(AuditAction::View, "Vehicle")
            .by(viewer)
            .resource(&vehicle.id)
            .vehicle(&vehicle.id),
        ctx,
    )
    .await;

    let registrations = history::registrations(pool, &vehicle.id).await?;
    let title_events = history::title_events(pool, &vehicle.id, Some(10)).await?;
    let accidents = history::accidents(pool, &vehicle.id, Some(10)).await?;
    let mileage_records = history::mileage(pool, &vehicle.id, Some(20)).await?;
    let ownership_records = history::visible_ownership(pool, &vehicle).await?;
    let theft_records = history::thefts(pool, &vehicle.id).await?;

    Ok(VehicleDetail {
        has_accidents: !accidents.is_empty(),
        has_theft: !theft_records.is_empty(),
        vehicle,
        registrations,
        title_events,
        accidents,
        mileage_records,
        ownership_records,
        theft_records,
    })
}

pub async fn full_history(pool: &SqlitePool, vin: &Vin) -> AppResult<VehicleHistory> {
    let vehicle = get_by_vin(pool, vin).await?;
    Ok(VehicleHistory {
        title_events: history::title_events(pool, &vehicle.id, None).await?,
        accidents: history::accidents(pool, &vehicle.id, None).await?,
        mileage_records: history::mileage(pool, &vehicle.id, None).await?,
        vehicle,
    })
}

/// Stolen vehicles, most recently updated first.
pub async fn stolen(pool: &SqlitePool) -> AppResult<Vec<Vehicle>> {
    let sql = format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE is_stolen = 1 ORDER BY updated_at DESC, id DESC"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(decode_vehicle).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, NewAccount, RegistrationOrigin};
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;

    async fn setup() -> (SqlitePool, User) {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        let fleet = register(
            &pool,
            NewAccount {
                username: "fleet".into(),
                password: "pw".into(),
                role: Some("fleet_admin".into()),
                ..Default::default()
            },
            RegistrationOrigin::SelfService,
            10,
        )
        .await
        .unwrap();
        (pool, fleet)
    }

    fn new_vehicle(vin: &str, make: &str, year: i64) -> NewVehicle {
        serde_json::from_value(serde_json::json!({
            "vin": vin,
            "make": make,
            "model": "Model",
            "year": year,
            "current_mileage": 1000
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_requires_fleet_capability_and_unique_vin() {
        let (pool, fleet) = setup().await;
        let ctx = RequestContext::default();
        let vehicle = create(&pool, &fleet, new_vehicle("1HGCM82633A004352", "Honda", 2003), &ctx)
            .await
            .unwrap();
        assert_eq!(vehicle.current_title_status, TitleStatus::Clean);
        assert!(!vehicle.consenting_for_tracking);

        let err = create(&pool, &fleet, new_vehicle("1HGCM82633A004352", "Honda", 2003), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT/VIN");

        let mut guest = fleet.clone();
        guest.role = crate::role::Role::Guest;
        let err = create(&pool, &guest, new_vehicle("2HGCM82633A004352", "Honda", 2003), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/CAPABILITY");
    }

    #[tokio::test]
    async fn list_filters_and_facets() {
        let (pool, fleet) = setup().await;
        let ctx = RequestContext::default();
        for (vin, make, year) in [
            ("1HGCM82633A000001", "Honda", 2003),
            ("1HGCM82633A000002", "Toyota", 2010),
            ("1HGCM82633A000003", "Honda", 2010),
        ] {
            create(&pool, &fleet, new_vehicle(vin, make, year), &ctx).await.unwrap();
        }

        let all = list(&pool, &VehicleFilter::default(), 1, 24).await.unwrap();
        assert_eq!(all.vehicles.total, 3);
        assert_eq!(all.makes, vec!["Honda".to_string(), "Toyota".to_string()]);
        assert_eq!(all.years, vec![2010, 2003]);

        let hondas_2010 = list(
            &pool,
            &VehicleFilter {
                make: Some("Honda".into()),
                year: Some("2010".into()),
                status: None,
            },
            1,
            24,
        )
        .await
        .unwrap();
        assert_eq!(hondas_2010.vehicles.total, 1);

        let err = list(
            &pool,
            &VehicleFilter {
                status: Some("shiny".into()),
                ..Default::default()
            },
            1,
            24,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION/TITLE_STATUS");
    }

    #[tokio::test]
    async fn detail_writes_view_audit_row() {
        let (pool, fleet) = setup().await;
        let ctx = RequestContext {
            ip_address: Some("127.0.0.1".into()),
            user_agent: None,
        };
        let vehicle = create(&pool, &fleet, new_vehicle("1HGCM82633A004352", "Honda", 2003), &ctx)
            .await
            .unwrap();
        let vin = Vin::parse("1HGCM82633A004352").unwrap();
        let detail = detail(&pool, &vin, None, &ctx).await.unwrap();
        assert!(!detail.has_accidents);
        assert!(!detail.has_theft);
        assert!(detail.ownership_records.is_none());

        set_tracking_consent(&pool, &fleet, &vin, true, &ctx).await.unwrap();
        let consented = super::detail(&pool, &vin, None, &ctx).await.unwrap();
        assert_eq!(consented.ownership_records.map(|o| o.len()), Some(0));

        let views: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE action = 'view' AND vehicle_id = ? AND user_id IS NULL",
        )
        .bind(&vehicle.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(views, 1);

        let missing = Vin::parse("ZZZZZZZZZZZZZZZZZ").unwrap();
        let err = super::detail(&pool, &missing, None, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND/VEHICLE");
        assert_eq!(err.message(), VEHICLE_NOT_FOUND);
    }
}
