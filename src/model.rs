//! Row types and closed vocabularies shared by the repositories and the HTTP
//! layer. Every enum is stored as its snake_case string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::role::Role;
use crate::AppError;

pub const GENERIC_FAIL: &str = "GENERIC/FAIL";
pub const GENERIC_FAIL_MESSAGE: &str = "Something went wrong, please try again.";

pub const VEHICLE_NOT_FOUND: &str = "Vehicle not found";
pub const REPORT_NOT_FOUND: &str = "Report not found";
pub const TRACKING_NOT_ENABLED: &str = "Tracking not enabled";
pub const REPORT_ACCESS_DENIED: &str = "You do not have access to this report";

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $subject:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::validation(
                        $subject,
                        format!("Unknown {} value", stringify!($name)),
                    )
                    .with_context("value", other.to_string())),
                }
            }
        }
    };
}

string_enum! {
    /// Legal brand on a vehicle's title.
    TitleStatus, "TITLE_STATUS" {
        Clean => "clean",
        Salvage => "salvage",
        Rebuilt => "rebuilt",
        Junk => "junk",
        Flood => "flood",
        Hail => "hail",
        Lemon => "lemon",
    }
}

string_enum! {
    TitleEventType, "TITLE_EVENT_TYPE" {
        Initial => "initial",
        Transfer => "transfer",
        BrandChange => "brand_change",
        Duplicate => "duplicate",
        LienAdd => "lien_add",
        LienRelease => "lien_release",
    }
}

string_enum! {
    Severity, "SEVERITY" {
        Minor => "minor",
        Moderate => "moderate",
        Severe => "severe",
        TotalLoss => "total_loss",
    }
}

string_enum! {
    AccidentSource, "ACCIDENT_SOURCE" {
        Insurance => "insurance",
        Police => "police",
        RepairShop => "repair_shop",
        Crowdsourced => "crowdsourced",
    }
}

string_enum! {
    MileageSource, "MILEAGE_SOURCE" {
        Dmv => "dmv",
        Inspection => "inspection",
        Service => "service",
        Dealer => "dealer",
        Insurance => "insurance",
        Sale => "sale",
        Crowdsourced => "crowdsourced",
    }
}

string_enum! {
    OwnerType, "OWNER_TYPE" {
        Individual => "individual",
        Fleet => "fleet",
        Rental => "rental",
        Lease => "lease",
        Government => "government",
        Dealer => "dealer",
    }
}

string_enum! {
    TheftStatus, "THEFT_STATUS" {
        Reported => "reported",
        Recovered => "recovered",
        Closed => "closed",
    }
}

string_enum! {
    CrowdsourcedType, "CROWDSOURCED_TYPE" {
        Sighting => "sighting",
        Condition => "condition",
        Maintenance => "maintenance",
        Accident => "accident",
        Theft => "theft",
        ForSale => "for_sale",
        Other => "other",
    }
}

string_enum! {
    CrowdsourcedStatus, "CROWDSOURCED_STATUS" {
        Pending => "pending",
        Verified => "verified",
        Rejected => "rejected",
        Duplicate => "duplicate",
    }
}

string_enum! {
    /// `pending -> processing -> completed | failed`.
    ReportStatus, "REPORT_STATUS" {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl ReportStatus {
    pub fn can_transition_to(self, next: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Failed)
    }
}

string_enum! {
    PaymentStatus, "PAYMENT_STATUS" {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
    }
}

string_enum! {
    ProviderType, "PROVIDER_TYPE" {
        VinDecoder => "vin_decoder",
        Dmv => "dmv",
        Insurance => "insurance",
        Ncib => "ncib",
        Police => "police",
        Service => "service",
    }
}

string_enum! {
    FeedStatus, "FEED_STATUS" {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

string_enum! {
    AuditAction, "AUDIT_ACTION" {
        View => "view",
        Search => "search",
        Create => "create",
        Update => "update",
        Delete => "delete",
        Export => "export",
        AccessRestricted => "access_restricted",
    }
}

string_enum! {
    SearchType, "SEARCH_TYPE" {
        Vin => "vin",
        Plate => "plate",
        MakeModel => "make_model",
    }
}

/// Account as exposed to callers. The password hash never leaves the
/// accounts module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub phone_number: Option<String>,
    pub company_name: Option<String>,
    pub verified_at: Option<i64>,
    pub consent_to_data_usage: bool,
    pub consent_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: String,
    pub vin: String,
    pub make: String,
    pub model: String,
    pub year: i64,
    pub trim: Option<String>,
    pub body_style: Option<String>,
    pub color: Option<String>,
    pub engine: Option<String>,
    pub transmission: Option<String>,
    pub drivetrain: Option<String>,
    pub fuel_type: Option<String>,
    pub displacement: Option<f64>,
    pub cylinders: Option<i64>,
    pub manufacture_country: Option<String>,
    pub manufacture_plant: Option<String>,
    pub manufacture_date: Option<String>,
    pub current_mileage: i64,
    pub current_title_status: TitleStatus,
    pub is_stolen: bool,
    pub current_owner_count: i64,
    pub consenting_for_tracking: bool,
    pub tracking_consent_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_reported_at: Option<i64>,
}

/// Flat lookup shape served by `/api/vehicle/{vin}/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSummary {
    pub vin: String,
    pub make: String,
    pub model: String,
    pub year: i64,
    pub title_status: TitleStatus,
    pub mileage: i64,
    pub is_stolen: bool,
}

impl From<&Vehicle> for VehicleSummary {
    fn from(vehicle: &Vehicle) -> Self {
        VehicleSummary {
            vin: vehicle.vin.clone(),
            make: vehicle.make.clone(),
            model: vehicle.model.clone(),
            year: vehicle.year,
            title_status: vehicle.current_title_status,
            mileage: vehicle.current_mileage,
            is_stolen: vehicle.is_stolen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub id: String,
    pub vehicle_id: String,
    pub plate_number: String,
    pub state: String,
    pub country: String,
    pub issued_date: String,
    pub expiry_date: Option<String>,
    pub is_current: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleEvent {
    pub id: String,
    pub vehicle_id: String,
    pub event_type: TitleEventType,
    pub event_date: String,
    pub title_status: TitleStatus,
    pub state: String,
    pub title_number: Option<String>,
    pub odometer_reading: Option<i64>,
    pub odometer_unit: String,
    pub notes: Option<String>,
    pub source: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccidentRecord {
    pub id: String,
    pub vehicle_id: String,
    pub accident_date: String,
    pub severity: Severity,
    pub source: AccidentSource,
    pub damage_description: Option<String>,
    pub estimated_damage_cost_cents: Option<i64>,
    pub location_city: Option<String>,
    pub location_state: Option<String>,
    pub airbag_deployed: bool,
    pub is_structural_damage: bool,
    pub report_number: Option<String>,
    pub verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MileageRecord {
    pub id: String,
    pub vehicle_id: String,
    pub recorded_date: String,
    pub mileage: i64,
    pub unit: String,
    pub source: MileageSource,
    pub source_detail: Option<String>,
    pub is_rollback_suspected: bool,
    pub verified: bool,
    pub created_at: i64,
}

/// `owner_hash` is cleared before serialization unless both the vehicle and
/// this owner consented to tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipRecord {
    pub id: String,
    pub vehicle_id: String,
    pub owner_sequence: i64,
    pub owner_type: OwnerType,
    pub ownership_start: String,
    pub ownership_end: Option<String>,
    pub is_current: bool,
    pub state: Option<String>,
    pub ownership_duration_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_hash: Option<String>,
    pub consented_to_tracking: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TheftRecord {
    pub id: String,
    pub vehicle_id: String,
    pub status: TheftStatus,
    pub reported_date: String,
    pub recovered_date: Option<String>,
    pub reporting_agency: String,
    pub case_number: Option<String>,
    pub theft_location_city: Option<String>,
    pub theft_location_state: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryTrace {
    pub id: String,
    pub vehicle_id: String,
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    pub odometer: Option<i64>,
    pub device_id: Option<String>,
    pub created_at: i64,
}

/// One point of the `/api/vehicle/{vin}/telemetry/` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
}

impl From<&TelemetryTrace> for TelemetryPoint {
    fn from(trace: &TelemetryTrace) -> Self {
        TelemetryPoint {
            timestamp: crate::time::to_rfc3339(trace.timestamp),
            latitude: trace.latitude,
            longitude: trace.longitude,
            speed: trace.speed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrowdsourcedReport {
    pub id: String,
    pub vehicle_id: String,
    pub vin: String,
    pub submitted_by: Option<String>,
    pub submitted_by_username: Option<String>,
    pub report_type: CrowdsourcedType,
    pub status: CrowdsourcedStatus,
    pub report_date: String,
    pub description: String,
    pub location_city: Option<String>,
    pub location_state: Option<String>,
    pub verified_by: Option<String>,
    pub verified_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleReport {
    pub id: String,
    pub vehicle_id: String,
    pub vin: String,
    pub requested_by: Option<String>,
    pub status: ReportStatus,
    pub is_paid: bool,
    pub price_cents: i64,
    pub include_telemetry: bool,
    pub include_owner_history: bool,
    pub json_data: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub generation_started_at: Option<i64>,
    pub generation_completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPurchase {
    pub id: String,
    pub report_id: String,
    pub user_id: Option<String>,
    pub amount_cents: i64,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLog {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub field_accessed: Option<String>,
    pub vehicle_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub id: String,
    pub user_id: Option<String>,
    pub search_type: SearchType,
    pub query_text: String,
    pub vehicle_found_id: Option<String>,
    pub results_count: i64,
    pub response_time_ms: Option<i64>,
    pub cache_hit: bool,
    pub ip_address: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataProvider {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub api_endpoint: Option<String>,
    pub is_active: bool,
    pub rate_limit_per_hour: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDataFeed {
    pub id: String,
    pub provider_id: String,
    pub vehicle_id: Option<String>,
    pub status: FeedStatus,
    pub request_payload: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub requested_at: i64,
    pub completed_at: Option<i64>,
}

/// Who is calling and from where; threaded into audit and search rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Parse a stored enum column, mapping a bad value to a decode failure
/// rather than a caller validation error.
#[allow(clippy::result_large_err)]
pub(crate) fn decode_enum<T>(column: &str, value: &str) -> crate::AppResult<T>
where
    T: FromStr<Err = AppError>,
{
    value.parse::<T>().map_err(|err| {
        AppError::new("DB/DECODE", format!("Unexpected value in column {column}"))
            .with_context("column", column.to_string())
            .with_cause(err)
    })
}

/// Stored JSON text columns; malformed content decodes as absent.
pub(crate) fn decode_json(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_their_storage_strings() {
        for status in TitleStatus::ALL {
            assert_eq!(status.as_str().parse::<TitleStatus>().unwrap(), *status);
        }
        assert_eq!(Severity::TotalLoss.as_str(), "total_loss");
        assert_eq!(
            serde_json::to_value(CrowdsourcedType::ForSale).unwrap(),
            serde_json::json!("for_sale")
        );
        assert_eq!("make_model".parse::<SearchType>().unwrap(), SearchType::MakeModel);
    }

    #[test]
    fn unknown_values_are_validation_errors() {
        let err = "telepathy".parse::<SearchType>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION/SEARCH_TYPE");
        assert_eq!(err.context().get("value").map(String::as_str), Some("telepathy"));
    }

    #[test]
    fn report_status_transitions() {
        use ReportStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(Completed.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn decode_enum_reports_column() {
        let err = decode_enum::<TitleStatus>("current_title_status", "scrapped").unwrap_err();
        assert_eq!(err.code(), "DB/DECODE");
        assert_eq!(
            err.cause().map(|c| c.code().to_string()),
            Some("VALIDATION/TITLE_STATUS".to_string())
        );
    }

    #[test]
    fn telemetry_point_renders_rfc3339() {
        let trace = TelemetryTrace {
            id: "t".into(),
            vehicle_id: "v".into(),
            timestamp: 0,
            latitude: 40.5,
            longitude: -73.25,
            accuracy: None,
            speed: Some(31.0),
            heading: None,
            altitude: None,
            odometer: None,
            device_id: None,
            created_at: 0,
        };
        let point = TelemetryPoint::from(&trace);
        assert_eq!(point.timestamp, "1970-01-01T00:00:00.000Z");
        assert_eq!(point.speed, Some(31.0));
    }
}
