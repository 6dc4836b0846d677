//! Route table. Page routes keep their trailing slash.

pub mod accounts;
pub mod admin;
pub mod api;
pub mod crowdsourced;
pub mod pages;
pub mod reports;
pub mod search;
pub mod vehicles;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Public pages
        .route("/", get(pages::home))
        .route("/about/", get(pages::about))
        .route("/pricing/", get(pages::pricing))
        .route("/statistics/", get(pages::statistics))
        // Accounts
        .route("/register/", post(accounts::register))
        .route("/login/", post(accounts::login))
        .route("/logout/", post(accounts::logout))
        .route("/profile/", get(accounts::profile).post(accounts::update_profile))
        .route("/profile/consent/", post(accounts::record_consent))
        // Search
        .route("/search/", get(search::form))
        .route("/search/results/", get(search::results))
        .route("/search/bulk/", post(search::bulk))
        // Vehicles and history feeds
        .route("/vehicles/", get(vehicles::list).post(vehicles::create))
        .route("/vehicles/:vin/", get(vehicles::detail))
        .route("/vehicles/:vin/history/", get(vehicles::history))
        .route("/vehicles/:vin/tracking/", get(vehicles::tracking))
        .route("/vehicles/:vin/tracking/consent/", post(vehicles::set_tracking_consent))
        .route("/vehicles/:vin/telemetry/", post(vehicles::append_telemetry))
        .route("/vehicles/:vin/registrations/", post(vehicles::add_registration))
        .route("/vehicles/:vin/title-events/", post(vehicles::add_title_event))
        .route("/vehicles/:vin/accidents/", post(vehicles::add_accident))
        .route("/vehicles/:vin/mileage/", post(vehicles::add_mileage))
        .route("/vehicles/:vin/ownership/", post(vehicles::add_ownership))
        .route("/vehicles/:vin/thefts/", post(vehicles::report_theft))
        .route("/thefts/:id/recover/", post(vehicles::recover_theft))
        // Reports
        .route("/vehicles/:vin/generate-report/", post(reports::generate))
        .route("/reports/", get(reports::list))
        .route("/reports/:id/", get(reports::detail))
        .route("/reports/:id/purchase/", post(reports::purchase))
        .route("/reports/:id/refund/", post(reports::refund))
        // Crowdsourced observations
        .route(
            "/vehicles/:vin/submit-report/",
            get(crowdsourced::submit_form).post(crowdsourced::submit),
        )
        .route("/crowdsourced-reports/", get(crowdsourced::list))
        // Dashboards and administration
        .route("/dashboard/", get(admin::dashboard))
        .route("/admin-dashboard/", get(admin::admin_dashboard))
        .route("/admin/audit-logs/", get(admin::audit_logs))
        .route("/admin/stolen-vehicles/", get(vehicles::stolen))
        .route(
            "/admin/verify-report/:id/",
            get(crowdsourced::review).post(crowdsourced::moderate),
        )
        .route("/admin/users/:id/verify/", post(accounts::verify_user))
        .route(
            "/admin/providers/",
            get(admin::list_providers).post(admin::create_provider),
        )
        .route("/admin/providers/:id/feeds/", get(admin::provider_feeds))
        // JSON API
        .route("/api/vehicle/:vin/", get(api::vehicle_lookup))
        .route("/api/vehicle/:vin/telemetry/", get(api::telemetry_data))
        .with_state(state)
}
