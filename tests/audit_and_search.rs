#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use axum::http::StatusCode;
use serde_json::json;

use util::{login_as, seed_vehicle, send, test_app, Call};

const HONDA: &str = "1HGCM82633A004352";

#[tokio::test]
async fn every_executed_search_is_logged() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, false).await;
    let buyer = login_as(&app.pool, "buyer", "verified_buyer").await;

    let (status, body) = send(&app, Call::get("/search/results/?q=a004&type=vin").token(&buyer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_results"], 1);
    assert_eq!(body["vehicles"]["items"][0]["vin"], HONDA);

    let (status, body) = send(&app, Call::get("/search/results/?q=acc&type=make_model")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_results"], 1);

    let (status, body) = send(&app, Call::get("/search/results/?q=%20%20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_results"], 0);

    let (status, _) = send(&app, Call::get("/search/results/?q=x&type=telepathy")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let rows: Vec<(Option<String>, String, i64, i64, Option<String>)> = sqlx::query_as(
        "SELECT user_id, search_type, results_count, cache_hit, ip_address \
         FROM search_queries ORDER BY search_type",
    )
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, "make_model");
    assert!(rows[0].0.is_none());
    assert_eq!(rows[1].1, "vin");
    assert!(rows[1].0.is_some());
    assert_eq!(rows[1].2, 1);
    assert_eq!(rows[1].3, 0);
    assert_eq!(rows[1].4.as_deref(), Some("198.51.100.7"));

    let (_, dashboard) = send(&app, Call::get("/dashboard/").token(&buyer)).await;
    assert_eq!(dashboard["stats"]["total_searches"], 1);
}

#[tokio::test]
async fn bulk_search_needs_the_dealer_capability() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, false).await;
    let buyer = login_as(&app.pool, "buyer", "verified_buyer").await;
    let dealer = login_as(&app.pool, "dealer", "dealer").await;
    let body = json!({ "vins": [HONDA, "2HGCM82633A004352"] });

    let (status, _) = send(&app, Call::post("/search/bulk/", body.clone()).token(&buyer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, hits) = send(&app, Call::post("/search/bulk/", body).token(&dealer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits[0]["vehicle"]["make"], "Honda");
    assert!(hits[1]["vehicle"].is_null());
}

#[tokio::test]
async fn vehicle_views_write_audit_rows() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, false).await;
    let buyer = login_as(&app.pool, "buyer", "verified_buyer").await;
    let auditor = login_as(&app.pool, "auditor", "auditor").await;

    let (status, detail) = send(&app, Call::get(&format!("/vehicles/{HONDA}/")).token(&buyer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["has_accidents"], false);
    let (status, _) = send(&app, Call::get(&format!("/vehicles/{HONDA}/"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Call::get("/admin/audit-logs/").token(&buyer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, logs) = send(&app, Call::get("/admin/audit-logs/?action=view").token(&auditor)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 2);
    let items = logs["items"].as_array().unwrap();
    assert!(items.iter().all(|row| row["resource_type"] == "Vehicle"));
    assert!(items.iter().any(|row| row["username"] == "buyer"));
    assert!(items.iter().any(|row| row["user_id"].is_null()));
    assert_eq!(items[0]["user_agent"], "integration-test");
}

#[tokio::test]
async fn history_appenders_require_fleet_management() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, false).await;
    let buyer = login_as(&app.pool, "buyer", "verified_buyer").await;
    let fleet = login_as(&app.pool, "fleet", "fleet_admin").await;
    let uri = format!("/vehicles/{HONDA}/thefts/");
    let theft = json!({
        "reported_date": "2024-05-01",
        "reporting_agency": "Austin PD",
        "case_number": "APD-1",
        "theft_location_city": "Austin",
        "theft_location_state": "TX"
    });

    let (status, _) = send(&app, Call::post(&uri, theft.clone()).token(&buyer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, record) = send(&app, Call::post(&uri, theft).token(&fleet)).await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, summary) = send(&app, Call::get(&format!("/api/vehicle/{HONDA}/"))).await;
    assert_eq!(summary["is_stolen"], true);

    let root = login_as(&app.pool, "root", "system_admin").await;
    let (status, stolen) = send(&app, Call::get("/admin/stolen-vehicles/").token(&root)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stolen.as_array().unwrap().len(), 1);

    let theft_id = record["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        Call::post(
            &format!("/thefts/{theft_id}/recover/"),
            json!({ "recovered_date": "2024-05-09" }),
        )
        .token(&fleet),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, summary) = send(&app, Call::get(&format!("/api/vehicle/{HONDA}/"))).await;
    assert_eq!(summary["is_stolen"], false);
}
