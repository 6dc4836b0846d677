#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use axum::http::StatusCode;
use serde_json::json;

use util::{login_as, seed_vehicle, send, test_app, Call};

const HONDA: &str = "1HGCM82633A004352";

#[tokio::test]
async fn lookup_unknown_vin_is_404() {
    let app = test_app().await;
    let (status, body) = send(&app, Call::get("/api/vehicle/ZZZZZZZZZZZZZZZZZ/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Vehicle not found" }));
}

#[tokio::test]
async fn lookup_returns_flat_summary() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, false).await;
    let (status, body) = send(&app, Call::get(&format!("/api/vehicle/{HONDA}/"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "vin": HONDA,
            "make": "Honda",
            "model": "Accord",
            "year": 2003,
            "title_status": "clean",
            "mileage": 120000,
            "is_stolen": false
        })
    );
}

#[tokio::test]
async fn malformed_vin_is_rejected_before_lookup() {
    let app = test_app().await;
    for uri in [
        "/api/vehicle/1hgcm82633a004352/",
        "/api/vehicle/1HGCM82633A00435/",
        "/api/vehicle/1HGCM82633I004352/",
        "/vehicles/SHORT/",
        "/api/vehicle/SHORT/telemetry/",
    ] {
        let (status, body) = send(&app, Call::get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "Invalid VIN format", "{uri}");
    }
}

#[tokio::test]
async fn telemetry_without_consent_is_403_for_everyone() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, false).await;
    let fleet = login_as(&app.pool, "fleet", "fleet_admin").await;
    let uri = format!("/api/vehicle/{HONDA}/telemetry/");

    let (status, body) = send(&app, Call::get(&uri)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Tracking not enabled" }));

    let (status, body) = send(&app, Call::get(&uri).token(&fleet)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Tracking not enabled" }));

    let (status, _) = send(&app, Call::get(&format!("/vehicles/{HONDA}/tracking/")).token(&fleet)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn telemetry_with_consent_needs_login_and_capability() {
    let app = test_app().await;
    seed_vehicle(&app.pool, HONDA, true).await;
    let fleet = login_as(&app.pool, "fleet", "fleet_admin").await;
    let buyer = login_as(&app.pool, "buyer", "verified_buyer").await;
    let uri = format!("/api/vehicle/{HONDA}/telemetry/");

    let (status, _) = send(&app, Call::get(&uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, Call::get(&uri).token(&buyer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for (ts, lat) in [(1_000, 30.1), (2_000, 30.2)] {
        let (status, _) = send(
            &app,
            Call::post(
                &format!("/vehicles/{HONDA}/telemetry/"),
                json!({ "timestamp": ts, "latitude": lat, "longitude": -97.7, "speed": 42.0 }),
            )
            .token(&fleet),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, Call::get(&uri).token(&fleet)).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["latitude"], 30.2);
    assert_eq!(data[0]["speed"], 42.0);
    assert!(data[0]["timestamp"].is_string());
}

#[tokio::test]
async fn invalid_bearer_token_is_401() {
    let app = test_app().await;
    let (status, body) = send(&app, Call::get("/dashboard/").token("not-a-session")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");
}
