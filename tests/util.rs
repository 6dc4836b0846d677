#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;

use autosentinel_lib::accounts::{self, NewAccount, RegistrationOrigin};
use autosentinel_lib::config::AppConfig;
use autosentinel_lib::model::{RequestContext, Vehicle};
use autosentinel_lib::vehicles::{self, NewVehicle};
use autosentinel_lib::{db, http, migrate, AppState};

pub const TEST_PASSWORD: &str = "correct horse";

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
}

pub async fn test_app() -> TestApp {
    let pool = db::open_memory_pool().await.expect("memory pool");
    migrate::apply_migrations(&pool).await.expect("migrations");
    let config = AppConfig {
        password_iterations: 10,
        ..AppConfig::default()
    };
    let router = http::app(AppState::new(pool.clone(), config));
    TestApp { router, pool }
}

/// Registers `username` with `role` and returns a bearer token for it.
pub async fn login_as(pool: &SqlitePool, username: &str, role: &str) -> String {
    accounts::register(
        pool,
        NewAccount {
            username: username.into(),
            password: TEST_PASSWORD.into(),
            role: Some(role.into()),
            ..Default::default()
        },
        RegistrationOrigin::Operator,
        10,
    )
    .await
    .expect("register");
    accounts::login(pool, username, TEST_PASSWORD, 3_600_000)
        .await
        .expect("login")
        .token
}

pub async fn seed_vehicle(pool: &SqlitePool, vin: &str, consenting: bool) -> Vehicle {
    let fleet = match accounts::find_by_username(pool, "seed-fleet").await.unwrap() {
        Some(user) => user,
        None => accounts::register(
            pool,
            NewAccount {
                username: "seed-fleet".into(),
                password: TEST_PASSWORD.into(),
                role: Some("fleet_admin".into()),
                ..Default::default()
            },
            RegistrationOrigin::Operator,
            10,
        )
        .await
        .unwrap(),
    };
    let input: NewVehicle = serde_json::from_value(serde_json::json!({
        "vin": vin,
        "make": "Honda",
        "model": "Accord",
        "year": 2003,
        "current_mileage": 120000,
        "consenting_for_tracking": consenting
    }))
    .unwrap();
    vehicles::create(pool, &fleet, input, &RequestContext::default())
        .await
        .unwrap()
}

pub struct Call<'a> {
    pub method: Method,
    pub uri: &'a str,
    pub token: Option<&'a str>,
    pub body: Option<Value>,
}

impl<'a> Call<'a> {
    pub fn get(uri: &'a str) -> Self {
        Call {
            method: Method::GET,
            uri,
            token: None,
            body: None,
        }
    }

    pub fn post(uri: &'a str, body: Value) -> Self {
        Call {
            method: Method::POST,
            uri,
            token: None,
            body: Some(body),
        }
    }

    pub fn token(mut self, token: &'a str) -> Self {
        self.token = Some(token);
        self
    }
}

pub async fn send(app: &TestApp, call: Call<'_>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(call.method)
        .uri(call.uri)
        .header("x-forwarded-for", "198.51.100.7")
        .header(header::USER_AGENT, "integration-test");
    if let Some(token) = call.token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match call.body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}
