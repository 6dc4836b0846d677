//! Registration, sessions and the caller's profile.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use crate::accounts::{self, NewAccount, ProfileUpdate, RegistrationOrigin, Session};
use crate::http::extract::{bearer_token, CurrentUser, JsonBody};
use crate::model::User;
use crate::state::AppState;
use crate::AppResult;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsentChange {
    pub consent: bool,
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<NewAccount>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = accounts::register(
        &state.pool,
        input,
        RegistrationOrigin::SelfService,
        state.config.password_iterations,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(creds): JsonBody<Credentials>,
) -> AppResult<Json<Session>> {
    let session = accounts::login(
        &state.pool,
        &creds.username,
        &creds.password,
        state.config.session_ttl_ms(),
    )
    .await?;
    Ok(Json(session))
}

/// Idempotent: a missing or stale token is not an error.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    if let Some(token) = bearer_token(&headers) {
        accounts::logout(&state.pool, &token).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn profile(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(update): JsonBody<ProfileUpdate>,
) -> AppResult<Json<User>> {
    Ok(Json(accounts::update_profile(&state.pool, &user.id, update).await?))
}

pub async fn record_consent(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(change): JsonBody<ConsentChange>,
) -> AppResult<Json<User>> {
    Ok(Json(accounts::record_consent(&state.pool, &user.id, change.consent).await?))
}

pub async fn verify_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<User>> {
    Ok(Json(accounts::verify_user(&state.pool, &actor, &user_id).await?))
}
