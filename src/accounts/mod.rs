//! Accounts, bearer sessions and profile maintenance.

pub mod password;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::id::{new_uuid_v4, new_uuid_v7};
use crate::model::User;
use crate::role::{Capability, Role};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const DUPLICATE_USERNAME: &str = "VALIDATION/DUPLICATE_USERNAME";
pub const INVALID_CREDENTIALS: &str = "AUTH/INVALID_CREDENTIALS";
pub const SESSION_EXPIRED: &str = "AUTH/SESSION_EXPIRED";

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, role, phone_number, \
     company_name, verified_at, consent_to_data_usage, consent_date, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Who is creating the account. Operators (the CLI) may assign any role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOrigin {
    SelfService,
    Operator,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    format!("{}{}", new_uuid_v4().simple(), new_uuid_v4().simple())
}

fn decode_user(row: &SqliteRow) -> AppResult<User> {
    let role_raw: String = row.try_get("role")?;
    // A stored role outside the table grants nothing, so the account cannot act.
    let role = role_raw.parse::<Role>().map_err(|err| {
        AppError::forbidden("ROLE", "Account role not recognised")
            .with_context("role", role_raw.clone())
            .with_cause(err)
    })?;
    let consent: i64 = row.try_get("consent_to_data_usage")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role,
        phone_number: row.try_get("phone_number")?,
        company_name: row.try_get("company_name")?,
        verified_at: row.try_get("verified_at")?,
        consent_to_data_usage: consent != 0,
        consent_date: row.try_get("consent_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> AppResult<User> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::not_found("USER", "User not found").with_context("user_id", id.to_string())
        })?;
    decode_user(&row)
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
    let row = sqlx::query(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(decode_user).transpose()
}

pub async fn register(
    pool: &SqlitePool,
    input: NewAccount,
    origin: RegistrationOrigin,
    password_iterations: u32,
) -> AppResult<User> {
    let username = input.username.trim().to_string();
    if username.is_empty() {
        return Err(AppError::validation("USERNAME", "Username is required"));
    }
    if input.password.is_empty() {
        return Err(AppError::validation("PASSWORD", "Password is required"));
    }
    let role = match blank_to_none(input.role) {
        Some(raw) => raw.parse::<Role>()?,
        None => Role::Guest,
    };
    if origin == RegistrationOrigin::SelfService && !role.self_assignable() {
        return Err(
            AppError::forbidden("ROLE", "That role cannot be chosen at registration")
                .with_context("role", role.as_str()),
        );
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE username = ?")
        .bind(&username)
        .fetch_optional(pool)
        .await?;
    if exists.is_some() {
        return Err(duplicate_username(&username));
    }

    let id = new_uuid_v7();
    let now = now_ms();
    let hash = password::hash_password(&input.password, password_iterations)?;
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name, role, \
         consent_to_data_usage, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&id)
    .bind(&username)
    .bind(blank_to_none(input.email))
    .bind(&hash)
    .bind(blank_to_none(input.first_name))
    .bind(blank_to_none(input.last_name))
    .bind(role.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).on_unique_violation(|| duplicate_username(&username)))?;

    tracing::info!(
        target: "autosentinel",
        event = "user_registered",
        user_id = %id,
        role = role.as_str()
    );
    get_user(pool, &id).await
}

fn duplicate_username(username: &str) -> AppError {
    AppError::new(DUPLICATE_USERNAME, "Username already exists")
        .with_context("username", username.to_string())
}

fn invalid_credentials() -> AppError {
    AppError::new(INVALID_CREDENTIALS, "Invalid credentials")
}

pub async fn login(
    pool: &SqlitePool,
    username: &str,
    password: &str,
    ttl_ms: i64,
) -> AppResult<Session> {
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE username = ?")
        .bind(username.trim())
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        tracing::info!(target: "autosentinel", event = "login_failed", reason = "unknown_user");
        return Err(invalid_credentials());
    };
    let user_id: String = row.try_get("id")?;
    let stored: String = row.try_get("password_hash")?;
    if !password::verify_password(password, &stored) {
        tracing::info!(target: "autosentinel", event = "login_failed", user_id = %user_id, reason = "bad_password");
        return Err(invalid_credentials());
    }

    let user = get_user(pool, &user_id).await?;
    let token = new_token();
    let now = now_ms();
    let expires_at = now + ttl_ms;
    sqlx::query("INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(token_digest(&token))
        .bind(&user.id)
        .bind(now)
        .bind(expires_at)
        .execute(pool)
        .await?;

    tracing::info!(target: "autosentinel", event = "login", user_id = %user.id);
    Ok(Session {
        token,
        expires_at,
        user,
    })
}

pub async fn logout(pool: &SqlitePool, token: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(token_digest(token))
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve a bearer token to its user. Expired sessions are removed.
pub async fn authenticate(pool: &SqlitePool, token: &str) -> AppResult<User> {
    let digest = token_digest(token);
    let row = sqlx::query("SELECT user_id, expires_at FROM sessions WHERE token_hash = ?")
        .bind(&digest)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::unauthenticated("Authentication required"))?;
    let user_id: String = row.try_get("user_id")?;
    let expires_at: i64 = row.try_get("expires_at")?;
    if expires_at <= now_ms() {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(&digest)
            .execute(pool)
            .await?;
        return Err(AppError::new(SESSION_EXPIRED, "Session expired"));
    }
    get_user(pool, &user_id).await
}

pub async fn update_profile(
    pool: &SqlitePool,
    user_id: &str,
    update: ProfileUpdate,
) -> AppResult<User> {
    let res = sqlx::query(
        "UPDATE users SET first_name = ?, last_name = ?, email = ?, phone_number = ?, \
         company_name = ?, updated_at = ? WHERE id = ?",
    )
    .bind(blank_to_none(update.first_name))
    .bind(blank_to_none(update.last_name))
    .bind(blank_to_none(update.email))
    .bind(blank_to_none(update.phone_number))
    .bind(blank_to_none(update.company_name))
    .bind(now_ms())
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::not_found("USER", "User not found"));
    }
    get_user(pool, user_id).await
}

pub async fn record_consent(pool: &SqlitePool, user_id: &str, consent: bool) -> AppResult<User> {
    let now = now_ms();
    let res = sqlx::query(
        "UPDATE users SET consent_to_data_usage = ?, consent_date = ?, updated_at = ? WHERE id = ?",
    )
    .bind(i64::from(consent))
    .bind(consent.then_some(now))
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::not_found("USER", "User not found"));
    }
    get_user(pool, user_id).await
}

/// Stamp `verified_at`. Only full-access accounts may verify others.
pub async fn verify_user(pool: &SqlitePool, actor: &User, user_id: &str) -> AppResult<User> {
    actor.role.require(Capability::FullAccess)?;
    let now = now_ms();
    let res = sqlx::query(
        "UPDATE users SET verified_at = COALESCE(verified_at, ?), updated_at = ? WHERE id = ?",
    )
    .bind(now)
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::not_found("USER", "User not found")
            .with_context("user_id", user_id.to_string()));
    }
    get_user(pool, user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;

    async fn pool() -> SqlitePool {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        pool
    }

    fn account(username: &str, role: Option<&str>) -> NewAccount {
        NewAccount {
            username: username.into(),
            email: Some("someone@example.com".into()),
            password: "hunter22".into(),
            role: role.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let pool = pool().await;
        register(&pool, account("dana", None), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap();
        let err = register(&pool, account("dana", Some("dealer")), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), DUPLICATE_USERNAME);
        assert_eq!(err.message(), "Username already exists");
    }

    #[tokio::test]
    async fn self_service_cannot_pick_privileged_roles() {
        let pool = pool().await;
        let err = register(
            &pool,
            account("eve", Some("system_admin")),
            RegistrationOrigin::SelfService,
            10,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/ROLE");

        let admin = register(&pool, account("root", Some("system_admin")), RegistrationOrigin::Operator, 10)
            .await
            .unwrap();
        assert_eq!(admin.role, Role::SystemAdmin);

        let err = register(&pool, account("x", Some("wizard")), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION/ROLE");
    }

    #[tokio::test]
    async fn login_issues_token_that_authenticates() {
        let pool = pool().await;
        let user = register(&pool, account("fran", Some("dealer")), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap();

        let err = login(&pool, "fran", "wrong", 60_000).await.unwrap_err();
        assert_eq!(err.code(), INVALID_CREDENTIALS);
        assert_eq!(err.message(), "Invalid credentials");

        let session = login(&pool, "fran", "hunter22", 60_000).await.unwrap();
        assert_eq!(session.user.id, user.id);
        let resolved = authenticate(&pool, &session.token).await.unwrap();
        assert_eq!(resolved.role, Role::Dealer);

        let stored: String = sqlx::query_scalar("SELECT token_hash FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_ne!(stored, session.token);

        logout(&pool, &session.token).await.unwrap();
        let err = authenticate(&pool, &session.token).await.unwrap_err();
        assert_eq!(err.code(), "AUTH/REQUIRED");
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let pool = pool().await;
        register(&pool, account("gus", None), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap();
        let session = login(&pool, "gus", "hunter22", -1).await.unwrap();
        let err = authenticate(&pool, &session.token).await.unwrap_err();
        assert_eq!(err.code(), SESSION_EXPIRED);
    }

    #[tokio::test]
    async fn unknown_stored_role_fails_closed() {
        let pool = pool().await;
        let user = register(&pool, account("hal", None), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap();
        sqlx::query("UPDATE users SET role = 'superuser' WHERE id = ?")
            .bind(&user.id)
            .execute(&pool)
            .await
            .unwrap();
        let err = get_user(&pool, &user.id).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/ROLE");
    }

    #[tokio::test]
    async fn profile_consent_and_verification() {
        let pool = pool().await;
        let user = register(&pool, account("ivy", None), RegistrationOrigin::SelfService, 10)
            .await
            .unwrap();
        let updated = update_profile(
            &pool,
            &user.id,
            ProfileUpdate {
                first_name: Some("Ivy".into()),
                company_name: Some("  ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.first_name.as_deref(), Some("Ivy"));
        assert_eq!(updated.company_name, None);

        let consented = record_consent(&pool, &user.id, true).await.unwrap();
        assert!(consented.consent_to_data_usage);
        assert!(consented.consent_date.is_some());

        let err = verify_user(&pool, &user, &user.id).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/CAPABILITY");
        let admin = register(&pool, account("ops", Some("system_admin")), RegistrationOrigin::Operator, 10)
            .await
            .unwrap();
        let verified = verify_user(&pool, &admin, &user.id).await.unwrap();
        assert!(verified.verified_at.is_some());
    }
}
