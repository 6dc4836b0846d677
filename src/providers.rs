//! Registry of upstream data providers and the feed requests made to them.
//! Rows only; nothing here talks to the network.

use serde::Deserialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::id::new_uuid_v7;
use crate::model::{decode_enum, decode_json, DataProvider, FeedStatus, ProviderDataFeed, ProviderType, User};
use crate::role::Capability;
use crate::time::now_ms;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_hour: i64,
}

fn default_active() -> bool {
    true
}

fn default_rate_limit() -> i64 {
    1000
}

fn decode_provider(row: &SqliteRow) -> AppResult<DataProvider> {
    let provider_type: String = row.try_get("provider_type")?;
    Ok(DataProvider {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        provider_type: decode_enum("provider_type", &provider_type)?,
        api_endpoint: row.try_get("api_endpoint")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        rate_limit_per_hour: row.try_get("rate_limit_per_hour")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_feed(row: &SqliteRow) -> AppResult<ProviderDataFeed> {
    let status: String = row.try_get("status")?;
    Ok(ProviderDataFeed {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        status: decode_enum("status", &status)?,
        request_payload: decode_json(row.try_get("request_payload")?),
        response_data: decode_json(row.try_get("response_data")?),
        error_message: row.try_get("error_message")?,
        requested_at: row.try_get("requested_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

pub async fn list(pool: &SqlitePool, actor: &User) -> AppResult<Vec<DataProvider>> {
    actor.role.require_admin()?;
    let rows = sqlx::query(
        "SELECT id, name, provider_type, api_endpoint, is_active, rate_limit_per_hour, created_at, \
         updated_at FROM data_providers ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_provider).collect()
}

pub async fn create(pool: &SqlitePool, actor: &User, input: NewProvider) -> AppResult<DataProvider> {
    actor.role.require(Capability::FullAccess)?;
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("REQUIRED", "name is required").with_context("field", "name"));
    }
    if input.rate_limit_per_hour <= 0 {
        return Err(AppError::validation("RATE_LIMIT", "Rate limit must be positive"));
    }
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO data_providers (id, name, provider_type, api_endpoint, is_active, \
         rate_limit_per_hour, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(input.provider_type.as_str())
    .bind(&input.api_endpoint)
    .bind(i64::from(input.is_active))
    .bind(input.rate_limit_per_hour)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| {
        AppError::from(err).on_unique_violation(|| {
            AppError::conflict("PROVIDER", "A provider with this name already exists")
                .with_context("name", name.to_string())
        })
    })?;
    tracing::info!(target: "autosentinel", event = "provider_created", provider_id = %id, name = %name);

    let row = sqlx::query(
        "SELECT id, name, provider_type, api_endpoint, is_active, rate_limit_per_hour, created_at, \
         updated_at FROM data_providers WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(pool)
    .await?;
    decode_provider(&row)
}

/// Newest request first.
pub async fn feeds(
    pool: &SqlitePool,
    actor: &User,
    provider_id: &str,
    status: Option<&str>,
    limit: i64,
) -> AppResult<Vec<ProviderDataFeed>> {
    actor.role.require_admin()?;
    let status = match status.filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<FeedStatus>()?),
        None => None,
    };
    let rows = sqlx::query(
        "SELECT id, provider_id, vehicle_id, status, request_payload, response_data, error_message, \
         requested_at, completed_at FROM provider_data_feeds \
         WHERE provider_id = ?1 AND (?2 IS NULL OR status = ?2) \
         ORDER BY requested_at DESC, id DESC LIMIT ?3",
    )
    .bind(provider_id)
    .bind(status.map(FeedStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_feed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, NewAccount, RegistrationOrigin};
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;

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

    fn ncib() -> NewProvider {
        NewProvider {
            name: "NCIB".into(),
            provider_type: ProviderType::Ncib,
            api_endpoint: Some("https://ncib.example/api".into()),
            is_active: true,
            rate_limit_per_hour: 500,
        }
    }

    #[tokio::test]
    async fn admins_create_and_list_providers() {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        let root = account(&pool, "root", "system_admin").await;
        let auditor = account(&pool, "auditor", "auditor").await;

        let err = create(&pool, &auditor, ncib()).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/CAPABILITY");

        let provider = create(&pool, &root, ncib()).await.unwrap();
        assert_eq!(provider.provider_type, ProviderType::Ncib);
        let err = create(&pool, &root, ncib()).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT/PROVIDER");

        let listed = list(&pool, &auditor).await.unwrap();
        assert_eq!(listed.len(), 1);

        sqlx::query(
            "INSERT INTO provider_data_feeds (id, provider_id, status, request_payload, requested_at) \
             VALUES ('f1', ?, 'failed', '{\"vin\":\"1HGCM82633A004352\"}', 5)",
        )
        .bind(&provider.id)
        .execute(&pool)
        .await
        .unwrap();
        let failed = feeds(&pool, &auditor, &provider.id, Some("failed"), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].request_payload.as_ref().unwrap()["vin"], "1HGCM82633A004352");
        assert!(feeds(&pool, &auditor, &provider.id, Some("completed"), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
