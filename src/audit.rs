//! Append-only audit trail for sensitive reads and writes.
//!
//! Writes are best effort: a failed insert is logged and never fails the
//! request that triggered it.

use serde::Deserialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::id::new_uuid_v7;
use crate::model::{decode_enum, decode_json, AuditAction, AuditLog, RequestContext, User};
use crate::pagination::{Page, PageWindow};
use crate::role::Capability;
use crate::time::now_ms;
use crate::AppResult;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: Option<String>,
    pub field_accessed: Option<String>,
    pub vehicle_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, resource_type: &'static str) -> Self {
        AuditEntry {
            user_id: None,
            action,
            resource_type,
            resource_id: None,
            field_accessed: None,
            vehicle_id: None,
            metadata: None,
        }
    }

    pub fn by(mut self, user: Option<&User>) -> Self {
        self.user_id = user.map(|u| u.id.clone());
        self
    }

    pub fn resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn vehicle(mut self, id: impl Into<String>) -> Self {
        self.vehicle_id = Some(id.into());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field_accessed = Some(field.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub async fn try_record(
    pool: &SqlitePool,
    entry: &AuditEntry,
    ctx: &RequestContext,
) -> AppResult<String> {
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO audit_logs (id, user_id, action, resource_type, resource_id, field_accessed, \
         vehicle_id, ip_address, user_agent, metadata, timestamp) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&entry.user_id)
    .bind(entry.action.as_str())
    .bind(entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.field_accessed)
    .bind(&entry.vehicle_id)
    .bind(&ctx.ip_address)
    .bind(&ctx.user_agent)
    .bind(entry.metadata.as_ref().map(|m| m.to_string()))
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn record(pool: &SqlitePool, entry: AuditEntry, ctx: &RequestContext) {
    if let Err(err) = try_record(pool, &entry, ctx).await {
        tracing::warn!(
            target: "autosentinel",
            event = "audit_write_failed",
            action = entry.action.as_str(),
            resource_type = entry.resource_type,
            resource_id = ?entry.resource_id,
            error = %err
        );
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

const AUDIT_SELECT: &str = "SELECT a.id, a.user_id, u.username, a.action, a.resource_type, \
     a.resource_id, a.field_accessed, a.vehicle_id, a.ip_address, a.user_agent, a.metadata, \
     a.timestamp FROM audit_logs a LEFT JOIN users u ON u.id = a.user_id";

fn decode_audit(row: &SqliteRow) -> AppResult<AuditLog> {
    let action: String = row.try_get("action")?;
    Ok(AuditLog {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        action: decode_enum("action", &action)?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        field_accessed: row.try_get("field_accessed")?,
        vehicle_id: row.try_get("vehicle_id")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        metadata: decode_json(row.try_get("metadata")?),
        timestamp: row.try_get("timestamp")?,
    })
}

/// Newest first, filtered by action and/or user. Admin only.
pub async fn list(
    pool: &SqlitePool,
    actor: &User,
    filter: &AuditFilter,
    requested_page: u32,
    per_page: u32,
) -> AppResult<Page<AuditLog>> {
    actor.role.require(Capability::ViewAuditLogs)?;

    let action = match filter.action.as_deref().filter(|a| !a.is_empty()) {
        Some(raw) => Some(raw.parse::<AuditAction>()?),
        None => None,
    };
    let user = filter.user.as_deref().filter(|u| !u.is_empty());

    let where_clause = "WHERE (?1 IS NULL OR a.action = ?1) AND (?2 IS NULL OR a.user_id = ?2)";
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM audit_logs a {where_clause}"
    ))
    .bind(action.map(AuditAction::as_str))
    .bind(user)
    .fetch_one(pool)
    .await?;

    let window = PageWindow::resolve(requested_page, per_page, total);
    let rows = sqlx::query(&format!(
        "{AUDIT_SELECT} {where_clause} ORDER BY a.timestamp DESC, a.id DESC LIMIT ?3 OFFSET ?4"
    ))
    .bind(action.map(AuditAction::as_str))
    .bind(user)
    .bind(window.limit())
    .bind(window.offset())
    .fetch_all(pool)
    .await?;
    let items = rows.iter().map(decode_audit).collect::<AppResult<Vec<_>>>()?;
    Ok(window.into_page(items))
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> AppResult<Vec<AuditLog>> {
    let rows = sqlx::query(&format!(
        "{AUDIT_SELECT} ORDER BY a.timestamp DESC, a.id DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_audit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, NewAccount, RegistrationOrigin};
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;

    async fn setup() -> (SqlitePool, User, User) {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        let auditor = register(
            &pool,
            NewAccount {
                username: "auditor".into(),
                password: "pw".into(),
                role: Some("auditor".into()),
                ..Default::default()
            },
            RegistrationOrigin::Operator,
            10,
        )
        .await
        .unwrap();
        let buyer = register(
            &pool,
            NewAccount {
                username: "buyer".into(),
                password: "pw".into(),
                role: Some("verified_buyer".into()),
                ..Default::default()
            },
            RegistrationOrigin::SelfService,
            10,
        )
        .await
        .unwrap();
        (pool, auditor, buyer)
    }

    #[tokio::test]
    async fn records_and_filters_entries() {
        let (pool, auditor, buyer) = setup().await;
        let ctx = RequestContext {
            ip_address: Some("10.0.0.1".into()),
            user_agent: Some("test".into()),
        };
        record(&pool, AuditEntry::new(AuditAction::View, "Vehicle").by(Some(&buyer)).resource("v1"), &ctx).await;
        record(&pool, AuditEntry::new(AuditAction::Export, "VehicleReport").by(Some(&buyer)), &ctx).await;
        record(&pool, AuditEntry::new(AuditAction::View, "Vehicle"), &RequestContext::default()).await;

        let all = list(&pool, &auditor, &AuditFilter::default(), 1, 50).await.unwrap();
        assert_eq!(all.total, 3);

        let views = list(
            &pool,
            &auditor,
            &AuditFilter {
                action: Some("view".into()),
                user: Some(buyer.id.clone()),
            },
            1,
            50,
        )
        .await
        .unwrap();
        assert_eq!(views.total, 1);
        let entry = &views.items[0];
        assert_eq!(entry.username.as_deref(), Some("buyer"));
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.resource_id.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn listing_requires_audit_capability() {
        let (pool, _auditor, buyer) = setup().await;
        let err = list(&pool, &buyer, &AuditFilter::default(), 1, 50).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/CAPABILITY");
    }

    #[tokio::test]
    async fn failed_writes_are_swallowed() {
        let (pool, _auditor, _buyer) = setup().await;
        // Dangling user id violates the foreign key; record() must not panic or error.
        let entry = AuditEntry {
            user_id: Some("missing-user".into()),
            ..AuditEntry::new(AuditAction::View, "Vehicle")
        };
        record(&pool, entry.clone(), &RequestContext::default()).await;
        assert!(try_record(&pool, &entry, &RequestContext::default()).await.is_err());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
