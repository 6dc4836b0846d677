//! Dashboard and statistics view-models.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::audit;
use crate::model::{AuditLog, CrowdsourcedStatus, ReportStatus, SearchQuery, User, VehicleReport};
use crate::repo::{self, GroupOrder};
use crate::reports;
use crate::search;
use crate::AppResult;

#[derive(Debug, Clone, Serialize)]
pub struct HomeStats {
    pub total_vehicles: i64,
    pub total_reports: i64,
    pub stolen_vehicles: i64,
    pub tracked_vehicles: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HomePage {
    pub stats: HomeStats,
    pub recent_searches: Vec<SearchQuery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub total_searches: i64,
    pub total_reports: i64,
    pub total_purchases: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDashboard {
    pub user: User,
    pub recent_searches: Vec<SearchQuery>,
    pub recent_reports: Vec<VehicleReport>,
    pub stats: UserStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub total_vehicles: i64,
    pub total_users: i64,
    pub total_reports: i64,
    pub stolen_vehicles: i64,
    pub pending_crowdsourced: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub stats: AdminStats,
    pub recent_activity: Vec<AuditLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleStats {
    pub by_make: Vec<Bucket>,
    pub by_year: Vec<Bucket>,
    pub by_status: Vec<Bucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalAndBuckets {
    pub total: i64,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub vehicle_stats: VehicleStats,
    pub accident_stats: TotalAndBuckets,
    pub search_stats: TotalAndBuckets,
}

async fn buckets(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    order: GroupOrder,
    limit: Option<i64>,
) -> AppResult<Vec<Bucket>> {
    Ok(repo::group_counts(pool, table, column, order, limit)
        .await?
        .into_iter()
        .map(|(value, count)| Bucket { value, count })
        .collect())
}

pub async fn home(pool: &SqlitePool) -> AppResult<HomePage> {
    Ok(HomePage {
        stats: HomeStats {
            total_vehicles: repo::count(pool, "vehicles").await?,
            total_reports: repo::count_status(pool, "vehicle_reports", ReportStatus::Completed.as_str())
                .await?,
            stolen_vehicles: repo::count_flag(pool, "vehicles", "is_stolen", true).await?,
            tracked_vehicles: repo::count_flag(pool, "vehicles", "consenting_for_tracking", true).await?,
        },
        recent_searches: search::recent(pool, None, 5).await?,
    })
}

pub async fn user_dashboard(pool: &SqlitePool, user: &User) -> AppResult<UserDashboard> {
    Ok(UserDashboard {
        recent_searches: search::recent(pool, Some(&user.id), 10).await?,
        recent_reports: reports::recent_for_user(pool, &user.id, 5).await?,
        stats: UserStats {
            total_searches: search::count_for_user(pool, &user.id).await?,
            total_reports: reports::count_for_user(pool, &user.id).await?,
            total_purchases: reports::count_purchases_for_user(pool, &user.id).await?,
        },
        user: user.clone(),
    })
}

pub async fn admin_dashboard(pool: &SqlitePool, actor: &User) -> AppResult<AdminDashboard> {
    actor.role.require_admin()?;
    Ok(AdminDashboard {
        stats: AdminStats {
            total_vehicles: repo::count(pool, "vehicles").await?,
            total_users: repo::count(pool, "users").await?,
            total_reports: repo::count(pool, "vehicle_reports").await?,
            stolen_vehicles: repo::count_flag(pool, "vehicles", "is_stolen", true).await?,
            pending_crowdsourced: repo::count_status(
                pool,
                "crowdsourced_reports",
                CrowdsourcedStatus::Pending.as_str(),
            )
            .await?,
        },
        recent_activity: audit::recent(pool, 20).await?,
    })
}

pub async fn statistics(pool: &SqlitePool) -> AppResult<Statistics> {
    Ok(Statistics {
        vehicle_stats: VehicleStats {
            by_make: buckets(pool, "vehicles", "make", GroupOrder::CountDesc, Some(10)).await?,
            by_year: buckets(pool, "vehicles", "year", GroupOrder::ValueDesc, Some(10)).await?,
            by_status: buckets(pool, "vehicles", "current_title_status", GroupOrder::ValueAsc, None)
                .await?,
        },
        accident_stats: TotalAndBuckets {
            total: repo::count(pool, "accident_records").await?,
            buckets: buckets(pool, "accident_records", "severity", GroupOrder::ValueAsc, None).await?,
        },
        search_stats: TotalAndBuckets {
            total: repo::count(pool, "search_queries").await?,
            buckets: buckets(pool, "search_queries", "search_type", GroupOrder::ValueAsc, None).await?,
        },
    })
}
