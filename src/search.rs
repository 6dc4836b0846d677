//! Vehicle search by VIN, plate or make/model, with one analytics row per
//! executed search.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::id::new_uuid_v7;
use crate::model::{
    decode_enum, RequestContext, SearchQuery, SearchType, User, Vehicle, VehicleSummary,
};
use crate::pagination::Page;
use crate::role::Capability;
use crate::time::now_ms;
use crate::vehicles::{decode_vehicle, VEHICLE_COLUMNS};
use crate::vin::Vin;
use crate::{AppError, AppResult};

pub const BULK_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default, rename = "type")]
    pub search_type: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub search_type: SearchType,
    pub vehicles: Page<Vehicle>,
    pub total_results: usize,
}

/// Knobs taken from the application config.
#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    pub per_page: u32,
    pub slow_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkHit {
    pub vin: String,
    pub vehicle: Option<VehicleSummary>,
}

/// `%`, `_` and the escape character itself are literal in user queries.
fn like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

async fn matching(
    pool: &SqlitePool,
    search_type: SearchType,
    query: &str,
) -> AppResult<Vec<Vehicle>> {
    let pattern = like_pattern(query);
    let sql = match search_type {
        SearchType::Vin => format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE vin LIKE ?1 ESCAPE '\\' \
             ORDER BY created_at DESC, id DESC"
        ),
        SearchType::Plate => format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id IN (\
               SELECT vehicle_id FROM vehicle_registrations WHERE plate_number LIKE ?1 ESCAPE '\\') \
             ORDER BY created_at DESC, id DESC"
        ),
        SearchType::MakeModel => format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles \
             WHERE make LIKE ?1 ESCAPE '\\' OR model LIKE ?1 ESCAPE '\\' \
             ORDER BY created_at DESC, id DESC"
        ),
    };
    let rows = sqlx::query(&sql).bind(&pattern).fetch_all(pool).await?;
    rows.iter().map(decode_vehicle).collect()
}

struct SearchLog<'a> {
    user_id: Option<&'a str>,
    search_type: SearchType,
    query_text: &'a str,
    vehicle_found_id: Option<&'a str>,
    results_count: usize,
    response_time_ms: i64,
}

async fn log_search(pool: &SqlitePool, entry: SearchLog<'_>, ctx: &RequestContext) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO search_queries (id, user_id, search_type, query_text, vehicle_found_id, \
         results_count, response_time_ms, cache_hit, ip_address, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(new_uuid_v7())
    .bind(entry.user_id)
    .bind(entry.search_type.as_str())
    .bind(entry.query_text)
    .bind(entry.vehicle_found_id)
    .bind(i64::try_from(entry.results_count).unwrap_or(i64::MAX))
    .bind(entry.response_time_ms)
    .bind(&ctx.ip_address)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Run one search. A blank query returns an empty page and records nothing;
/// a missing type means `vin`.
pub async fn search(
    pool: &SqlitePool,
    searcher: Option<&User>,
    params: &SearchParams,
    requested_page: u32,
    settings: SearchSettings,
    ctx: &RequestContext,
) -> AppResult<SearchResults> {
    let search_type = match params.search_type.as_deref().filter(|t| !t.is_empty()) {
        Some(raw) => raw.parse::<SearchType>()?,
        None => SearchType::Vin,
    };
    let query = params.q.as_deref().unwrap_or("").trim().to_string();
    if query.is_empty() {
        return Ok(SearchResults {
            query,
            search_type,
            vehicles: Page::from_vec(Vec::new(), requested_page, settings.per_page),
            total_results: 0,
        });
    }

    let started = Instant::now();
    let vehicles = matching(pool, search_type, &query).await?;
    let response_time_ms = elapsed_ms(started);

    log_search(
        pool,
        SearchLog {
            user_id: searcher.map(|u| u.id.as_str()),
            search_type,
            query_text: &query,
            vehicle_found_id: vehicles.first().map(|v| v.id.as_str()),
            results_count: vehicles.len(),
            response_time_ms,
        },
        ctx,
    )
    .await?;

    if response_time_ms > i64::try_from(settings.slow_ms).unwrap_or(i64::MAX) {
        tracing::warn!(
            target: "autosentinel",
            event = "search_slow",
            search_type = search_type.as_str(),
            response_time_ms,
            target_ms = settings.slow_ms
        );
    }
    tracing::info!(
        target: "autosentinel",
        event = "search_executed",
        search_type = search_type.as_str(),
        results = vehicles.len(),
        response_time_ms
    );

    let total_results = vehicles.len();
    Ok(SearchResults {
        query,
        search_type,
        vehicles: Page::from_vec(vehicles, requested_page, settings.per_page),
        total_results,
    })
}

/// Exact VIN lookups in one request. Every VIN is validated before any
/// lookup runs; each lookup is logged as a `vin` search.
pub async fn bulk(
    pool: &SqlitePool,
    actor: &User,
    vins: &[String],
    ctx: &RequestContext,
) -> AppResult<Vec<BulkHit>> {
    actor.role.require(Capability::BulkSearch)?;
    if vins.is_empty() {
        return Err(AppError::validation("BULK_EMPTY", "At least one VIN is required"));
    }
    if vins.len() > BULK_LIMIT {
        return Err(AppError::validation("BULK_LIMIT", format!("At most {BULK_LIMIT} VINs per request"))
            .with_context("count", vins.len().to_string()));
    }
    let parsed = vins
        .iter()
        .map(|raw| Vin::parse(raw))
        .collect::<AppResult<Vec<_>>>()?;

    let mut hits = Vec::with_capacity(parsed.len());
    for vin in parsed {
        let started = Instant::now();
        let vehicle = crate::vehicles::find_by_vin(pool, &vin).await?;
        log_search(
            pool,
            SearchLog {
                user_id: Some(&actor.id),
                search_type: SearchType::Vin,
                query_text: vin.as_str(),
                vehicle_found_id: vehicle.as_ref().map(|v| v.id.as_str()),
                results_count: usize::from(vehicle.is_some()),
                response_time_ms: elapsed_ms(started),
            },
            ctx,
        )
        .await?;
        hits.push(BulkHit {
            vin: vin.to_string(),
            vehicle: vehicle.as_ref().map(VehicleSummary::from),
        });
    }
    Ok(hits)
}

fn decode_query(row: &SqliteRow) -> AppResult<SearchQuery> {
    let search_type: String = row.try_get("search_type")?;
    Ok(SearchQuery {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        search_type: decode_enum("search_type", &search_type)?,
        query_text: row.try_get("query_text")?,
        vehicle_found_id: row.try_get("vehicle_found_id")?,
        results_count: row.try_get("results_count")?,
        response_time_ms: row.try_get("response_time_ms")?,
        cache_hit: row.try_get::<i64, _>("cache_hit")? != 0,
        ip_address: row.try_get("ip_address")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Newest first; `user_id = None` spans every searcher.
pub async fn recent(
    pool: &SqlitePool,
    user_id: Option<&str>,
    limit: i64,
) -> AppResult<Vec<SearchQuery>> {
    let rows = sqlx::query(
        "SELECT id, user_id, search_type, query_text, vehicle_found_id, results_count, \
         response_time_ms, cache_hit, ip_address, created_at FROM search_queries \
         WHERE (?1 IS NULL OR user_id = ?1) ORDER BY created_at DESC, id DESC LIMIT ?2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_query).collect()
}

pub async fn count_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM search_queries WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, NewAccount, RegistrationOrigin};
    use crate::db::open_memory_pool;
    use crate::history::{add_registration, NewRegistration};
    use crate::migrate::apply_migrations;
    use crate::vehicles::{create, NewVehicle};

    const SETTINGS: SearchSettings = SearchSettings {
        per_page: 20,
        slow_ms: 500,
    };

    async fn seeded() -> (SqlitePool, User) {
        let pool = open_memory_pool().await.unwrap();
        apply_migrations(&pool).await.unwrap();
        let fleet = register(
            &pool,
            NewAccount {
                username: "fleet".into(),
                password: "pw".into(),
                role: Some("fleet_admin".into()),
                ..Default::default()
            },
            RegistrationOrigin::Operator,
            10,
        )
        .await
        .unwrap();
        let ctx = RequestContext::default();
        for (vin, make, model) in [
            ("1HGCM82633A004352", "Honda", "Accord"),
            ("2T1BURHE0JC000001", "Toyota", "Corolla"),
        ] {
            let input: NewVehicle = serde_json::from_value(serde_json::json!({
                "vin": vin, "make": make, "model": model, "year": 2018
            }))
            .unwrap();
            create(&pool, &fleet, input, &ctx).await.unwrap();
        }
        add_registration(
            &pool,
            &fleet,
            &Vin::parse("2T1BURHE0JC000001").unwrap(),
            NewRegistration {
                plate_number: "7ABC123".into(),
                state: "CA".into(),
                country: None,
                issued_date: chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                expiry_date: None,
                is_current: true,
            },
            &ctx,
        )
        .await
        .unwrap();
        (pool, fleet)
    }

    fn params(q: &str, search_type: &str) -> SearchParams {
        SearchParams {
            q: Some(q.into()),
            search_type: Some(search_type.into()),
            page: None,
        }
    }

    async fn logged(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM search_queries")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn searches_each_type_case_insensitively() {
        let (pool, _fleet) = seeded().await;
        let ctx = RequestContext::default();

        let by_vin = search(&pool, None, &params("a004", "vin"), 1, SETTINGS, &ctx).await.unwrap();
        assert_eq!(by_vin.total_results, 1);
        assert_eq!(by_vin.vehicles.items[0].make, "Honda");

        let by_plate = search(&pool, None, &params("abc", "plate"), 1, SETTINGS, &ctx).await.unwrap();
        assert_eq!(by_plate.total_results, 1);
        assert_eq!(by_plate.vehicles.items[0].make, "Toyota");

        let by_model = search(&pool, None, &params("corol", "make_model"), 1, SETTINGS, &ctx)
            .await
            .unwrap();
        assert_eq!(by_model.total_results, 1);

        assert_eq!(logged(&pool).await, 3);
    }

    #[tokio::test]
    async fn every_search_is_logged_with_first_hit() {
        let (pool, fleet) = seeded().await;
        let ctx = RequestContext {
            ip_address: Some("192.0.2.4".into()),
            user_agent: None,
        };
        search(&pool, Some(&fleet), &params("honda", "make_model"), 1, SETTINGS, &ctx)
            .await
            .unwrap();
        search(&pool, Some(&fleet), &params("nothing-here", "vin"), 1, SETTINGS, &ctx)
            .await
            .unwrap();

        let rows = recent(&pool, Some(&fleet.id), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        let hit = rows.iter().find(|r| r.query_text == "honda").unwrap();
        assert_eq!(hit.results_count, 1);
        assert!(hit.vehicle_found_id.is_some());
        assert!(!hit.cache_hit);
        assert_eq!(hit.ip_address.as_deref(), Some("192.0.2.4"));
        let miss = rows.iter().find(|r| r.query_text == "nothing-here").unwrap();
        assert_eq!(miss.results_count, 0);
        assert!(miss.vehicle_found_id.is_none());
        assert_eq!(count_for_user(&pool, &fleet.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn blank_query_is_not_logged_and_bad_type_is_rejected() {
        let (pool, _fleet) = seeded().await;
        let ctx = RequestContext::default();
        let empty = search(&pool, None, &params("   ", "vin"), 1, SETTINGS, &ctx).await.unwrap();
        assert_eq!(empty.total_results, 0);
        assert_eq!(logged(&pool).await, 0);

        let err = search(&pool, None, &params("x", "colour"), 1, SETTINGS, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION/SEARCH_TYPE");
    }

    #[tokio::test]
    async fn wildcards_in_queries_are_literal() {
        let (pool, _fleet) = seeded().await;
        let found = search(&pool, None, &params("%", "make_model"), 1, SETTINGS, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(found.total_results, 0);
    }

    #[tokio::test]
    async fn bulk_search_needs_capability_and_valid_vins() {
        let (pool, fleet) = seeded().await;
        let ctx = RequestContext::default();
        let err = bulk(&pool, &fleet, &["1HGCM82633A004352".into()], &ctx).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN/CAPABILITY");

        let mut dealer = fleet.clone();
        dealer.role = crate::role::Role::Dealer;
        let err = bulk(&pool, &dealer, &["1HGCM82633A004352".into(), "bad".into()], &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION/VIN");
        assert_eq!(logged(&pool).await, 0);

        let hits = bulk(
            &pool,
            &dealer,
            &["1HGCM82633A004352".into(), "ZZZZZZZZZZZZZZZZZ".into()],
            &ctx,
        )
        .await
        .unwrap();
        assert!(hits[0].vehicle.is_some());
        assert!(hits[1].vehicle.is_none());
        assert_eq!(logged(&pool).await, 2);
    }
}
