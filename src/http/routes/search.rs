use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::extract::{CurrentUser, JsonBody, MaybeUser};
use crate::model::{RequestContext, SearchQuery, SearchType};
use crate::pagination::PageParams;
use crate::search::{self, BulkHit, SearchParams, SearchResults, BULK_LIMIT};
use crate::state::AppState;
use crate::AppResult;

#[derive(Debug, Serialize)]
pub struct SearchForm {
    pub search_types: &'static [SearchType],
    pub bulk_limit: usize,
    pub recent_searches: Vec<SearchQuery>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub vins: Vec<String>,
}

/// Form metadata; logged-in callers also get their own recent searches.
pub async fn form(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Json<SearchForm>> {
    let recent_searches = match &user {
        Some(user) => search::recent(&state.pool, Some(&user.id), 5).await?,
        None => Vec::new(),
    };
    Ok(Json(SearchForm {
        search_types: SearchType::ALL,
        bulk_limit: BULK_LIMIT,
        recent_searches,
    }))
}

pub async fn results(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ctx: RequestContext,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<SearchResults>> {
    let requested = PageParams {
        page: params.page.clone(),
    }
    .requested();
    let results = search::search(
        &state.pool,
        user.as_ref(),
        &params,
        requested,
        state.search_settings(),
        &ctx,
    )
    .await?;
    Ok(Json(results))
}

pub async fn bulk(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ctx: RequestContext,
    JsonBody(body): JsonBody<BulkRequest>,
) -> AppResult<Json<Vec<BulkHit>>> {
    Ok(Json(search::bulk(&state.pool, &user, &body.vins, &ctx).await?))
}
