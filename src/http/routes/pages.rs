//! Public pages and the statistics page.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::PricingTiers;
use crate::http::extract::CurrentUser;
use crate::state::AppState;
use crate::stats::{self, HomePage, Statistics};
use crate::AppResult;

#[derive(Debug, Serialize)]
pub struct About {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Pricing {
    pub report_price_cents: i64,
    pub tiers: PricingTiers,
}

pub async fn home(State(state): State<AppState>) -> AppResult<Json<HomePage>> {
    Ok(Json(stats::home(&state.pool).await?))
}

pub async fn about() -> Json<About> {
    Json(About {
        name: "AutoSentinel",
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
    })
}

pub async fn pricing(State(state): State<AppState>) -> Json<Pricing> {
    Json(Pricing {
        report_price_cents: state.config.report_price_cents,
        tiers: state.config.pricing.clone(),
    })
}

pub async fn statistics(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> AppResult<Json<Statistics>> {
    Ok(Json(stats::statistics(&state.pool).await?))
}
