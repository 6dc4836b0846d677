use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::reports::ReportSettings;
use crate::search::SearchSettings;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            per_page: self.config.page_sizes.search,
            slow_ms: self.config.search_response_target_ms,
        }
    }

    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            price_cents: self.config.report_price_cents,
            timeout: Duration::from_secs(self.config.report_generation_timeout_secs),
            telemetry_window: self.config.telemetry_window,
        }
    }
}
