//! Startup configuration.
//!
//! Built once (defaults, then an optional JSON file, then `AUTOSENTINEL_*`
//! environment variables, then CLI overrides) and handed to the router state.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub const CONFIG_INVALID: &str = "CONFIG/INVALID";
const ENV_PREFIX: &str = "AUTOSENTINEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSizes {
    pub search: u32,
    pub vehicles: u32,
    pub reports: u32,
    pub crowdsourced: u32,
    pub audit: u32,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            search: 20,
            vehicles: 24,
            reports: 20,
            crowdsourced: 20,
            audit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTiers {
    pub basic_cents: i64,
    pub standard_cents: i64,
    pub premium_cents: i64,
}

impl Default for PricingTiers {
    fn default() -> Self {
        Self {
            basic_cents: 999,
            standard_cents: 2499,
            premium_cents: 4999,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub search_days: u32,
    pub telemetry_days: u32,
    pub audit_days: u32,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            search_days: 30,
            telemetry_days: 90,
            audit_days: 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    pub report_price_cents: i64,
    pub pricing: PricingTiers,
    pub page_sizes: PageSizes,
    pub telemetry_window: u32,
    pub session_ttl_hours: u32,
    pub password_iterations: u32,
    pub search_cache_ttl_secs: u32,
    pub search_response_target_ms: u64,
    pub report_generation_timeout_secs: u64,
    pub retention: Retention,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            db_path: default_db_path(),
            log_dir: None,
            log_format: LogFormat::default(),
            report_price_cents: 2999,
            pricing: PricingTiers::default(),
            page_sizes: PageSizes::default(),
            telemetry_window: 100,
            session_ttl_hours: 24 * 7,
            password_iterations: crate::accounts::password::DEFAULT_ITERATIONS,
            search_cache_ttl_secs: 300,
            search_response_target_ms: 500,
            report_generation_timeout_secs: 10,
            retention: Retention::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("autosentinel"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autosentinel.sqlite3")
}

fn invalid(field: &str, message: impl Into<String>) -> AppError {
    AppError::new(CONFIG_INVALID, message).with_context("field", field.to_string())
}

impl AppConfig {
    /// Defaults, overlaid by `path` when given, overlaid by the process
    /// environment.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Same layering as [`AppConfig::load`]. A `Some` env map stands in for
    /// the process environment.
    ///
    /// Keys are `AUTOSENTINEL_<FIELD>`, with `__` between nested fields:
    /// `AUTOSENTINEL_PAGE_SIZES__AUDIT=10`.
    #[allow(clippy::result_large_err)]
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> AppResult<Self> {
        let defaults = serde_json::to_string(&Self::default())?;
        let mut builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut config = builder
            .build()
            .and_then(Config::try_deserialize::<AppConfig>)
            .map_err(|err| {
                let app = AppError::new(CONFIG_INVALID, err.to_string());
                match path {
                    Some(path) => app.with_context("path", path.display().to_string()),
                    None => app,
                }
            })?;
        if config.log_dir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
            config.log_dir = None;
        }
        config.validate()?;
        Ok(config)
    }

    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> AppResult<()> {
        let pages = &self.page_sizes;
        for (field, size) in [
            ("page_sizes.search", pages.search),
            ("page_sizes.vehicles", pages.vehicles),
            ("page_sizes.reports", pages.reports),
            ("page_sizes.crowdsourced", pages.crowdsourced),
            ("page_sizes.audit", pages.audit),
        ] {
            if size == 0 {
                return Err(invalid(field, "page sizes must be positive"));
            }
        }
        if self.report_price_cents <= 0 {
            return Err(invalid("report_price_cents", "report price must be positive"));
        }
        if self.report_generation_timeout_secs == 0 {
            return Err(invalid(
                "report_generation_timeout_secs",
                "report generation timeout must be positive",
            ));
        }
        if self.telemetry_window == 0 {
            return Err(invalid("telemetry_window", "telemetry window must be positive"));
        }
        if self.session_ttl_hours == 0 {
            return Err(invalid("session_ttl_hours", "session ttl must be positive"));
        }
        if self.password_iterations == 0 {
            return Err(invalid("password_iterations", "password iterations must be positive"));
        }
        Ok(())
    }

    pub fn session_ttl_ms(&self) -> i64 {
        i64::from(self.session_ttl_hours) * 3_600_000
    }
}
