//! Error type shared by every repository and handler.
//!
//! Codes are `FAMILY/SUBJECT`. The family alone decides the HTTP status (see
//! [`ErrorKind`]); anything outside the known families is internal and its
//! message never reaches a client.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::error::ErrorKind as DbErrorKind;
use sqlx::Error as SqlxError;

/// A structured error that handlers turn into a JSON body and status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable `FAMILY/SUBJECT` code.
    pub code: String,
    /// Safe to show to the caller unless the kind is internal.
    pub message: String,
    /// Key/value pairs for logs; never rendered to the caller.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Nested cause preserving the original error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Response class derived from the code family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthenticated,
    Forbidden,
    Validation,
    Conflict,
    Internal,
}

impl AppError {
    /// Used when an upstream error carries no code of its own.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Raw unique-constraint failure before a caller renames it.
    pub const UNIQUE_VIOLATION: &'static str = "CONFLICT/UNIQUE";

    /// Construct an error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    /// `NOT_FOUND/<subject>`, rendered as 404.
    pub fn not_found(subject: &str, message: impl Into<String>) -> Self {
        AppError::new(format!("NOT_FOUND/{subject}"), message)
    }

    /// The request carried no usable session.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        AppError::new("AUTH/REQUIRED", message)
    }

    /// `FORBIDDEN/<subject>`: authenticated but not allowed.
    pub fn forbidden(subject: &str, message: impl Into<String>) -> Self {
        AppError::new(format!("FORBIDDEN/{subject}"), message)
    }

    /// `VALIDATION/<subject>`: the input itself is wrong.
    pub fn validation(subject: &str, message: impl Into<String>) -> Self {
        AppError::new(format!("VALIDATION/{subject}"), message)
    }

    /// `CONFLICT/<subject>`: the input clashes with stored state.
    pub fn conflict(subject: &str, message: impl Into<String>) -> Self {
        AppError::new(format!("CONFLICT/{subject}"), message)
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Classify by the code family. Unknown families are internal.
    pub fn kind(&self) -> ErrorKind {
        match self.code.split('/').next().unwrap_or_default() {
            "NOT_FOUND" => ErrorKind::NotFound,
            "AUTH" => ErrorKind::Unauthenticated,
            "FORBIDDEN" => ErrorKind::Forbidden,
            "VALIDATION" => ErrorKind::Validation,
            "CONFLICT" => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }

    /// Adds a contextual key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Swap a raw unique-constraint failure for the caller's domain error.
    /// Any other error passes through untouched.
    pub fn on_unique_violation(self, domain: impl FnOnce() -> AppError) -> Self {
        if self.code == Self::UNIQUE_VIOLATION {
            domain()
        } else {
            self
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            write!(f, " ({:?})", self.context)?;
        }
        Ok(())
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

// anyhow's blanket impl already covers AppError -> anyhow::Error.
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        fn walk(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }
            let mut node = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            node.cause = err.source().map(|source| Box::new(walk(source)));
            node
        }
        walk(error.as_ref())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        let app = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app.with_context("os_code", os_code.to_string()),
            None => app,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_eof() {
            "JSON/SYNTAX"
        } else if error.is_data() {
            "JSON/DATA"
        } else {
            "JSON/IO"
        };
        AppError::new(code, error.to_string())
            .with_context("line", error.line().to_string())
            .with_context("column", error.column().to_string())
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("DB/ROW_NOT_FOUND", "Record not found"),
            SqlxError::PoolTimedOut => {
                AppError::new("DB/POOL_TIMEOUT", "Timed out acquiring a database connection")
            }
            SqlxError::PoolClosed => AppError::new("DB/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlite"),
            SqlxError::Database(db) => {
                // Uniqueness is a caller conflict; dangling references and CHECK
                // failures mean the request carried bad data.
                let code = match db.kind() {
                    DbErrorKind::UniqueViolation => Self::UNIQUE_VIOLATION.to_string(),
                    DbErrorKind::ForeignKeyViolation => "VALIDATION/REFERENCE".to_string(),
                    DbErrorKind::CheckViolation | DbErrorKind::NotNullViolation => {
                        "VALIDATION/CONSTRAINT".to_string()
                    }
                    _ => db
                        .code()
                        .map(|code| format!("DB/SQLITE_{code}"))
                        .unwrap_or_else(|| "DB/DATABASE".to_string()),
                };
                let app = AppError::new(code, db.message().to_string());
                match db.constraint() {
                    Some(constraint) => app.with_context("constraint", constraint.to_string()),
                    None => app,
                }
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("DB/DECODE", source.to_string()).with_context("column", index)
            }
            SqlxError::Decode(err) => AppError::new("DB/DECODE", err.to_string()),
            other => AppError::new("DB/ERROR", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_follows_code_family() {
        assert_eq!(
            AppError::not_found("VEHICLE", "Vehicle not found").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AppError::forbidden("TRACKING", "Tracking not enabled").kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(AppError::unauthenticated("login").kind(), ErrorKind::Unauthenticated);
        assert_eq!(AppError::validation("VIN", "bad").kind(), ErrorKind::Validation);
        assert_eq!(AppError::conflict("X", "dup").kind(), ErrorKind::Conflict);
        assert_eq!(AppError::new("DB/ERROR", "boom").kind(), ErrorKind::Internal);
        assert_eq!(AppError::new("nofamily", "plain").kind(), ErrorKind::Internal);
    }

    #[test]
    fn unique_violation_is_swapped_for_domain_error() {
        let raw = AppError::new(AppError::UNIQUE_VIOLATION, "UNIQUE constraint failed: users.username");
        let swapped = raw.on_unique_violation(|| AppError::validation("DUPLICATE_USERNAME", "taken"));
        assert_eq!(swapped.code(), "VALIDATION/DUPLICATE_USERNAME");

        let other = AppError::new("DB/ERROR", "disk full")
            .on_unique_violation(|| AppError::validation("DUPLICATE_USERNAME", "taken"));
        assert_eq!(other.code(), "DB/ERROR");
    }

    #[test]
    fn anyhow_chain_becomes_nested_causes() {
        let err = (|| -> anyhow::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
                .context("failed to write audit row")
        })()
        .unwrap_err();

        let app = AppError::from(err);
        assert_eq!(app.code(), AppError::UNKNOWN_CODE);
        assert_eq!(app.message(), "failed to write audit row");
        let cause = app.cause().expect("io cause present");
        assert!(cause.message().contains("disk full"));
    }

    #[test]
    fn anyhow_round_trip_keeps_app_error() {
        let inner = AppError::conflict("ALREADY_PURCHASED", "nope").with_context("report_id", "r1");
        let converted = AppError::from(anyhow::Error::from(inner.clone()));
        assert_eq!(converted, inner);
    }

    #[test]
    fn display_includes_context_when_present() {
        let bare = AppError::not_found("REPORT", "Report not found");
        assert_eq!(bare.to_string(), "[NOT_FOUND/REPORT] Report not found");
        let rich = bare.with_context("report_id", "r9");
        assert!(rich.to_string().contains("r9"));
    }

    #[test]
    fn bad_config_json_is_a_syntax_error() {
        let err = serde_json::from_str::<serde_json::Value>("{\"bind\": }").expect_err("invalid json");
        let app = AppError::from(err);
        assert_eq!(app.code(), "JSON/SYNTAX");
        assert_eq!(app.context().get("line").map(String::as_str), Some("1"));
    }

    #[test]
    fn missing_row_is_internal() {
        let app = AppError::from(SqlxError::RowNotFound);
        assert_eq!(app.code(), "DB/ROW_NOT_FOUND");
        assert_eq!(app.kind(), ErrorKind::Internal);
    }
}
