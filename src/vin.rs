use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub const VIN_INVALID: &str = "VALIDATION/VIN";

// 17 uppercase characters; I, O and Q never appear in a VIN.
static VIN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-HJ-NPR-Z0-9]{17}$").expect("vin validation pattern to compile"));

/// A syntactically valid Vehicle Identification Number.
///
/// Parsing is strict: no trimming and no case folding, so lookups are an exact
/// match on the stored key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Vin(String);

impl Vin {
    #[allow(clippy::result_large_err)]
    pub fn parse(value: &str) -> AppResult<Self> {
        if VIN_PATTERN.is_match(value) {
            Ok(Vin(value.to_string()))
        } else {
            Err(AppError::new(VIN_INVALID, "Invalid VIN format")
                .with_context("vin", value.chars().take(32).collect::<String>()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Vin {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vin::parse(s)
    }
}

impl TryFrom<String> for Vin {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Vin::parse(&value)
    }
}

impl From<Vin> for String {
    fn from(vin: Vin) -> Self {
        vin.0
    }
}

impl AsRef<str> for Vin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
