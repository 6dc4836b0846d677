use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::{AppError, AppResult};

pub const MS_PER_DAY: i64 = 86_400_000;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// RFC 3339 rendering used by the JSON endpoints.
pub fn to_rfc3339(ms: i64) -> String {
    to_date(ms).to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn days_ago_ms(days: u32) -> i64 {
    now_ms() - i64::from(days) * MS_PER_DAY
}

/// Calendar dates travel as ISO `YYYY-MM-DD` strings.
#[allow(clippy::result_large_err)]
pub fn parse_date(field: &str, value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|err| {
        AppError::validation("DATE", format!("{field} must be a YYYY-MM-DD date"))
            .with_context("field", field.to_string())
            .with_context("value", value.to_string())
            .with_context("error", err.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn to_date_epoch() {
        let d = to_date(0);
        assert_eq!(d.timestamp_millis(), 0);
    }

    #[test]
    fn rfc3339_is_utc_with_millis() {
        assert_eq!(to_rfc3339(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("report_date", "2024-02-30").is_err());
        let err = parse_date("report_date", "yesterday").unwrap_err();
        assert_eq!(err.code(), "VALIDATION/DATE");
        assert_eq!(
            parse_date("report_date", "2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
