use chrono::{DateTime, NaiveDateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;

use crate::error::ApiError;

pub fn chrono_to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parse a client-submitted session timestamp.
///
/// Timestamps without a timezone suffix are read as UTC, never local time.
/// This is a fixed wire contract shared with the frontend; both sides store
/// and compare instants under that convention.
pub fn parse_session_date(input: &str) -> Result<DateTime<Utc>, ApiError> {
    let trimmed = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(ApiError::Validation(format!(
        "Invalid session_date: '{}' is not an ISO-8601 timestamp",
        input
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn naive_timestamp_is_read_as_utc() {
        let parsed = parse_session_date("2025-08-15T09:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn naive_timestamp_without_seconds() {
        let parsed = parse_session_date("2025-08-15T09:30").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn offset_timestamp_is_converted_to_utc() {
        let parsed = parse_session_date("2025-08-15T10:00:00+01:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn zulu_suffix_is_accepted() {
        let parsed = parse_session_date("2025-08-15T09:00:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_session_date("next tuesday").is_err());
        assert!(parse_session_date("").is_err());
    }

    #[test]
    fn bson_roundtrip_keeps_millis() {
        let dt = Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap();
        assert_eq!(chrono_to_bson(dt).timestamp_millis(), dt.timestamp_millis());
    }
}
