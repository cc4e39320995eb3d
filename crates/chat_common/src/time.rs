//! Timestamp normalization
//!
//! The server reports `created_at` as epoch seconds, epoch milliseconds or an
//! ISO 8601 string depending on the code path. Everything is normalized to
//! epoch milliseconds.

use crate::{ChatError, Result};
use chrono::{DateTime, NaiveDateTime};

/// Offset-less forms (database rows), read as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Integers above this are already milliseconds
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Normalize an integer epoch value (seconds or milliseconds)
pub fn normalize_epoch(value: i64) -> i64 {
    if value.abs() > MILLIS_THRESHOLD {
        value
    } else {
        value.saturating_mul(1000)
    }
}

/// Normalize a floating point epoch value (e.g. `Date.now() / 1000`)
pub fn normalize_epoch_f64(value: f64) -> Result<i64> {
    if !value.is_finite() {
        return Err(ChatError::InvalidTimestamp(value.to_string()));
    }
    if value.abs() > MILLIS_THRESHOLD as f64 {
        Ok(value.round() as i64)
    } else {
        Ok((value * 1000.0).round() as i64)
    }
}

/// Normalize a string timestamp: numeric strings follow the epoch rule,
/// anything else must be RFC 3339 or an offset-less ISO 8601 date-time.
pub fn parse_timestamp(value: &str) -> Result<i64> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(normalize_epoch(n));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return normalize_epoch_f64(f);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
        .ok_or_else(|| ChatError::InvalidTimestamp(value.to_string()))
}

/// Normalize a JSON timestamp value
pub fn from_json(value: &serde_json::Value) -> Result<i64> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(normalize_epoch(i))
            } else if let Some(f) = n.as_f64() {
                normalize_epoch_f64(f)
            } else {
                Err(ChatError::InvalidTimestamp(n.to_string()))
            }
        }
        serde_json::Value::String(s) => parse_timestamp(s),
        other => Err(ChatError::InvalidTimestamp(other.to_string())),
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seconds_and_millis() {
        assert_eq!(normalize_epoch(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_epoch(1_700_000_000_123), 1_700_000_000_123);
    }

    #[test]
    fn test_rfc3339() {
        let ms = parse_timestamp("2023-11-14T22:13:20Z").unwrap();
        assert_eq!(ms, 1_700_000_000_000);

        let offset = parse_timestamp("2023-11-15T06:13:20+08:00").unwrap();
        assert_eq!(offset, 1_700_000_000_000);
    }

    #[test]
    fn test_naive_datetime_is_utc() {
        assert_eq!(parse_timestamp("2024-01-01 12:00:00").unwrap(), 1_704_110_400_000);
        assert_eq!(parse_timestamp("2024-01-01T12:00:00").unwrap(), 1_704_110_400_000);
        assert_eq!(parse_timestamp("2024-01-01T12:00:00.123").unwrap(), 1_704_110_400_123);
        assert_eq!(parse_timestamp(" 2024-01-01 12:00:00.5 ").unwrap(), 1_704_110_400_500);
        assert!(parse_timestamp("2024-01-01").is_err());
        assert!(parse_timestamp("2024-13-01 12:00:00").is_err());
    }

    #[test]
    fn test_json_values() {
        assert_eq!(from_json(&json!(1_700_000_000)).unwrap(), 1_700_000_000_000);
        assert_eq!(from_json(&json!("1700000000")).unwrap(), 1_700_000_000_000);
        assert_eq!(from_json(&json!(1_700_000_000.5)).unwrap(), 1_700_000_000_500);
        assert!(from_json(&json!(null)).is_err());
        assert!(from_json(&json!("yesterday")).is_err());
    }
}
