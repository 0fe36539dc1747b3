//! Field extraction helpers for vendor JSON. Every failure is a `Schema`
//! error naming the record and the field.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Vendor timestamps without a colon in the offset (`+0000`).
const COMPACT_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

pub(crate) fn schema(context: &str, message: impl std::fmt::Display) -> SyncError {
    SyncError::Schema(format!("{}: {}", context, message))
}

pub(crate) fn present<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

pub(crate) fn opt_str(value: &Value, key: &str) -> Option<String> {
    present(value, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn req_str(value: &Value, key: &str, context: &str) -> SyncResult<String> {
    opt_str(value, key).ok_or_else(|| schema(context, format!("missing '{}'", key)))
}

/// Numbers arrive as JSON numbers or numeric strings depending on vendor.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn opt_number(value: &Value, key: &str, context: &str) -> SyncResult<Option<f64>> {
    match present(value, key) {
        None => Ok(None),
        Some(v) => number(v)
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| schema(context, format!("'{}' is not a number", key))),
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, COMPACT_OFFSET_FORMAT))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub(crate) fn req_timestamp(value: &Value, key: &str, context: &str) -> SyncResult<DateTime<Utc>> {
    let raw = req_str(value, key, context)?;
    parse_timestamp(&raw).ok_or_else(|| schema(context, format!("'{}' is not a timestamp: {}", key, raw)))
}

/// Missing or null arrays read as empty.
pub(crate) fn opt_array<'a>(value: &'a Value, key: &str, context: &str) -> SyncResult<&'a [Value]> {
    match present(value, key) {
        None => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(schema(context, format!("'{}' is not an array", key))),
    }
}

/// Accepts `{ <key>: [...] }` or a bare array.
pub(crate) fn unwrap_envelope<'a>(raw: &'a Value, key: &str) -> SyncResult<&'a [Value]> {
    match raw {
        Value::Array(items) => Ok(items.as_slice()),
        Value::Object(_) => opt_array(raw, key, "response"),
        _ => Err(schema("response", "expected an object or an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_numbers_from_strings() {
        assert_eq!(number(&json!("2")), Some(2.0));
        assert_eq!(number(&json!(1.5)), Some(1.5));
        assert_eq!(number(&json!("two")), None);
        assert!(opt_number(&json!({"q": "x"}), "q", "order 1").is_err());
        assert_eq!(opt_number(&json!({"q": null}), "q", "order 1").unwrap(), None);
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-10T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-10T12:00:00.000+0000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-10T09:00:00-03:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_envelopes() {
        assert_eq!(unwrap_envelope(&json!([1, 2]), "orders").unwrap().len(), 2);
        assert_eq!(unwrap_envelope(&json!({"orders": [1]}), "orders").unwrap().len(), 1);
        assert!(unwrap_envelope(&json!({}), "orders").unwrap().is_empty());
        assert!(unwrap_envelope(&json!({"orders": 3}), "orders").is_err());
        assert!(unwrap_envelope(&json!("x"), "orders").is_err());
    }

    #[test]
    fn test_blank_strings_are_missing() {
        let v = json!({"id": "  "});
        assert_eq!(opt_str(&v, "id"), None);
        assert!(matches!(req_str(&v, "id", "order"), Err(SyncError::Schema(_))));
    }
}
