pub mod pagination;

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};

pub fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

pub fn to_iso_opt(dt: Option<NaiveDateTime>) -> Option<String> {
    dt.map(to_iso)
}

/// Fixed two-decimal wire representation for monetary amounts.
pub fn money_string(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}

/// `(numerator / denominator) * 100`, rounded to two decimals. A zero
/// denominator yields 0, never NaN.
pub fn percentage(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    let raw = numerator as f64 / denominator as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Rolling report windows on the wire map to fixed day offsets.
pub fn period_days(period: &str) -> Option<i64> {
    match period {
        "7d" => Some(7),
        "30d" => Some(30),
        "90d" => Some(90),
        "1y" => Some(365),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    chrono::NaiveDate::from_str(value)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn is_valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// Distinguishes an omitted JSON field from an explicit null when a PUT
/// body may clear a nullable column.
pub enum NullablePatch {
    Omitted,
    Clear,
    Value(String),
}

pub fn nullable_patch(field: Option<&serde_json::Value>) -> Result<NullablePatch, String> {
    match field {
        None => Ok(NullablePatch::Omitted),
        Some(serde_json::Value::Null) => Ok(NullablePatch::Clear),
        Some(serde_json::Value::String(s)) => Ok(NullablePatch::Value(s.clone())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}
