//! Lenient numeric parsing for tariff figures.
//!
//! The upstream sends rates as locale-formatted strings such as `"1 234,56"` or
//! `"46"`, and uses `"-"` for "no tariff".

use serde_json::Value;

/// Parse a numeric-like string into a finite `f64`.
///
/// Whitespace (including U+00A0 and U+202F) is removed and the first decimal comma
/// becomes a point. Anything that still does not parse to a finite number yields `None`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '\u{a0}' && *ch != '\u{202f}')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let cleaned = cleaned.replacen(',', ".", 1);
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Numeric view of an arbitrary JSON scalar.
///
/// Finite JSON numbers pass through, strings go through [`parse_decimal`], everything
/// else is unparsable.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|value| value.is_finite()),
        Value::String(text) => parse_decimal(text),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Rate column value: the parsed number, or `NaN` when absent or unparsable.
pub fn rate_or_nan(value: &Value) -> f64 {
    to_number(value).unwrap_or(f64::NAN)
}
