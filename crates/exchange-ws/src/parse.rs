//! Field extraction helpers shared by the wire protocols.
//!
//! Exchanges disagree on whether numerics are JSON strings (`"67000.5"`) or
//! numbers (`67000.5`), and some switch between the two across channels.
//! Every helper here accepts both.

use chrono::{DateTime, TimeZone, Utc};
use cryptoarb_core::{PriceLevel, SymbolError};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Faults in a single inbound message. The message is dropped; the
/// connection stays up.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid number in {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid price level: {0}")]
    InvalidLevel(String),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    /// The exchange rejected a request (bad subscription, rate limit).
    #[error("exchange rejected request: {0}")]
    Rejected(String),

    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}

/// Parses a decimal from a JSON string or number.
///
/// # Errors
/// Returns [`ParseError::InvalidNumber`] for any other value or unparseable text.
pub fn decimal(value: &Value, field: &'static str) -> Result<Decimal, ParseError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ParseError::InvalidNumber {
                field,
                value: other.to_string(),
            })
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| ParseError::InvalidNumber { field, value: text })
}

/// Looks up `field` on `object` and parses it as a decimal.
///
/// # Errors
/// Returns [`ParseError::MissingField`] when absent, otherwise as [`decimal`].
pub fn decimal_field(object: &Value, field: &'static str) -> Result<Decimal, ParseError> {
    let value = object.get(field).ok_or(ParseError::MissingField(field))?;
    decimal(value, field)
}

/// Like [`decimal_field`] but maps absent, null and empty-string values to `None`.
///
/// # Errors
/// Returns [`ParseError::InvalidNumber`] for present but unparseable values.
pub fn optional_decimal_field(
    object: &Value,
    field: &'static str,
) -> Result<Option<Decimal>, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => decimal(value, field).map(Some),
    }
}

/// Parses an unsigned integer from a JSON string or number.
///
/// # Errors
/// Returns [`ParseError::MissingField`] or [`ParseError::InvalidNumber`].
pub fn u64_field(object: &Value, field: &'static str) -> Result<u64, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ParseError::MissingField(field)),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: n.to_string(),
        }),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| ParseError::InvalidNumber {
            field,
            value: s.clone(),
        }),
        Some(other) => Err(ParseError::InvalidNumber {
            field,
            value: other.to_string(),
        }),
    }
}

/// Parses a signed integer (OKX uses `-1` as "no previous sequence").
///
/// # Errors
/// Returns [`ParseError::MissingField`] or [`ParseError::InvalidNumber`].
pub fn i64_field(object: &Value, field: &'static str) -> Result<i64, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ParseError::MissingField(field)),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: n.to_string(),
        }),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| ParseError::InvalidNumber {
            field,
            value: s.clone(),
        }),
        Some(other) => Err(ParseError::InvalidNumber {
            field,
            value: other.to_string(),
        }),
    }
}

/// Returns `object[field]` as a string slice.
///
/// # Errors
/// Returns [`ParseError::MissingField`] when absent or not a string.
pub fn str_field<'a>(object: &'a Value, field: &'static str) -> Result<&'a str, ParseError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField(field))
}

/// Parses a `[[price, qty, ...], ...]` array. Extra trailing elements
/// (order counts, liquidation flags) are ignored.
///
/// # Errors
/// Returns [`ParseError::InvalidLevel`] when an entry is not an array of at
/// least two numerics.
pub fn levels(value: &Value, field: &'static str) -> Result<Vec<PriceLevel>, ParseError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ParseError::InvalidLevel(format!("{field} is not an array")))?;

    entries
        .iter()
        .map(|entry| match entry.as_array().map(Vec::as_slice) {
            Some([price, quantity, ..]) => Ok(PriceLevel::new(
                decimal(price, field)?,
                decimal(quantity, field)?,
            )),
            _ => Err(ParseError::InvalidLevel(entry.to_string())),
        })
        .collect()
}

/// Like [`levels`] but treats an absent side as empty.
///
/// # Errors
/// As [`levels`].
pub fn levels_field(object: &Value, field: &'static str) -> Result<Vec<PriceLevel>, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => levels(value, field),
    }
}

/// Converts an exchange millisecond timestamp, falling back to now.
#[must_use]
pub fn timestamp_millis(millis: Option<i64>) -> DateTime<Utc> {
    millis
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_accepts_string_and_number() {
        assert_eq!(decimal(&json!("67000.50"), "p").unwrap(), dec!(67000.50));
        assert_eq!(decimal(&json!(67000.5), "p").unwrap(), dec!(67000.5));
        assert_eq!(decimal(&json!(42), "p").unwrap(), dec!(42));
        assert_eq!(decimal(&json!("1e-5"), "p").unwrap(), dec!(0.00001));
    }

    #[test]
    fn test_decimal_rejects_garbage() {
        assert!(matches!(
            decimal(&json!("abc"), "price"),
            Err(ParseError::InvalidNumber { field: "price", .. })
        ));
        assert!(decimal(&json!(true), "price").is_err());
        assert!(decimal(&json!(null), "price").is_err());
    }

    #[test]
    fn test_optional_decimal_field() {
        let object = json!({"a": "", "b": null, "c": "1.5"});
        assert_eq!(optional_decimal_field(&object, "a").unwrap(), None);
        assert_eq!(optional_decimal_field(&object, "b").unwrap(), None);
        assert_eq!(optional_decimal_field(&object, "c").unwrap(), Some(dec!(1.5)));
        assert_eq!(optional_decimal_field(&object, "d").unwrap(), None);
    }

    #[test]
    fn test_integer_fields() {
        let object = json!({"seq": 42, "prev": "-1", "s": "17"});
        assert_eq!(u64_field(&object, "seq").unwrap(), 42);
        assert_eq!(u64_field(&object, "s").unwrap(), 17);
        assert_eq!(i64_field(&object, "prev").unwrap(), -1);
        assert!(matches!(
            u64_field(&object, "missing"),
            Err(ParseError::MissingField("missing"))
        ));
    }

    #[test]
    fn test_levels_mixed_encoding_and_extra_columns() {
        let value = json!([["100.5", "2"], [100.25, 3.5], ["100", "0", "0", "4"]]);
        let parsed = levels(&value, "bids").unwrap();
        assert_eq!(
            parsed,
            vec![
                PriceLevel::new(dec!(100.5), dec!(2)),
                PriceLevel::new(dec!(100.25), dec!(3.5)),
                PriceLevel::new(dec!(100), dec!(0)),
            ]
        );
    }

    #[test]
    fn test_levels_rejects_short_entries() {
        assert!(matches!(
            levels(&json!([["100"]]), "asks"),
            Err(ParseError::InvalidLevel(_))
        ));
        assert!(levels(&json!({"p": 1}), "asks").is_err());
    }

    #[test]
    fn test_levels_field_missing_is_empty() {
        assert!(levels_field(&json!({}), "b").unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_millis() {
        let ts = timestamp_millis(Some(1_700_000_000_000));
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
