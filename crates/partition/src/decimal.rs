//! Native number encoding
//!
//! The partition store keeps numbers as decimal text. Integral values are
//! written as integer text; everything else with exactly nine fractional
//! digits (trailing zeros kept). Decoding follows the attribute type, and
//! encoding a decoded value reproduces the same text.

use storekit_core::{AttrType, StoreError, StoreResult, Value};

/// Fractional digits kept for non-integral numbers
pub const FRACTION_DIGITS: usize = 9;

/// Encode a float as native decimal text
///
/// # Errors
///
/// Returns `Validation` for NaN and infinities.
pub fn encode_f64(f: f64) -> StoreResult<String> {
    if !f.is_finite() {
        return Err(StoreError::validation(format!(
            "{} cannot be stored as a number",
            f
        )));
    }
    let fixed = format!("{:.*}", FRACTION_DIGITS, f);
    // Rounding to nine digits can land on an integer (2.9999999999 -> 3)
    match fixed.parse::<f64>() {
        Ok(rounded) if rounded.fract() == 0.0 => Ok(format!("{:.0}", rounded)),
        _ => Ok(fixed),
    }
}

/// Encode an integer as native decimal text
pub fn encode_i64(i: i64) -> String {
    i.to_string()
}

/// Encode a numeric value
pub fn encode(value: &Value) -> StoreResult<String> {
    match value {
        Value::Int(i) => Ok(encode_i64(*i)),
        Value::Float(f) => encode_f64(*f),
        other => Err(StoreError::validation(format!(
            "{} is not a number",
            other.type_name()
        ))),
    }
}

/// Decode native decimal text as `attr_type` (`INT` or `FLOAT`)
pub fn decode(text: &str, attr_type: AttrType) -> StoreResult<Value> {
    let invalid = || StoreError::backend(format!("invalid native number '{}'", text));
    match attr_type {
        AttrType::Int => match text.parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            // Integral values written through a FLOAT path
            Err(_) => text
                .parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::Int(f as i64))
                .ok_or_else(invalid),
        },
        AttrType::Float => text.parse::<f64>().map(Value::Float).map_err(|_| invalid()),
        other => Err(StoreError::backend(format!(
            "{} is not a numeric attribute type",
            other
        ))),
    }
}

/// Numeric ordering of two decimal texts
pub fn compare(a: &str, b: &str) -> Option<std::cmp::Ordering> {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => Some(a.cmp(&b)),
        _ => a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?),
    }
}
