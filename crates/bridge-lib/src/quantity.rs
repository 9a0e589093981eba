//! Conversion of Kubernetes resource quantities to floating point
//!
//! Quantities are strings such as `250m`, `4Gi` or `1e3`. The gauges only
//! need an approximate `f64`, so precision beyond what a double can hold
//! is dropped.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

/// Errors produced while converting a quantity
#[derive(Debug, Error, PartialEq)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid quantity number in {0:?}")]
    InvalidNumber(String),

    #[error("unknown quantity suffix in {0:?}")]
    InvalidSuffix(String),

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// Convert a quantity to its approximate floating point value
pub fn approximate_f64(quantity: &Quantity) -> Result<f64, QuantityError> {
    parse(&quantity.0)
}

/// Parse the quantity grammar: `<signedNumber><suffix>`
pub fn parse(raw: &str) -> Result<f64, QuantityError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);

    if number.is_empty() || !number.chars().any(|c| c.is_ascii_digit()) {
        return Err(QuantityError::InvalidNumber(raw.to_string()));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| QuantityError::InvalidNumber(raw.to_string()))?;

    let multiplier =
        multiplier(suffix).ok_or_else(|| QuantityError::InvalidSuffix(raw.to_string()))?;

    if value == 0.0 {
        return Ok(0.0);
    }
    let result = value * multiplier;
    if !result.is_finite() {
        return Err(QuantityError::OutOfRange(raw.to_string()));
    }
    Ok(result)
}

fn multiplier(suffix: &str) -> Option<f64> {
    let value = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return exponent(suffix),
    };
    Some(value)
}

/// Decimal exponent suffix, e.g. `e3` or `E-2`
fn exponent(suffix: &str) -> Option<f64> {
    let digits = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
    let unsigned = digits.strip_prefix(['+', '-']).unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let power: i32 = digits.parse().ok()?;
    Some(10f64.powi(power))
}
