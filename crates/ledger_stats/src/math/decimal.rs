//! String-encoded decimal arithmetic backed by `BigDecimal`.
//!
//! Amounts cross every boundary of the pipeline as base-10 strings. Binary
//! floating point never touches an amount.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("invalid decimal: {0:?}")]
    InvalidDecimal(String),
    #[error("division by zero")]
    DivisionByZero,
}

/// Parse a base-10 string. Rejects empty input, exponents, and anything `BigDecimal` accepts
/// that is not a plain signed decimal.
pub fn parse(s: &str) -> Result<BigDecimal, MathError> {
    let t = s.trim();
    if !is_numeric(t) {
        return Err(MathError::InvalidDecimal(s.to_string()));
    }
    BigDecimal::from_str(t).map_err(|_| MathError::InvalidDecimal(s.to_string()))
}

/// True for an optionally signed run of digits with at most one decimal point.
pub fn is_numeric(s: &str) -> bool {
    let body = s.strip_prefix('-').or_else(|| s.strip_prefix('+')).unwrap_or(s);
    if body.is_empty() || body == "." {
        return false;
    }
    let mut dots = 0;
    for c in body.chars() {
        match c {
            '0'..='9' => {}
            '.' => dots += 1,
            _ => return false,
        }
    }
    dots <= 1
}

/// Canonical string form: no exponent, no trailing fractional zeros.
pub fn format(d: &BigDecimal) -> String {
    if d.is_zero() {
        return "0".to_string();
    }
    d.normalized().to_plain_string()
}

pub fn add(a: &str, b: &str) -> Result<String, MathError> {
    Ok(format(&(parse(a)? + parse(b)?)))
}

pub fn sub(a: &str, b: &str) -> Result<String, MathError> {
    Ok(format(&(parse(a)? - parse(b)?)))
}

pub fn mul(a: &str, b: &str) -> Result<String, MathError> {
    Ok(format(&(parse(a)? * parse(b)?)))
}

pub fn div(a: &str, b: &str) -> Result<String, MathError> {
    Ok(format(&div_dec(&parse(a)?, &parse(b)?)?))
}

/// Division on parsed values. `BigDecimal` panics on a zero divisor, so the guard lives here.
pub fn div_dec(a: &BigDecimal, b: &BigDecimal) -> Result<BigDecimal, MathError> {
    if b.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    Ok(a / b)
}

/// Truncate toward zero.
pub fn integer_portion(x: &str) -> Result<String, MathError> {
    let d = parse(x)?;
    Ok(format(&d.with_scale_round(0, RoundingMode::Down)))
}
