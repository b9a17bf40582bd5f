//! Query input validation.
//!
//! Turns raw caller input (compact duration tokens and string-valued
//! numeric bounds) into typed durations and an ordered predicate list.
//! Everything here runs before the store is touched.

use chrono::Duration;
use serde::Deserialize;

use crate::storage::predicate::{Comparator, Field, Predicate};
use crate::types::ValidationError;

/// Longest accepted window or offset.
const MAX_DURATION_SECS: u64 = 366 * 24 * 3600;

/// Raw numeric bounds as supplied by the caller. All are strict.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub temp_lt: Option<String>,
    pub temp_gt: Option<String>,
    pub wind_lt: Option<String>,
    pub wind_gt: Option<String>,
}

impl FilterParams {
    /// Validate and convert into predicates. At least one bound is required
    /// and every supplied bound must be a finite number.
    pub fn to_predicates(&self) -> Result<Vec<Predicate>, ValidationError> {
        let bounds = [
            ("temp_gt", &self.temp_gt, Field::Temperature, Comparator::GreaterThan),
            ("temp_lt", &self.temp_lt, Field::Temperature, Comparator::LessThan),
            ("wind_gt", &self.wind_gt, Field::WindSpeed, Comparator::GreaterThan),
            ("wind_lt", &self.wind_lt, Field::WindSpeed, Comparator::LessThan),
        ];

        if bounds.iter().all(|(_, raw, _, _)| raw.is_none()) {
            return Err(ValidationError::MissingFilter);
        }

        bounds
            .into_iter()
            .filter_map(|(param, raw, field, comparator)| raw.as_ref().map(|v| (param, v, field, comparator)))
            .map(|(param, raw, field, comparator)| {
                let bound = parse_bound(param, raw)?;
                Ok(Predicate::new(field, comparator, bound))
            })
            .collect()
    }
}

fn parse_bound(param: &'static str, raw: &str) -> Result<f64, ValidationError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NonNumericFilter { param, value: raw.to_string() })
}

/// Parse the trailing window (`as_of`). A bare number means minutes.
/// The window must be positive.
pub fn parse_window(raw: Option<&str>, default: &str) -> Result<Duration, ValidationError> {
    let token = raw.unwrap_or(default);
    let window = parse_duration_token(token, 60).ok_or_else(|| invalid("as_of", token))?;
    if window.is_zero() {
        return Err(invalid("as_of", token));
    }
    Ok(window)
}

/// Parse the forward offset (`in`). A bare number means hours.
pub fn parse_offset(raw: Option<&str>, default: &str) -> Result<Duration, ValidationError> {
    let token = raw.unwrap_or(default);
    parse_duration_token(token, 3600).ok_or_else(|| invalid("in", token))
}

fn invalid(param: &'static str, token: &str) -> ValidationError {
    ValidationError::InvalidDuration { param, value: token.to_string() }
}

/// `<digits>[s|m|h|d]`; the unit defaults to `bare_unit_secs`.
fn parse_duration_token(token: &str, bare_unit_secs: u64) -> Option<Duration> {
    let token = token.trim();
    let split = token.find(|c: char| !c.is_ascii_digit()).unwrap_or(token.len());
    let (digits, unit) = token.split_at(split);
    if digits.is_empty() {
        return None;
    }

    let unit_secs = match unit {
        "" => bare_unit_secs,
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };

    let secs = digits.parse::<u64>().ok()?.checked_mul(unit_secs)?;
    if secs > MAX_DURATION_SECS {
        return None;
    }
    i64::try_from(secs).ok().map(Duration::seconds)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
