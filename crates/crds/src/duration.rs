//! Go-style duration strings (`30s`, `1m30s`, `1.5h`, `250ms`).
//!
//! `spec.interval` uses the same format as `metav1.Duration`, so existing
//! manifests keep working.

use crate::error::SpecError;
use std::time::Duration;

/// Parse a duration string made of one or more `<number><unit>` segments.
///
/// Supported units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. A bare `0` is
/// accepted as zero. Signs are not accepted.
pub fn parse_duration(input: &str) -> Result<Duration, SpecError> {
    let invalid = || SpecError::InvalidDuration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_end == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_end].parse().map_err(|_| invalid())?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 6e10,
            "h" => 3.6e12,
            _ => return Err(invalid()),
        };
        total_nanos += value * nanos_per_unit;
        rest = &rest[unit_end..];
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
