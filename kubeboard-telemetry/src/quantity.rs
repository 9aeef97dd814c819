//! Quantity parsing for Kubernetes resource values.
//!
//! CPU decodes to cores, memory and disk to bytes. Binary (`Ki`, powers of
//! 1024) and decimal (`k`, powers of 1000) suffixes use different bases and
//! must never be conflated.

use crate::errors::DecodeError;

/// Parse a Kubernetes CPU quantity string to cores.
///
/// Accepts a plain decimal (`"1.5"` → 1.5 cores) or the fractional suffixes
/// the apiserver emits: `m` (milli), `u` (micro), `n` (nano).
pub fn decode_cpu(s: &str) -> Result<f64, DecodeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (num, divisor) = if let Some(n) = s.strip_suffix('m') {
        (n, 1000.0)
    } else if let Some(n) = s.strip_suffix('u') {
        (n, 1_000_000.0)
    } else if let Some(n) = s.strip_suffix('n') {
        (n, 1_000_000_000.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = num
        .parse()
        .map_err(|_| DecodeError::Malformed(s.to_string()))?;
    if !value.is_finite() {
        return Err(DecodeError::Malformed(s.to_string()));
    }
    if value < 0.0 {
        return Err(DecodeError::Negative(s.to_string()));
    }

    Ok(value / divisor)
}

/// Parse a Kubernetes memory/disk quantity string to bytes.
///
/// A plain integer is bytes. Longest suffix wins, so `Ki` is never read as
/// the decimal `K`.
pub fn decode_memory(s: &str) -> Result<u64, DecodeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DecodeError::Empty);
    }

    let suffixes: &[(&str, u64)] = &[
        ("Ei", 1024 * 1024 * 1024 * 1024 * 1024 * 1024),
        ("Pi", 1024 * 1024 * 1024 * 1024 * 1024),
        ("Ti", 1024 * 1024 * 1024 * 1024),
        ("Gi", 1024 * 1024 * 1024),
        ("Mi", 1024 * 1024),
        ("Ki", 1024),
        ("E", 1000 * 1000 * 1000 * 1000 * 1000 * 1000),
        ("P", 1000 * 1000 * 1000 * 1000 * 1000),
        ("T", 1000 * 1000 * 1000 * 1000),
        ("G", 1000 * 1000 * 1000),
        ("M", 1000 * 1000),
        ("K", 1000),
        ("k", 1000),
    ];

    for (suffix, multiplier) in suffixes {
        if let Some(n) = s.strip_suffix(suffix) {
            let value: f64 = n
                .parse()
                .map_err(|_| DecodeError::Malformed(s.to_string()))?;
            if !value.is_finite() {
                return Err(DecodeError::Malformed(s.to_string()));
            }
            if value < 0.0 {
                return Err(DecodeError::Negative(s.to_string()));
            }
            return Ok((value * (*multiplier as f64)).round() as u64);
        }
    }

    let value: i64 = s
        .parse()
        .map_err(|_| DecodeError::Malformed(s.to_string()))?;
    if value < 0 {
        return Err(DecodeError::Negative(s.to_string()));
    }
    Ok(value as u64)
}
