//! Duration strings such as `"10ns"` or `"2.5us"`.

pub use hwsim_common::units::{FS_PER_MS, FS_PER_NS, FS_PER_PS, FS_PER_S, FS_PER_US};

use crate::error::ConfigError;

fn invalid(value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Parses a duration into femtoseconds.
///
/// Accepts `fs`, `ps`, `ns`, `us`, `ms` and `s` suffixes with an optional
/// fractional part. A bare number is nanoseconds.
pub fn parse_duration(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid(s, "empty duration"));
    }

    let num_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    if num_end == 0 {
        return Err(invalid(s, "no numeric value"));
    }

    let unit = s[num_end..].trim();
    let multiplier = match unit {
        "fs" => 1,
        "ps" => FS_PER_PS,
        "" | "ns" => FS_PER_NS,
        "us" => FS_PER_US,
        "ms" => FS_PER_MS,
        "s" => FS_PER_S,
        _ => return Err(invalid(s, format!("unknown unit '{unit}'"))),
    };

    let number = &s[..num_end];
    match number.split_once('.') {
        None => number
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(multiplier))
            .ok_or_else(|| invalid(s, "value out of range")),
        Some((whole, frac)) => {
            if frac.contains('.') {
                return Err(invalid(s, "malformed number"));
            }
            let whole: u64 = if whole.is_empty() {
                0
            } else {
                whole.parse().map_err(|_| invalid(s, "malformed number"))?
            };
            let mut scaled_frac = 0u64;
            let mut scale = multiplier;
            for digit in frac.chars() {
                scale /= 10;
                let d = u64::from(digit.to_digit(10).unwrap_or(0));
                scaled_frac += d * scale;
            }
            whole
                .checked_mul(multiplier)
                .and_then(|w| w.checked_add(scaled_frac))
                .ok_or_else(|| invalid(s, "value out of range"))
        }
    }
}
