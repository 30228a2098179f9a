//! Human-friendly duration parsing for `--duration` style flags.

use anyhow::{anyhow, Result};
use std::time::Duration;

/// Parses strings such as `500ms`, `30s`, `15m`, `4h` or `1d`.
///
/// # Errors
/// Returns an error for empty input, a missing or unknown unit, or zero.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let split_idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("Duration must have a unit (ms, s, m, h, d)"))?;
    let (num_str, unit) = s.split_at(split_idx);
    if num_str.is_empty() {
        return Err(anyhow!("Duration must start with a number"));
    }

    let value: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {num_str}"))?;
    if value == 0 {
        return Err(anyhow!("Duration cannot be zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        "d" => Ok(Duration::from_secs(value * 86400)),
        other => Err(anyhow!("Unknown duration unit: {other}. Use ms, s, m, h, or d")),
    }
}
