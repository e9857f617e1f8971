//! A small, dependency-free duration parser for manifest `timeout` fields.
//! Accepts `<number><unit>` where unit is one of `ms`, `s`, `m`, `h`; a bare
//! number is interpreted as seconds.

use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration: {0:?}")]
    Invalid(String),
    #[error("duration must be positive: {0:?}")]
    NotPositive(String),
}

pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let (number_part, unit) = if let Some(stripped) = trimmed.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = trimmed.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = trimmed.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = trimmed.strip_suffix('h') {
        (stripped, "h")
    } else {
        (trimmed, "s")
    };

    let value: f64 = number_part
        .parse()
        .map_err(|_| DurationParseError::Invalid(raw.to_string()))?;

    if !value.is_finite() || value <= 0.0 {
        return Err(DurationParseError::NotPositive(raw.to_string()));
    }

    let millis = match unit {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => unreachable!("unit set above"),
    };

    Ok(Duration::from_millis(millis as u64))
}
