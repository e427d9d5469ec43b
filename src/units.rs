//! Size and duration option values.
//!
//! Options such as `span` and `cap` accept either raw numbers (milliseconds
//! or bytes) or strings carrying a unit suffix: `"500kb"`, `"100Mb"`,
//! `"30sec"`, `"5min"`, `"12h"`, `"7d"`, `"4w"`. Suffixes are matched
//! case-insensitively and may be pluralised (`"2days"`, `"3 weeks"`).
//! Size multipliers are decimal.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const KILO: f64 = 1_000.0;
const MEGA: f64 = 1_000_000.0;
const GIGA: f64 = 1_000_000_000.0;

const SECOND_MS: f64 = 1_000.0;
const MINUTE_MS: f64 = 60.0 * SECOND_MS;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;
const DAY_MS: f64 = 24.0 * HOUR_MS;
const WEEK_MS: f64 = 7.0 * DAY_MS;

/// A size or duration as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    /// Raw number: bytes for sizes, milliseconds for durations.
    Number(u64),
    /// Number with a unit suffix.
    Text(String),
}

impl Quantity {
    /// Interpret as a duration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable strings or size units.
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            Self::Number(ms) => Ok(Duration::from_millis(*ms)),
            Self::Text(s) => parse_duration(s),
        }
    }

    /// Interpret as a byte count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable strings or time units.
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            Self::Number(bytes) => Ok(*bytes),
            Self::Text(s) => parse_size(s),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Quantity {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Quantity {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Duration> for Quantity {
    fn from(d: Duration) -> Self {
        Self::Number(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Unit {
    Size(f64),
    Time(f64),
}

/// Parse a size string such as `"100Mb"` or `"512 kbytes"` into bytes.
///
/// # Errors
///
/// Returns [`Error::Config`] if the string has no numeric prefix, no unit,
/// an unknown unit, or a time unit.
pub fn parse_size(s: &str) -> Result<u64> {
    let (value, unit) = split(s)?;
    match classify(&unit) {
        Some(Unit::Size(mult)) => to_integer(s, value * mult),
        Some(Unit::Time(_)) => Err(Error::config(format!(
            "expected a size but got a duration: '{s}'"
        ))),
        None => Err(unexpected(s)),
    }
}

/// Parse a duration string such as `"30sec"`, `"5min"` or `"4w"`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the string has no numeric prefix, no unit,
/// an unknown unit, or a size unit.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let (value, unit) = split(s)?;
    let ms = match unit.as_str() {
        "ms" | "msec" | "msecs" | "millis" => value,
        other => match classify(other) {
            Some(Unit::Time(mult)) => value * mult,
            Some(Unit::Size(_)) => {
                return Err(Error::config(format!(
                    "expected a duration but got a size: '{s}'"
                )));
            },
            None => return Err(unexpected(s)),
        },
    };
    to_integer(s, ms).map(Duration::from_millis)
}

fn unexpected(s: &str) -> Error {
    Error::config(format!("unexpected string expression: '{s}'"))
}

fn split(s: &str) -> Result<(f64, String)> {
    let trimmed = s.trim();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(end);
    let value: f64 = number.parse().map_err(|_| unexpected(s))?;
    let unit = unit.trim().to_ascii_lowercase();
    if unit.is_empty() {
        return Err(Error::config(format!("missing unit in '{s}'")));
    }
    Ok((value, unit))
}

fn classify(unit: &str) -> Option<Unit> {
    let singular = match unit.strip_suffix('s') {
        Some(rest) if !rest.is_empty() => rest,
        _ => unit,
    };
    let unit = match singular {
        "k" | "kb" | "kbyte" | "kyte" => Unit::Size(KILO),
        "m" | "mb" | "mbyte" | "myte" => Unit::Size(MEGA),
        "g" | "gb" | "gbyte" | "gyte" => Unit::Size(GIGA),
        "s" | "sec" | "second" => Unit::Time(SECOND_MS),
        "min" | "minute" => Unit::Time(MINUTE_MS),
        "h" | "hour" => Unit::Time(HOUR_MS),
        "d" | "day" => Unit::Time(DAY_MS),
        "w" | "week" => Unit::Time(WEEK_MS),
        _ => return None,
    };
    Some(unit)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_integer(input: &str, value: f64) -> Result<u64> {
    if !value.is_finite() || value < 0.0 || value > u64::MAX as f64 {
        return Err(unexpected(input));
    }
    Ok(value.round() as u64)
}
