//! Shared utility helpers.

use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use chrono_tz::Tz;
use thiserror::Error;

/// Named layouts accepted by [`format_now`].
pub const PRESET_DATE: &str = "%Y-%m-%d";
pub const PRESET_TIME: &str = "%H:%M:%S";
pub const PRESET_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeFormatError {
    #[error("Invalid timezone: {0}")]
    Timezone(String),
    #[error("Invalid format: {0}")]
    Format(String),
    #[error("Unknown preset: {0}. Use: date, time, or datetime")]
    Preset(String),
}

/// Render the current time.  An explicit strftime `format` wins over a
/// `preset`; with neither, the full date and time is shown.
pub fn format_now(
    timezone: Option<&str>,
    preset: Option<&str>,
    format: Option<&str>,
) -> Result<String, TimeFormatError> {
    let layout = match (format, preset) {
        (Some(f), _) => f,
        (None, Some("date")) => PRESET_DATE,
        (None, Some("time")) => PRESET_TIME,
        (None, Some("datetime")) | (None, None) => PRESET_DATETIME,
        (None, Some(other)) => return Err(TimeFormatError::Preset(other.to_string())),
    };

    match timezone {
        Some(name) => {
            let tz: Tz = name
                .parse()
                .map_err(|_| TimeFormatError::Timezone(name.to_string()))?;
            format_with(&Local::now().with_timezone(&tz), layout)
        }
        None => format_with(&Local::now(), layout),
    }
}

/// strftime-style formatting that reports bad layouts instead of panicking.
pub fn format_with<Z>(t: &DateTime<Z>, layout: &str) -> Result<String, TimeFormatError>
where
    Z: TimeZone,
    Z::Offset: std::fmt::Display,
{
    let items: Vec<Item<'_>> = StrftimeItems::new(layout).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(TimeFormatError::Format(layout.to_string()));
    }
    Ok(t.format_with_items(items.into_iter()).to_string())
}

/// Human form of a duration: `1h 2m 3s`, `45s`, `0s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut parts = Vec::new();
    if h > 0 {
        parts.push(format!("{h}h"));
    }
    if m > 0 {
        parts.push(format!("{m}m"));
    }
    if s > 0 || parts.is_empty() {
        parts.push(format!("{s}s"));
    }
    parts.join(" ")
}

/// Parse a duration given as plain seconds (`90`) or with unit suffixes
/// (`1h30m`, `45s`, `2m`).
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(n.checked_mul(unit)?)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}
