//! Timestamp parsing and display.
//!
//! The server is inconsistent about timezones: some endpoints send RFC 3339,
//! others a naive ISO string that is implicitly UTC, and a few send epoch
//! milliseconds. Everything is normalized to `DateTime<Utc>` on the way in.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Deserializer, de::Error as _};
use std::fmt;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a server timestamp. A timestamp without an explicit offset is UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
}

impl RawTimestamp {
    fn resolve(self) -> Result<DateTime<Utc>, String> {
        match self {
            Self::Text(s) => parse_timestamp(&s).ok_or_else(|| format!("invalid timestamp '{s}'")),
            Self::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| format!("timestamp out of range: {ms}")),
        }
    }
}

/// `deserialize_with` helper for required timestamp fields.
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    RawTimestamp::deserialize(deserializer)?
        .resolve()
        .map_err(D::Error::custom)
}

/// `deserialize_with` helper for optional timestamp fields (`null` → `None`).
pub fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawTimestamp>::deserialize(deserializer)? {
        Some(raw) => raw.resolve().map(Some).map_err(D::Error::custom),
        None => Ok(None),
    }
}

/// Render a message timestamp relative to `now`, in `now`'s timezone.
///
/// - same calendar day: `3:04 PM`
/// - previous calendar day: `Yesterday 3:04 PM`
/// - within the last 7 days: `Mon 3:04 PM`
/// - older: `Jan 5 3:04 PM`, with the year (`Jan 5, 2024 3:04 PM`) only when it
///   differs from the current year
pub fn format_timestamp<Tz>(ts: DateTime<Utc>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let local = ts.with_timezone(&now.timezone());
    let time = local.format("%-I:%M %p").to_string();

    let day = local.date_naive();
    let today = now.date_naive();
    if day == today {
        return time;
    }
    if today.pred_opt() == Some(day) {
        return format!("Yesterday {time}");
    }

    let age = now.clone().signed_duration_since(ts);
    if age < TimeDelta::days(7) {
        return format!("{} {time}", local.format("%a"));
    }

    let date = if local.year() != now.year() {
        local.format("%b %-d, %Y").to_string()
    } else {
        local.format("%b %-d").to_string()
    };
    format!("{date} {time}")
}

/// [`format_timestamp`] against the local clock and timezone.
pub fn format_timestamp_local(ts: DateTime<Utc>) -> String {
    format_timestamp(ts, &chrono::Local::now())
}

/// Coarse "time ago" label used in conversation lists.
pub fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(ts);
    let mins = age.num_minutes();
    let hours = age.num_hours();
    let days = age.num_days();

    if mins < 1 {
        "Just now".to_string()
    } else if mins < 60 {
        format!("{mins}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        ts.format("%-m/%-d/%Y").to_string()
    }
}
