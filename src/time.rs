//! Timestamp codec: every instant is normalized to UTC milliseconds on the way
//! in and rendered as RFC 3339 (millisecond precision, `Z` suffix) on the way out.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::model::{Ms, Span};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse an RFC 3339 timestamp to UTC milliseconds. Timestamps without an
/// offset are taken as UTC.
pub fn parse_instant(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

pub fn format_instant(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

/// Human label for a range, e.g. `Mon 20 Jan 2025 10:00 UTC → Mon 20 Jan 2025 11:00 UTC`.
pub fn format_range(span: &Span) -> String {
    format!("{} → {}", human(span.start), human(span.end))
}

fn human(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%a %-d %b %Y %H:%M UTC").to_string(),
        None => ms.to_string(),
    }
}

/// `#[serde(with = "crate::time::rfc3339")]` for `Ms` fields.
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::model::Ms;

    pub fn serialize<S: Serializer>(ms: &Ms, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_instant(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ms, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_instant(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}")))
    }
}
