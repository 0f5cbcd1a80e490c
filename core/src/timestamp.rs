//! ISO-8601 timestamp parsing and canonical formatting.
//!
//! Parsing is permissive about common UTC spellings; formatting is strict:
//! - extended form (`2026-01-01T00:00:00Z`, fractional seconds only when
//!   present) for front matter and log `ts`
//! - basic form (`20260101T000000.000Z`) for run-file names, which sort
//!   lexicographically in time order

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

/// Parse a UTC timestamp written in any of the accepted spellings.
///
/// Accepted: `Z`/`z`, `+00:00`, `+0000`, `+00` (and `-00:00`), no offset
/// (taken as UTC), `T`/`t`/space separator, optional seconds, optional
/// fractional seconds, a bare date, and the basic form. Non-zero offsets
/// are rejected: the value must denote UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() || !s.is_ascii() {
        return None;
    }
    if let Some(dt) = parse_basic(s) {
        return Some(dt);
    }
    if s.len() == 10 {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|n| n.and_utc());
    }
    if s.len() < 16 {
        return None;
    }
    let (date, rest) = s.split_at(10);
    let separator = rest.as_bytes()[0];
    if !matches!(separator, b'T' | b't' | b' ') {
        return None;
    }
    let time_and_offset = &rest[1..];
    let time = strip_utc_offset(time_and_offset)?;
    let formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
    parse_naive(&format!("{date}T{time}"), &formats).map(|n| n.and_utc())
}

/// Strip a trailing UTC designator from the time part.
///
/// Returns `None` when an offset is present but is not zero.
fn strip_utc_offset(time: &str) -> Option<&str> {
    if let Some(stripped) = time.strip_suffix(['Z', 'z']) {
        return Some(stripped);
    }
    match time.find(['+', '-']) {
        None => Some(time),
        Some(idx) => {
            let offset = &time[idx + 1..];
            let digits: String = offset.chars().filter(|c| *c != ':').collect();
            let valid = matches!(digits.len(), 2 | 4)
                && digits.chars().all(|c| c == '0');
            valid.then_some(&time[..idx])
        }
    }
}

fn parse_basic(s: &str) -> Option<DateTime<Utc>> {
    let bytes = s.as_bytes();
    if bytes.len() < 15 || !bytes[..8].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if !matches!(bytes[8], b'T' | b't') {
        return None;
    }
    let body = s.strip_suffix(['Z', 'z']).unwrap_or(s);
    let normalized = format!("{}T{}", &body[..8], &body[9..]);
    parse_naive(&normalized, &["%Y%m%dT%H%M%S%.f", "%Y%m%dT%H%M%S"]).map(|n| n.and_utc())
}

fn parse_naive(s: &str, formats: &[&str]) -> Option<NaiveDateTime> {
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Canonical extended form: `YYYY-MM-DDTHH:MM:SSZ`, with `.mmm`/`.uuuuuu`/
/// `.nnnnnnnnn` only when the value carries sub-second precision.
pub fn format_extended(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Basic form used in run-file names: `YYYYMMDDTHHMMSS.mmmZ`.
pub fn format_basic(dt: DateTime<Utc>) -> String {
    let dt = dt.trunc_subsecs(3);
    format!(
        "{}.{:03}Z",
        dt.format("%Y%m%dT%H%M%S"),
        dt.timestamp_subsec_millis().min(999)
    )
}

/// Truncate to millisecond precision, the resolution every stored
/// timestamp in this crate uses.
pub fn to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(3)
}

/// True when `s` is already exactly the canonical extended spelling.
pub fn is_canonical_extended(s: &str) -> bool {
    parse_timestamp(s).is_some_and(|dt| format_extended(dt) == s)
}

/// True when `s` is already exactly the canonical basic spelling.
pub fn is_canonical_basic(s: &str) -> bool {
    parse_timestamp(s).is_some_and(|dt| format_basic(dt) == s)
}

/// Compare two timestamp spellings by the instant they denote, at
/// millisecond resolution.
pub fn same_instant(a: &str, b: &str) -> bool {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => to_millis(a) == to_millis(b),
        _ => false,
    }
}

/// `#[serde(with = "crate::timestamp::extended")]`: permissive on read,
/// canonical extended form on write.
pub mod extended {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_extended(*dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("not an ISO-8601 UTC timestamp: {raw}"))
        })
    }
}
