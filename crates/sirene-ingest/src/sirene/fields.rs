//! Cell-level parsers for SIRENE stock files
//!
//! Every function takes the raw cell (`None` when the column is absent) and
//! never fails: malformed input yields `None` (or `false` for booleans).
//! Only natural keys are strict, see [`digits`].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How to read dates that only carry a year or a year and month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialDatePolicy {
    /// `1999` becomes 1999-01-01 and `1999-07` becomes 1999-07-01
    #[default]
    StartOfPeriod,
    /// Partial dates are treated as absent
    Reject,
}

impl FromStr for PartialDatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start_of_period" | "start-of-period" | "default" => Ok(Self::StartOfPeriod),
            "reject" | "null" => Ok(Self::Reject),
            other => Err(format!("unknown partial date policy '{other}'")),
        }
    }
}

/// Trimmed cell content, `None` when blank
pub fn text(raw: Option<&str>) -> Option<String> {
    trimmed(raw).map(str::to_owned)
}

fn trimmed(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Natural-key cell: exactly `len` ASCII digits after trimming
pub fn digits(raw: Option<&str>, len: usize) -> Option<String> {
    trimmed(raw)
        .filter(|s| s.len() == len && s.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_owned)
}

/// Parse `yyyy`, `yyyy-MM` or `yyyy-MM-dd`
pub fn date(raw: Option<&str>, policy: PartialDatePolicy) -> Option<NaiveDate> {
    let s = trimmed(raw)?;
    let mut parts = s.split('-');

    let year = fixed_digits(parts.next()?, 4)?;
    let month = match parts.next() {
        Some(m) => Some(fixed_digits(m, 2)?),
        None => None,
    };
    let day = match parts.next() {
        Some(d) => Some(fixed_digits(d, 2)?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }

    if day.is_none() && policy == PartialDatePolicy::Reject {
        return None;
    }

    NaiveDate::from_ymd_opt(year as i32, month.unwrap_or(1), day.unwrap_or(1))
}

/// Parse a full date, optionally followed by `T` + time + offset.
///
/// Missing time means midnight and a missing offset means UTC. The result is
/// always expressed in UTC.
pub fn timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let s = trimmed(raw)?;
    let (date_part, time_part) = match s.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (s, None),
    };

    let day = date(Some(date_part), PartialDatePolicy::Reject)?;
    let Some(time_part) = time_part else {
        return Some(Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)));
    };

    let (clock, offset) = split_offset(time_part)?;
    let local = day.and_time(clock_time(clock)?);

    match offset {
        Some(offset) => offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Some(Utc.from_utc_datetime(&local)),
    }
}

fn clock_time(clock: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(clock, fmt).ok())
}

fn split_offset(time: &str) -> Option<(&str, Option<FixedOffset>)> {
    if let Some(clock) = time.strip_suffix(['Z', 'z']) {
        return Some((clock, FixedOffset::east_opt(0)));
    }

    let Some(idx) = time.rfind(['+', '-']) else {
        return Some((time, None));
    };
    let (clock, offset) = time.split_at(idx);
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let body = offset[1..].replace(':', "");

    let (hours, minutes) = match body.len() {
        2 => (fixed_digits(&body, 2)?, 0),
        4 => (fixed_digits(body.get(..2)?, 2)?, fixed_digits(body.get(2..)?, 2)?),
        _ => return None,
    };
    let seconds = (hours * 3600 + minutes * 60) as i32;

    Some((clock, Some(FixedOffset::east_opt(sign * seconds)?)))
}

fn fixed_digits(s: &str, len: usize) -> Option<u32> {
    if s.len() != len || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Whole-cell integer; anything that is not a number gives `None`
pub fn integer(raw: Option<&str>) -> Option<i32> {
    trimmed(raw)?.parse().ok()
}

/// `1/0`, `true/false`, `oui/non`, `vrai/faux`, `o/n`, case-insensitive.
/// Anything else, including a blank cell, is `false`.
pub fn boolean(raw: Option<&str>) -> bool {
    trimmed(raw).is_some_and(|s| {
        matches!(
            s.to_lowercase().as_str(),
            "1" | "true" | "oui" | "vrai" | "o"
        )
    })
}

/// Classification code with punctuation and spaces removed (`62.01Z` -> `6201Z`)
pub fn code(raw: Option<&str>) -> Option<String> {
    let cleaned: String = trimmed(raw)?
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !c.is_whitespace())
        .collect();

    (!cleaned.is_empty()).then_some(cleaned)
}
