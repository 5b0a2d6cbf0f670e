//! Sortable version identifiers and the clock they are derived from.

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix every version id starts with.
pub const VERSION_PREFIX: &str = "v_";

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

/// Identifier of one published model: `v_YYYYMMDD_HHMMSS`, with a `_N`
/// disambiguator when several publishes share the same UTC second.
///
/// Ordering follows the embedded timestamp first and the disambiguator
/// second, never filesystem metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    stamp: NaiveDateTime,
    seq: u32,
}

impl VersionId {
    /// Version id for the UTC second containing `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        let naive = now.naive_utc();
        Self {
            stamp: naive.with_nanosecond(0).unwrap_or(naive),
            seq: 0,
        }
    }

    /// Next id for a publish happening at `now`, given the newest id already in the store.
    ///
    /// The result is strictly greater than `newest`, so ids never go backwards even
    /// when two publishes land in the same second or the wall clock is stepped back.
    #[must_use]
    pub fn next(now: DateTime<Utc>, newest: Option<&Self>) -> Self {
        let candidate = Self::at(now);
        match newest {
            Some(latest) if *latest >= candidate => latest.successor(),
            _ => candidate,
        }
    }

    /// Same second, next disambiguator.
    #[must_use]
    pub const fn successor(&self) -> Self {
        Self {
            stamp: self.stamp,
            seq: self.seq.saturating_add(1),
        }
    }

    /// UTC timestamp embedded in the id.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.stamp)
    }

    /// Collision disambiguator (`0` for the first publish in a second).
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.seq
    }

    /// Parses and canonicalises a version id.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let malformed = || VersionParseError(raw.to_string());
        let body = raw.strip_prefix(VERSION_PREFIX).ok_or_else(malformed)?;
        if !body.is_ascii() || body.len() < STAMP_LEN {
            return Err(malformed());
        }
        let (stamp_part, rest) = body.split_at(STAMP_LEN);
        let stamp_bytes = stamp_part.as_bytes();
        let digits_ok = stamp_bytes
            .iter()
            .enumerate()
            .all(|(idx, byte)| if idx == 8 { *byte == b'_' } else { byte.is_ascii_digit() });
        if !digits_ok {
            return Err(malformed());
        }
        let stamp = NaiveDateTime::parse_from_str(stamp_part, STAMP_FORMAT).map_err(|_| malformed())?;
        let seq = if rest.is_empty() {
            0
        } else {
            let digits = rest.strip_prefix('_').ok_or_else(malformed)?;
            if digits.is_empty()
                || digits.starts_with('0')
                || !digits.bytes().all(|byte| byte.is_ascii_digit())
            {
                return Err(malformed());
            }
            digits.parse::<u32>().map_err(|_| malformed())?
        };
        Ok(Self { stamp, seq })
    }

    /// Returns true when `raw` is a well-formed version id.
    #[must_use]
    pub fn is_valid(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    /// Compares two ids newest-first, the order `list_versions` uses.
    #[must_use]
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.cmp(a)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VERSION_PREFIX}{}", self.stamp.format(STAMP_FORMAT))?;
        if self.seq > 0 {
            write!(f, "_{}", self.seq)?;
        }
        Ok(())
    }
}

impl FromStr for VersionId {
    type Err = VersionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for VersionId {
    type Error = VersionParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.to_string()
    }
}

/// Raised for strings that are not `v_YYYYMMDD_HHMMSS[_N]`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed version id `{0}` (expected v_YYYYMMDD_HHMMSS)")]
pub struct VersionParseError(pub String);

/// Source of wall-clock time for version ids and training dates.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock frozen at `at`.
    #[must_use]
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Moves the clock to `at` (backwards is allowed).
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Advances the clock by `seconds`.
    pub fn advance_secs(&self, seconds: i64) {
        let mut now = self.now.lock();
        *now += Duration::seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn formats_utc_second() {
        let id = VersionId::at(utc("2026-03-04T05:06:07.891Z"));
        assert_eq!(id.to_string(), "v_20260304_050607");
        assert_eq!(id.sequence(), 0);
    }

    #[test]
    fn same_second_gets_disambiguator() {
        let now = utc("2026-03-04T05:06:07Z");
        let first = VersionId::next(now, None);
        let second = VersionId::next(now, Some(&first));
        let third = VersionId::next(now, Some(&second));
        assert_eq!(second.to_string(), "v_20260304_050607_1");
        assert_eq!(third.to_string(), "v_20260304_050607_2");
        assert!(first < second && second < third);
    }

    #[test]
    fn clock_stepping_back_still_moves_forward() {
        let newest = VersionId::parse("v_20260304_050607").unwrap();
        let next = VersionId::next(utc("2026-03-04T05:00:00Z"), Some(&newest));
        assert!(next > newest);
        assert_eq!(next.to_string(), "v_20260304_050607_1");
    }

    #[test]
    fn later_second_resets_disambiguator() {
        let newest = VersionId::parse("v_20260304_050607_3").unwrap();
        let next = VersionId::next(utc("2026-03-04T05:06:08Z"), Some(&newest));
        assert_eq!(next.to_string(), "v_20260304_050608");
    }

    #[test]
    fn rejects_malformed_ids() {
        for raw in [
            "20260304_050607",
            "v_2026034_050607",
            "v_20260304-050607",
            "v_20261304_050607",
            "v_20260304_050607_",
            "v_20260304_050607_01",
            "v_20260304_050607x",
            "v_latest",
            "v_２0260304_050607",
        ] {
            assert!(!VersionId::is_valid(raw), "{raw} should be rejected");
        }
    }

    #[test]
    fn parse_display_round_trip() {
        for raw in ["v_20260304_050607", "v_19991231_235959_12"] {
            assert_eq!(VersionId::parse(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn sorts_by_embedded_time() {
        let mut ids: Vec<VersionId> = ["v_20260101_000001", "v_20251231_235959", "v_20260101_000001_1"]
            .iter()
            .map(|raw| raw.parse().unwrap())
            .collect();
        ids.sort_by(VersionId::newest_first);
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            ["v_20260101_000001_1", "v_20260101_000001", "v_20251231_235959"]
        );
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(utc("2026-01-01T00:00:00Z"));
        clock.advance_secs(61);
        assert_eq!(VersionId::at(clock.now()).to_string(), "v_20260101_000101");
    }
}
