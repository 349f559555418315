//! Calendar — local-day arithmetic over epoch-second timestamps.
//!
//! The store never interprets timestamps itself; everything day-shaped
//! goes through a [`Calendar`]. Local days depend on the timezone database,
//! so a tz update between two runs can move an already stored link onto a
//! different local day. Nothing here guards against that.
//!
//! Stored timestamps are confined to years 1 through 9999
//! ([`timestamp_in_range`]); anything outside is rejected at the store
//! boundary rather than interpreted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, Offset, TimeDelta, TimeZone, Utc};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i64 = 719_163;
const SECS_PER_DAY: i64 = 86_400;

/// 0001-01-01T00:00:00Z.
pub const MIN_TIMESTAMP: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Whether the store accepts `timestamp`.
pub fn timestamp_in_range(timestamp: i64) -> bool {
    (MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&timestamp)
}

/// A local calendar day, counted in days since 1970-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayId(pub i64);

impl DayId {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.num_days_from_ce() as i64 - UNIX_EPOCH_CE_DAYS)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from_date)
    }

    pub fn date(self) -> Option<NaiveDate> {
        let ce = self
            .0
            .checked_add(UNIX_EPOCH_CE_DAYS)
            .and_then(|d| i32::try_from(d).ok())?;
        NaiveDate::from_num_days_from_ce_opt(ce)
    }

    /// Monday-based week number, continuous across year boundaries.
    /// 1970-01-01 was a Thursday, so day 0 sits three days into week 0.
    pub fn week(self) -> i64 {
        (self.0 + 3).div_euclid(7)
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date() {
            Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            None => write!(f, "day {}", self.0),
        }
    }
}

impl FromStr for DayId {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self::from_date)
    }
}

/// The calendar service the store consumes.
pub trait Calendar {
    /// Local calendar day containing the UTC instant `timestamp`.
    fn local_day(&self, timestamp: i64) -> DayId;

    fn now_utc(&self) -> i64;

    /// UTC instant of the first moment of `day` in local time.
    fn midnight(&self, day: DayId) -> i64;

    /// UTC instant of local midnight on the day containing `timestamp`.
    fn start_of_day_local(&self, timestamp: i64) -> i64 {
        self.midnight(self.local_day(timestamp))
    }

    fn today(&self) -> DayId {
        self.local_day(self.now_utc())
    }
}

fn local_day_in<Tz: TimeZone>(tz: &Tz, timestamp: i64) -> DayId {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(utc) => DayId::from_date(utc.with_timezone(tz).date_naive()),
        None => DayId(timestamp.div_euclid(SECS_PER_DAY)),
    }
}

fn midnight_in<Tz: TimeZone>(tz: &Tz, day: DayId) -> i64 {
    let Some(naive) = day.date().and_then(|d| d.and_hms_opt(0, 0, 0)) else {
        return day.0.saturating_mul(SECS_PER_DAY);
    };
    // Midnight can fall in a DST gap; the day then starts an hour later.
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            let later = naive.checked_add_signed(TimeDelta::hours(1))?;
            tz.from_local_datetime(&later).earliest()
        })
        .map(|t| t.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp())
}

/// The host's local timezone and clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCalendar;

impl Calendar for SystemCalendar {
    fn local_day(&self, timestamp: i64) -> DayId {
        local_day_in(&Local, timestamp)
    }

    fn now_utc(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn midnight(&self, day: DayId) -> i64 {
        midnight_in(&Local, day)
    }
}

/// A fixed UTC offset and a pinned clock.
#[derive(Debug, Clone, Copy)]
pub struct FixedCalendar {
    offset: FixedOffset,
    now: i64,
}

impl FixedCalendar {
    /// `offset_secs` east of UTC. `None` if out of range (±24h).
    pub fn new(offset_secs: i32, now: i64) -> Option<Self> {
        FixedOffset::east_opt(offset_secs).map(|offset| Self { offset, now })
    }

    pub fn utc(now: i64) -> Self {
        Self {
            offset: Utc.fix(),
            now,
        }
    }

    pub fn with_now(self, now: i64) -> Self {
        Self { now, ..self }
    }
}

impl Calendar for FixedCalendar {
    fn local_day(&self, timestamp: i64) -> DayId {
        local_day_in(&self.offset, timestamp)
    }

    fn now_utc(&self) -> i64 {
        self.now
    }

    fn midnight(&self, day: DayId) -> i64 {
        midnight_in(&self.offset, day)
    }
}
