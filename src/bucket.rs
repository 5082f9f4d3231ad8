//! Time-bucketing policies
//!
//! A [`BucketPolicy`] maps the wall-clock instant of a flush cycle to the
//! timestamp a point is written at. Recurring counters (hourly, daily,
//! monthly energy) land on a canonical instant so repeated writes overwrite
//! the same logical point downstream.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Hour (UTC) used as the anchor for day, month and year buckets
pub const DAILY_ANCHOR_HOUR: i64 = 5;

/// How a register's point timestamp is derived from "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BucketPolicy {
    /// The instant of the cycle
    #[default]
    Now,
    /// Never forwarded (informational registers)
    None,
    /// Floor to the 5 minute boundary
    Minute5,
    /// Start of the previous hour
    PriorHour,
    /// Start of the current hour
    ThisHour,
    /// Daily anchor of yesterday
    PriorDay,
    /// Daily anchor of today
    ThisDay,
    /// Daily anchor on the 1st of the previous month
    PriorMonth,
    /// Daily anchor on the 1st of the current month
    ThisMonth,
    /// Daily anchor on Jan 1 of the previous year
    PriorYear,
    /// Daily anchor on Jan 1 of the current year
    ThisYear,
    /// Unix time zero, for lifetime totals
    EpochZero,
}

impl BucketPolicy {
    /// All policies, in descriptor-tag order
    pub const ALL: [BucketPolicy; 12] = [
        BucketPolicy::Now,
        BucketPolicy::None,
        BucketPolicy::Minute5,
        BucketPolicy::PriorHour,
        BucketPolicy::ThisHour,
        BucketPolicy::PriorDay,
        BucketPolicy::ThisDay,
        BucketPolicy::PriorMonth,
        BucketPolicy::ThisMonth,
        BucketPolicy::PriorYear,
        BucketPolicy::ThisYear,
        BucketPolicy::EpochZero,
    ];

    /// Descriptor tag for this policy
    pub fn tag(&self) -> &'static str {
        match self {
            BucketPolicy::Now => "now",
            BucketPolicy::None => "none",
            BucketPolicy::Minute5 => "5m",
            BucketPolicy::PriorHour => "-1h",
            BucketPolicy::ThisHour => "1h",
            BucketPolicy::PriorDay => "-1d",
            BucketPolicy::ThisDay => "1d",
            BucketPolicy::PriorMonth => "-1m",
            BucketPolicy::ThisMonth => "1m",
            BucketPolicy::PriorYear => "-1y",
            BucketPolicy::ThisYear => "1y",
            BucketPolicy::EpochZero => "inf",
        }
    }

    /// Whether registers with this policy are forwarded at all
    pub fn is_forwarded(&self) -> bool {
        !matches!(self, BucketPolicy::None)
    }

    /// Evaluate the policy against `now`
    ///
    /// Returns `None` for [`BucketPolicy::None`]; every other policy yields
    /// a timestamp.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        let hour = i64::from(now.hour());

        let ts = match self {
            BucketPolicy::None => return None,
            BucketPolicy::Now => now,
            BucketPolicy::Minute5 => {
                let minute = now.minute() - now.minute() % 5;
                at_hour(today, hour) + Duration::minutes(i64::from(minute))
            }
            BucketPolicy::ThisHour => at_hour(today, hour),
            BucketPolicy::PriorHour => at_hour(today, hour) - Duration::hours(1),
            BucketPolicy::ThisDay => at_hour(today, DAILY_ANCHOR_HOUR),
            BucketPolicy::PriorDay => at_hour(today - Duration::days(1), DAILY_ANCHOR_HOUR),
            BucketPolicy::ThisMonth => {
                at_hour(first_of(today.year(), today.month())?, DAILY_ANCHOR_HOUR)
            }
            BucketPolicy::PriorMonth => {
                let (year, month) = match today.month() {
                    1 => (today.year() - 1, 12),
                    m => (today.year(), m - 1),
                };
                at_hour(first_of(year, month)?, DAILY_ANCHOR_HOUR)
            }
            BucketPolicy::ThisYear => at_hour(first_of(today.year(), 1)?, DAILY_ANCHOR_HOUR),
            BucketPolicy::PriorYear => at_hour(first_of(today.year() - 1, 1)?, DAILY_ANCHOR_HOUR),
            BucketPolicy::EpochZero => Utc.timestamp_opt(0, 0).single()?,
        };

        Some(ts)
    }
}

fn first_of(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn at_hour(date: NaiveDate, hour: i64) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default())) + Duration::hours(hour)
}

impl FromStr for BucketPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tag = s.trim();
        if tag.is_empty() {
            return Ok(BucketPolicy::Now);
        }
        BucketPolicy::ALL
            .iter()
            .find(|p| p.tag().eq_ignore_ascii_case(tag))
            .copied()
            .ok_or_else(|| tag.to_string())
    }
}

impl fmt::Display for BucketPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
