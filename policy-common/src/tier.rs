// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retention tiers and their interval boundaries.
//!
//! A tier is a named retention bucket with a fixed cadence. The set of tiers
//! is closed: each one carries a cron-style run schedule and a lifetime unit
//! that the middleware's task payloads expect, and each one knows how to
//! compute its most recent interval boundary from a point in time. All
//! boundary math is done in UTC.

use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::TimeZone;
use chrono::Timelike;
use chrono::Utc;
use chrono::Weekday;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A named retention bucket.
///
/// Variants are ordered from most to least frequent, so `Ord` on `Tier` is
/// "runs more often than".
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Every 15 minutes.
    Frequent,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Unit attached to a retain-count in middleware task payloads.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifetimeUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl LifetimeUnit {
    /// Approximate length of one unit in hours, used only to order tiers by
    /// total retention span. Months and years are approximations on purpose;
    /// exactness doesn't matter for ordering.
    pub fn approx_hours(&self) -> u64 {
        match self {
            LifetimeUnit::Hour => 1,
            LifetimeUnit::Day => 24,
            LifetimeUnit::Week => 24 * 7,
            LifetimeUnit::Month => 24 * 30,
            LifetimeUnit::Year => 24 * 365,
        }
    }
}

impl fmt::Display for LifetimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifetimeUnit::Hour => "HOUR",
            LifetimeUnit::Day => "DAY",
            LifetimeUnit::Week => "WEEK",
            LifetimeUnit::Month => "MONTH",
            LifetimeUnit::Year => "YEAR",
        };
        write!(f, "{s}")
    }
}

/// Cron-style schedule fields, as the middleware's task payloads expect them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub minute: String,
    pub hour: String,
    pub dom: String,
    pub month: String,
    pub dow: String,
}

impl CronSchedule {
    fn new(minute: &str, hour: &str, dom: &str, month: &str, dow: &str) -> Self {
        Self {
            minute: minute.to_string(),
            hour: hour.to_string(),
            dom: dom.to_string(),
            month: month.to_string(),
            dow: dow.to_string(),
        }
    }
}

/// Day on which the weekly boundary falls.
///
/// The weekly tier's alignment is configuration, not an implicit default:
/// callers that care which day "the weekly one" is taken on must say so.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Sunday,
    Monday,
}

impl WeekStart {
    /// Cron day-of-week number (0 = Sunday).
    pub fn dow(&self) -> u8 {
        match self {
            WeekStart::Sunday => 0,
            WeekStart::Monday => 1,
        }
    }

    fn days_since(&self, weekday: Weekday) -> u32 {
        match self {
            WeekStart::Sunday => weekday.num_days_from_sunday(),
            WeekStart::Monday => weekday.num_days_from_monday(),
        }
    }
}

/// Configuration for boundary computation, threaded explicitly into the
/// engine's entry point.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct BoundaryConfig {
    #[serde(default)]
    pub week_start: WeekStart,
}

impl Tier {
    /// All tiers, most frequent first.
    pub const ALL: [Tier; 6] = [
        Tier::Frequent,
        Tier::Hourly,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Yearly,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Frequent => "frequent",
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::Yearly => "yearly",
        }
    }

    pub fn lifetime_unit(&self) -> LifetimeUnit {
        match self {
            Tier::Frequent => LifetimeUnit::Hour,
            Tier::Hourly => LifetimeUnit::Hour,
            Tier::Daily => LifetimeUnit::Day,
            Tier::Weekly => LifetimeUnit::Week,
            Tier::Monthly => LifetimeUnit::Month,
            Tier::Yearly => LifetimeUnit::Year,
        }
    }

    /// The cron schedule on which this tier runs.
    pub fn schedule(&self, config: &BoundaryConfig) -> CronSchedule {
        match self {
            Tier::Frequent => CronSchedule::new("*/15", "*", "*", "*", "*"),
            Tier::Hourly => CronSchedule::new("0", "*", "*", "*", "*"),
            Tier::Daily => CronSchedule::new("0", "0", "*", "*", "*"),
            Tier::Weekly => CronSchedule::new(
                "0",
                "0",
                "*",
                "*",
                &config.week_start.dow().to_string(),
            ),
            Tier::Monthly => CronSchedule::new("0", "0", "1", "*", "*"),
            Tier::Yearly => CronSchedule::new("0", "0", "1", "1", "*"),
        }
    }

    /// The most recent interval boundary at or before `now`.
    pub fn boundary(
        &self,
        now: DateTime<Utc>,
        config: &BoundaryConfig,
    ) -> DateTime<Utc> {
        match self {
            Tier::Frequent => {
                let minute = now.minute() - now.minute() % 15;
                utc(now.year(), now.month(), now.day(), now.hour(), minute)
            }
            Tier::Hourly => {
                utc(now.year(), now.month(), now.day(), now.hour(), 0)
            }
            Tier::Daily => utc(now.year(), now.month(), now.day(), 0, 0),
            Tier::Weekly => {
                let midnight = utc(now.year(), now.month(), now.day(), 0, 0);
                let back = config.week_start.days_since(now.weekday());
                midnight - Duration::days(i64::from(back))
            }
            Tier::Monthly => utc(now.year(), now.month(), 1, 0, 0),
            Tier::Yearly => utc(now.year(), 1, 1, 0, 0),
        }
    }

    /// The boundary immediately after `boundary`.
    ///
    /// `[boundary, next_boundary)` is the tier's current window; "one
    /// snapshot per tier per boundary" is judged against this half-open
    /// interval.
    pub fn next_boundary(&self, boundary: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Tier::Frequent => boundary + Duration::minutes(15),
            Tier::Hourly => boundary + Duration::hours(1),
            Tier::Daily => boundary + Duration::days(1),
            Tier::Weekly => boundary + Duration::days(7),
            Tier::Monthly => {
                if boundary.month() == 12 {
                    utc(boundary.year() + 1, 1, 1, 0, 0)
                } else {
                    utc(boundary.year(), boundary.month() + 1, 1, 0, 0)
                }
            }
            Tier::Yearly => utc(boundary.year() + 1, 1, 1, 0, 0),
        }
    }
}

// All call sites pass components taken from an existing valid timestamp (or
// day/month 1), so construction cannot fail.
fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid UTC timestamp from valid components")
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tier {0:?}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .iter()
            .copied()
            .find(|t| t.label() == s)
            .ok_or_else(|| UnknownTier(s.to_string()))
    }
}

/// Mapping from tier to retain-count.
///
/// A count of 0 disables a tier; tiers never listed are equivalent to tiers
/// listed with 0. Immutable once handed to the engine.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TierSpec {
    counts: BTreeMap<Tier, u32>,
}

impl TierSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: Tier, count: u32) -> Self {
        self.counts.insert(tier, count);
        self
    }

    /// Retain-count for `tier`; 0 means the tier is disabled.
    pub fn retain_count(&self, tier: Tier) -> u32 {
        self.counts.get(&tier).copied().unwrap_or(0)
    }

    /// Tiers with a non-zero retain-count, most frequent first.
    pub fn enabled_tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(tier, _)| *tier)
    }

    /// True if no tier is enabled.
    pub fn is_empty(&self) -> bool {
        self.enabled_tiers().next().is_none()
    }

    /// The most frequently-running enabled tier.
    pub fn most_frequent_tier(&self) -> Option<Tier> {
        self.enabled_tiers().next()
    }

    /// The enabled tier whose total retention span is longest, together with
    /// its retain-count. Ties resolve to the more frequent tier.
    pub fn longest_retention(&self) -> Option<(Tier, u32)> {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .max_by_key(|(tier, count)| {
                // `max_by_key` keeps the last maximum, so break span ties
                // toward the more frequent (smaller) tier explicitly.
                (
                    u64::from(**count) * tier.lifetime_unit().approx_hours(),
                    std::cmp::Reverse(**tier),
                )
            })
            .map(|(tier, count)| (*tier, *count))
    }
}
