//! Filter model for summary and statistics queries.
//!
//! Requests arrive as a loose [`FilterRequest`] (every field optional, as the
//! transport delivers it) and are validated into a [`Filter`]. The validated
//! form uses enums for the mutually exclusive families, so an invalid
//! combination cannot be constructed once validation has passed.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::{InstanceStatus, StorageStatus};

use super::categorization::CategorizationService;
use super::error::{ValidationError, Violations};

/// Calendar period containing "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivePeriod {
    Today,
    ThisWeek,
    ThisMonth,
    ThisYear,
}

impl std::str::FromStr for ActivePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "TODAY" => Ok(Self::Today),
            "THIS_WEEK" => Ok(Self::ThisWeek),
            "THIS_MONTH" => Ok(Self::ThisMonth),
            "THIS_YEAR" => Ok(Self::ThisYear),
            _ => Err(format!("unknown period: {}", s)),
        }
    }
}

/// Rolling window ending now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
}

impl TimeOffset {
    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.days))
            + Duration::hours(i64::from(self.hours))
            + Duration::minutes(i64::from(self.minutes))
    }

    fn is_zero(&self) -> bool {
        self.days == 0 && self.hours == 0 && self.minutes == 0
    }
}

/// Longest accepted rolling window
pub const MAX_OFFSET_DAYS: i64 = 100 * 366;

/// Explicit bounds. At least one is set and `min < max` when both are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManualTimeFilter {
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
}

impl ManualTimeFilter {
    pub fn new(
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        let mut violations = Violations::default();
        check_manual(&mut violations, "time.manual", min, max);
        violations.into_result(Self { min, max })
    }

    pub fn min(&self) -> Option<DateTime<Utc>> {
        self.min
    }

    pub fn max(&self) -> Option<DateTime<Utc>> {
        self.max
    }
}

fn check_manual(
    violations: &mut Violations,
    field: &str,
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
) {
    match (min, max) {
        (None, None) => violations.push(field, "requires min, max or both"),
        (Some(min), Some(max)) if min >= max => violations.push(
            field,
            format!("min ({}) must be before max ({})", min.to_rfc3339(), max.to_rfc3339()),
        ),
        _ => {}
    }
}

/// Exactly one way of bounding `latestUpdate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeFilter {
    Offset(TimeOffset),
    CurrentPeriod(ActivePeriod),
    Manual(ManualTimeFilter),
}

/// Half-open instant range `[min, max)`. Unset bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.min.map_or(true, |min| instant >= min) && self.max.map_or(true, |max| instant < max)
    }
}

impl TimeFilter {
    /// Resolve to concrete instants relative to `now` in `tz`
    pub fn resolve(&self, now: DateTime<Utc>, tz: Tz) -> TimeRange {
        match self {
            // a window reaching past the representable range has no lower bound
            Self::Offset(offset) => TimeRange {
                min: now.checked_sub_signed(offset.duration()),
                max: None,
            },
            Self::Manual(manual) => TimeRange {
                min: manual.min,
                max: manual.max,
            },
            Self::CurrentPeriod(period) => {
                let today = now.with_timezone(&tz).date_naive();
                let (start, end) = period_bounds(*period, today);
                TimeRange {
                    min: Some(local_midnight(tz, start)),
                    max: Some(local_midnight(tz, end)),
                }
            }
        }
    }
}

/// First day of the period containing `today` and first day of the next one
fn period_bounds(period: ActivePeriod, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let (start, end) = match period {
        ActivePeriod::Today => (Some(today), today.checked_add_days(Days::new(1))),
        ActivePeriod::ThisWeek => {
            let monday = today
                .checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_monday())));
            (monday, monday.and_then(|d| d.checked_add_days(Days::new(7))))
        }
        ActivePeriod::ThisMonth => {
            let first = today.with_day(1);
            (first, first.and_then(|d| d.checked_add_months(Months::new(1))))
        }
        ActivePeriod::ThisYear => {
            let first = NaiveDate::from_ymd_opt(today.year(), 1, 1);
            (first, first.and_then(|d| d.checked_add_months(Months::new(12))))
        }
    };
    // Only the extremes of chrono's date range can fail here
    (start.unwrap_or(today), end.unwrap_or(NaiveDate::MAX))
}

/// Start of `date` in `tz`, skipping forward over a DST gap at midnight
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let mut candidate = midnight;
    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => {
                return at.with_timezone(&Utc)
            }
            LocalResult::None => candidate += Duration::minutes(30),
        }
    }
    midnight.and_utc()
}

/// Time part of a raw request. At most one variant may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeFilterRequest {
    pub offset: Option<TimeOffset>,
    pub current_period: Option<ActivePeriod>,
    pub manual: Option<ManualTimeRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTimeRequest {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

/// Unvalidated filter as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequest {
    pub time: Option<TimeFilterRequest>,

    /// IANA zone name overriding the configured default
    pub time_zone: Option<String>,

    pub source_application_ids: Option<Vec<i64>>,
    pub source_application_integration_ids: Option<Vec<String>>,
    pub source_application_instance_ids: Option<Vec<String>>,
    pub integration_ids: Option<Vec<i64>>,

    pub statuses: Option<Vec<InstanceStatus>>,
    pub latest_status_events: Option<Vec<String>>,

    pub storage_statuses: Option<Vec<StorageStatus>>,
    pub associated_events: Option<Vec<String>>,
    pub destination_ids: Option<Vec<String>>,
}

/// Status constraint: by lifecycle status or by explicit event names, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusFilter {
    Statuses(BTreeSet<InstanceStatus>),
    LatestStatusEvents(BTreeSet<&'static str>),
}

/// Validated query criteria. Absent fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub time: Option<TimeFilter>,
    pub time_zone: Option<Tz>,
    pub source_application_ids: Option<BTreeSet<i64>>,
    pub source_application_integration_ids: Option<BTreeSet<String>>,
    pub source_application_instance_ids: Option<BTreeSet<String>>,
    pub integration_ids: Option<BTreeSet<i64>>,
    pub status: Option<StatusFilter>,
    pub storage_statuses: Option<BTreeSet<StorageStatus>>,
    pub associated_events: Option<BTreeSet<&'static str>>,
    pub destination_ids: Option<BTreeSet<String>>,
}

impl Filter {
    /// Validate a raw request, reporting every violated field
    pub fn from_request(
        request: FilterRequest,
        categorization: &CategorizationService,
    ) -> Result<Self, ValidationError> {
        let mut violations = Violations::default();

        let time = request
            .time
            .and_then(|time| validate_time(&mut violations, time));

        let time_zone = request.time_zone.and_then(|name| match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                violations.push("timeZone", format!("unknown time zone '{}'", name));
                None
            }
        });

        let statuses = non_empty(request.statuses);
        let latest_status_events = non_empty(request.latest_status_events);
        let status = match (statuses, latest_status_events) {
            (Some(_), Some(_)) => {
                violations.push("statuses", "cannot be combined with latestStatusEvents");
                violations.push("latestStatusEvents", "cannot be combined with statuses");
                None
            }
            (Some(statuses), None) => Some(StatusFilter::Statuses(statuses.into_iter().collect())),
            (None, Some(names)) => {
                let mut resolved = BTreeSet::new();
                for name in names {
                    match categorization.category_of(&name) {
                        Ok(category) if category.status.is_some() => {
                            resolved.insert(category.event_name);
                        }
                        Ok(_) => violations.push(
                            "latestStatusEvents",
                            format!("'{}' does not carry a lifecycle status", name),
                        ),
                        Err(_) => violations.push(
                            "latestStatusEvents",
                            format!("unknown event category '{}'", name),
                        ),
                    }
                }
                Some(StatusFilter::LatestStatusEvents(resolved))
            }
            (None, None) => None,
        };

        let associated_events = non_empty(request.associated_events).map(|names| {
            let mut resolved = BTreeSet::new();
            for name in names {
                match categorization.category_of(&name) {
                    Ok(category) => {
                        resolved.insert(category.event_name);
                    }
                    Err(_) => violations.push(
                        "associatedEvents",
                        format!("unknown event category '{}'", name),
                    ),
                }
            }
            resolved
        });

        let filter = Filter {
            time,
            time_zone,
            source_application_ids: non_empty_set(request.source_application_ids),
            source_application_integration_ids: non_empty_set(
                request.source_application_integration_ids,
            ),
            source_application_instance_ids: non_empty_set(request.source_application_instance_ids),
            integration_ids: non_empty_set(request.integration_ids),
            status,
            storage_statuses: non_empty_set(request.storage_statuses),
            associated_events,
            destination_ids: non_empty_set(request.destination_ids),
        };

        violations.into_result(filter)
    }
}

fn validate_time(violations: &mut Violations, time: TimeFilterRequest) -> Option<TimeFilter> {
    let set = [
        ("time.offset", time.offset.is_some()),
        ("time.currentPeriod", time.current_period.is_some()),
        ("time.manual", time.manual.is_some()),
    ];
    let present: Vec<&str> = set.iter().filter(|(_, on)| *on).map(|(f, _)| *f).collect();
    if present.len() > 1 {
        for field in &present {
            violations.push(*field, "only one of offset, currentPeriod and manual may be set");
        }
        return None;
    }

    if let Some(offset) = time.offset {
        if offset.is_zero() {
            violations.push("time.offset", "must be longer than zero");
            return None;
        }
        if offset.duration() > Duration::days(MAX_OFFSET_DAYS) {
            violations.push(
                "time.offset",
                format!("must not exceed {} days", MAX_OFFSET_DAYS),
            );
            return None;
        }
        return Some(TimeFilter::Offset(offset));
    }
    if let Some(period) = time.current_period {
        return Some(TimeFilter::CurrentPeriod(period));
    }
    if let Some(manual) = time.manual {
        let before = violations.len();
        check_manual(violations, "time.manual", manual.min, manual.max);
        if violations.len() > before {
            return None;
        }
        return Some(TimeFilter::Manual(ManualTimeFilter {
            min: manual.min,
            max: manual.max,
        }));
    }
    None
}

fn non_empty<T>(values: Option<Vec<T>>) -> Option<Vec<T>> {
    values.filter(|v| !v.is_empty())
}

fn non_empty_set<T: Ord>(values: Option<Vec<T>>) -> Option<BTreeSet<T>> {
    non_empty(values).map(|v| v.into_iter().collect())
}
