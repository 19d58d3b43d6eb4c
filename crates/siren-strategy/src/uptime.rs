//! In-force calendar logic: a strategy may alarm only when the wall time
//! lies inside at least one configured daily range and is not shadowed by
//! a rest calendar (active calendars win on conflict).

use crate::model::{Calendar, CalendarKind, TimeRange, UptimeConfig};
use chrono::{DateTime, NaiveTime, Timelike, Utc};

/// Why `in_alarm_time` said no (or yes). Logged alongside paused
/// strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UptimeReason {
    InRange,
    NoRangeConfigured,
    OutsideTimeRanges,
    RestCalendar(i64),
    ActiveCalendar(i64),
}

impl std::fmt::Display for UptimeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UptimeReason::InRange => write!(f, "inside configured alarm time"),
            UptimeReason::NoRangeConfigured => write!(f, "no time range configured"),
            UptimeReason::OutsideTimeRanges => write!(f, "outside all configured time ranges"),
            UptimeReason::RestCalendar(id) => write!(f, "inside rest calendar {id}"),
            UptimeReason::ActiveCalendar(id) => write!(f, "inside active calendar {id}"),
        }
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

/// Inclusive-on-both-ends daily range check; `start > end` wraps
/// midnight (e.g. 23:00-04:00 is true at 23:30 and at 01:00).
pub fn range_contains(range: &TimeRange, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (parse_hhmm(&range.start), parse_hhmm(&range.end)) else {
        return false;
    };
    // Compare at minute granularity so the boundary minute is inclusive.
    let current = NaiveTime::from_hms_opt(now.time().hour(), now.time().minute(), 0)
        .unwrap_or(now.time());
    if start <= end {
        current >= start && current <= end
    } else {
        current >= start || current <= end
    }
}

/// Evaluates the in-force rule for a strategy's uptime config.
///
/// Rules, in order:
/// 1. active calendars (when any are configured) force the strategy on
///    while an occurrence covers `now`;
/// 2. rest calendars turn it off while an occurrence covers `now`;
/// 3. otherwise `now` must fall inside at least one daily time range
///    (no ranges configured means always on).
pub fn in_alarm_time(
    uptime: Option<&UptimeConfig>,
    calendars: &[Calendar],
    now: DateTime<Utc>,
) -> (bool, UptimeReason) {
    let Some(uptime) = uptime else {
        return (true, UptimeReason::NoRangeConfigured);
    };

    let now_secs = now.timestamp();
    let referenced: Vec<&Calendar> = calendars
        .iter()
        .filter(|c| uptime.calendar_ids.contains(&c.id))
        .collect();

    for cal in referenced.iter().filter(|c| c.kind == CalendarKind::Active) {
        if cal
            .items
            .iter()
            .any(|i| now_secs >= i.start_time && now_secs <= i.end_time)
        {
            return (true, UptimeReason::ActiveCalendar(cal.id));
        }
    }

    for cal in referenced.iter().filter(|c| c.kind == CalendarKind::Rest) {
        if cal
            .items
            .iter()
            .any(|i| now_secs >= i.start_time && now_secs <= i.end_time)
        {
            return (false, UptimeReason::RestCalendar(cal.id));
        }
    }

    if uptime.time_ranges.is_empty() {
        return (true, UptimeReason::NoRangeConfigured);
    }
    if uptime.time_ranges.iter().any(|r| range_contains(r, now)) {
        (true, UptimeReason::InRange)
    } else {
        (false, UptimeReason::OutsideTimeRanges)
    }
}
