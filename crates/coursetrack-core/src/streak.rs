//! Streak and weekly-activity aggregation over a completion history.
//!
//! Everything here is a pure function of `(history, now)`. Calendar dates are
//! taken in the time zone of `now`.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use serde::Serialize;

use crate::ledger::CompletionHistory;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakSummary {
    pub streak: u32,
    pub weekly_count: usize,
    pub has_completed_today: bool,
}

#[must_use]
pub fn analyze<Tz: TimeZone>(history: &CompletionHistory, now: &DateTime<Tz>) -> StreakSummary {
    let zone = now.timezone();
    let today = now.date_naive();
    let active_days: BTreeSet<NaiveDate> = history
        .values()
        .map(|ts| ts.with_timezone(&zone).date_naive())
        .collect();

    let has_completed_today = active_days.contains(&today);

    // A missing today does not break a streak credited through yesterday.
    let mut cursor = if has_completed_today {
        Some(today)
    } else {
        today.pred_opt()
    };
    let mut streak = 0_u32;
    while let Some(day) = cursor.filter(|day| active_days.contains(day)) {
        streak += 1;
        cursor = day.pred_opt();
    }

    let week_start = start_of_week(today);
    let weekly_count = history
        .values()
        .filter(|ts| ts.with_timezone(&zone).date_naive() >= week_start)
        .count();

    StreakSummary {
        streak,
        weekly_count,
        has_completed_today,
    }
}

/// Completions per day of the current week, Sunday first.
#[must_use]
pub fn weekly_activity<Tz: TimeZone>(history: &CompletionHistory, now: &DateTime<Tz>) -> [usize; 7] {
    let zone = now.timezone();
    let week_start = start_of_week(now.date_naive());
    let mut days = [0_usize; 7];

    for ts in history.values() {
        let offset = (ts.with_timezone(&zone).date_naive() - week_start).num_days();
        if let Some(slot) = usize::try_from(offset).ok().and_then(|idx| days.get_mut(idx)) {
            *slot += 1;
        }
    }

    days
}

fn start_of_week(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
}
