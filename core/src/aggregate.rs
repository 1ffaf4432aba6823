//! Read-only derivations over the log. Nothing here is cached; every call
//! walks the log it is handed.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::{DailyLog, Macros, MealEntry, WaterLog, WeightLog};

/// Longest range a rollup will materialize.
pub const MAX_ROLLUP_DAYS: i64 = 3660;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DailyTotals {
    pub calories: f64,
    pub macros: Macros,
    pub entries: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streaks {
    pub current: u32,
    pub longest: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRollup {
    pub date: NaiveDate,
    pub totals: DailyTotals,
    pub water: f64,
    pub weight: Option<f64>,
}

#[must_use]
pub fn totals_for(entries: &[MealEntry]) -> DailyTotals {
    let mut totals = DailyTotals::default();
    for entry in entries {
        totals.calories += entry.total_calories();
        totals.macros += entry.total_macros();
        totals.entries += 1;
    }
    totals
}

#[must_use]
pub fn daily_totals(log: &DailyLog, date: NaiveDate) -> DailyTotals {
    totals_for(log.entries(date))
}

/// `current` counts back from today, or from yesterday when today has no
/// entries yet. `longest` is the longest run of consecutive logged dates.
#[must_use]
pub fn streaks(log: &DailyLog, today: NaiveDate) -> Streaks {
    let mut current = 0;
    let mut day = if log.has_entries(today) {
        today
    } else {
        today - Duration::days(1)
    };
    while log.has_entries(day) {
        current += 1;
        day -= Duration::days(1);
    }

    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for date in log.dates() {
        run = match prev {
            Some(p) if date - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(date);
    }

    Streaks { current, longest }
}

/// One record per calendar day in `start..=end`, including empty days.
#[must_use]
pub fn range_rollup(
    log: &DailyLog,
    water: &WaterLog,
    weight: &WeightLog,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<DayRollup> {
    if start > end {
        return Vec::new();
    }
    let span = (end - start).num_days() + 1;
    if span > MAX_ROLLUP_DAYS {
        tracing::warn!(%start, %end, "rollup range too large, refusing");
        return Vec::new();
    }

    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| DayRollup {
            date,
            totals: daily_totals(log, date),
            water: water.get(date).unwrap_or(0.0),
            weight: weight.get(date),
        })
        .collect()
}

/// Mean calories over the logged days in the `days`-long window ending today.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn average_calories(log: &DailyLog, today: NaiveDate, days: u32) -> Option<f64> {
    if days == 0 {
        return None;
    }
    let start = today - Duration::days(i64::from(days) - 1);
    let per_day: Vec<f64> = start
        .iter_days()
        .take_while(|d| *d <= today)
        .filter(|d| log.has_entries(*d))
        .map(|d| daily_totals(log, d).calories)
        .collect();
    if per_day.is_empty() {
        None
    } else {
        Some(per_day.iter().sum::<f64>() / per_day.len() as f64)
    }
}
