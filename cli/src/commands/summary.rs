use anyhow::{Result, bail};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use boilerfuel_core::aggregate::{
    DailyTotals, MAX_ROLLUP_DAYS, Streaks, average_calories, range_rollup, streaks, totals_for,
};
use boilerfuel_core::models::{Goals, MealEntry, NUTRIENTS, date_key};
use boilerfuel_core::store::Store;

use super::helpers::{no_neg_zero, parse_date, truncate};

#[derive(Serialize)]
struct DaySummary {
    date: String,
    entries: Vec<MealEntry>,
    totals: DailyTotals,
    goals: Goals,
    water: f64,
    weight: Option<f64>,
}

pub(crate) fn cmd_summary(store: &Store, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let log = store.log();
    let entries = log.entries(date).to_vec();
    let summary = DaySummary {
        date: date_key(date),
        totals: totals_for(&entries),
        entries,
        goals: store.goals(),
        water: store.water().get(date).unwrap_or(0.0),
        weight: store.weight().get(date),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.entries.is_empty() {
        let date = &summary.date;
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    let date = &summary.date;
    println!("=== {date} ===\n");

    for e in &summary.entries {
        let id = e.id.as_deref().unwrap_or("-");
        let name = truncate(&e.name, 40);
        let where_from = match (e.dining_court.as_str(), e.meal_time.as_str()) {
            ("", "") => String::new(),
            (court, "") => format!(" ({court})"),
            ("", time) => format!(" ({time})"),
            (court, time) => format!(" ({court}, {time})"),
        };
        let servings = e.servings;
        let cal = e.total_calories();
        let m = e.total_macros();
        let (p, c, f) = (m.protein, m.carbs, m.fat);
        println!(
            "  [{id}] {name}{where_from} x{servings}: {cal:.0} kcal | P:{p:.0}g C:{c:.0}g F:{f:.0}g"
        );
    }
    println!();

    let t = &summary.totals;
    let total_cal = t.calories;
    let (total_p, total_c, total_f) = (t.macros.protein, t.macros.carbs, t.macros.fat);
    println!("  TOTAL: {total_cal:.0} kcal | P:{total_p:.0}g C:{total_c:.0}g F:{total_f:.0}g");

    let goals = &summary.goals;
    if let Some(gcal) = goals.get("calories") {
        let rcal = no_neg_zero(gcal - total_cal);
        println!("  GOAL: {gcal:.0} kcal | REMAINING: {rcal:.0} kcal");
    }
    let macro_goals: Vec<String> = NUTRIENTS
        .iter()
        .filter_map(|n| {
            let goal = goals.get(n)?;
            let eaten = t.macros.get(n).unwrap_or(0.0);
            Some(format!("{n} {eaten:.0}/{goal:.0}"))
        })
        .collect();
    if !macro_goals.is_empty() {
        println!("  PROGRESS: {}", macro_goals.join(" | "));
    }

    let water = summary.water;
    if water > 0.0 {
        println!("  WATER: {water} glasses");
    }
    if let Some(kg) = summary.weight {
        println!("  WEIGHT: {kg:.1} kg");
    }

    Ok(())
}

pub(crate) fn cmd_history(store: &Store, days: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
        #[tabled(rename = "Water")]
        water: String,
        #[tabled(rename = "Weight")]
        weight: String,
    }

    if days == 0 || i64::from(days) > MAX_ROLLUP_DAYS {
        bail!("Days must be between 1 and {MAX_ROLLUP_DAYS}");
    }

    let today = store.today();
    let start = today - chrono::Duration::days(i64::from(days) - 1);
    let mut rollup = range_rollup(&store.log(), &store.water(), &store.weight(), start, today);
    rollup.reverse();

    if json {
        println!("{}", serde_json::to_string_pretty(&rollup)?);
        return Ok(());
    }

    if rollup.iter().all(|d| d.totals.entries == 0) {
        eprintln!("No entries in the last {days} days");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = rollup
        .iter()
        .map(|d| {
            let cal = no_neg_zero(d.totals.calories);
            let p = no_neg_zero(d.totals.macros.protein);
            let c = no_neg_zero(d.totals.macros.carbs);
            let f = no_neg_zero(d.totals.macros.fat);
            HistoryRow {
                date: date_key(d.date),
                calories: format!("{cal:.0}"),
                protein: format!("{p:.0}g"),
                carbs: format!("{c:.0}g"),
                fat: format!("{f:.0}g"),
                water: if d.water > 0.0 {
                    format!("{}", d.water)
                } else {
                    String::new()
                },
                weight: d.weight.map(|w| format!("{w:.1}")).unwrap_or_default(),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    if let Some(avg) = average_calories(&store.log(), today, days) {
        println!("Average on logged days: {avg:.0} kcal");
    }

    Ok(())
}

pub(crate) fn cmd_streak(store: &Store, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct StreakReport {
        #[serde(flatten)]
        streaks: Streaks,
        weekly_average: Option<f64>,
    }

    let log = store.log();
    let today = store.today();
    let report = StreakReport {
        streaks: streaks(&log, today),
        weekly_average: average_calories(&log, today, 7),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let current = report.streaks.current;
    let longest = report.streaks.longest;
    println!("Current streak: {current} days");
    println!("Longest streak: {longest} days");
    if let Some(avg) = report.weekly_average {
        println!("7-day average: {avg:.0} kcal");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boilerfuel_core::models::Macros;

    #[test]
    fn history_rejects_out_of_range_days() {
        let store = Store::in_memory();
        assert!(cmd_history(&store, 0, true).is_err());
        assert!(cmd_history(&store, 5000, true).is_err());
    }

    #[test]
    fn json_output_works_on_empty_store() {
        let store = Store::in_memory();
        cmd_summary(&store, Some("2024-01-01".to_string()), true).unwrap();
        cmd_history(&store, 7, true).unwrap();
        cmd_streak(&store, true).unwrap();
    }

    #[test]
    fn streak_reads_store_clock() {
        let today = chrono::NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let store = Store::in_memory().with_clock(move || today);
        store.log_meal(today, MealEntry::new(None, "Oats", 300, Macros::default()));
        cmd_streak(&store, false).unwrap();
        assert_eq!(streaks(&store.log(), store.today()).current, 1);
    }
}
