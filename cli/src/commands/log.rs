use anyhow::{Result, bail};
use clap::Args;
use std::process;

use boilerfuel_core::models::{Macros, MealEntry, date_key};
use boilerfuel_core::store::Store;

use super::helpers::{json_error, parse_date, report_outcome};

#[derive(Args)]
pub(crate) struct MealArgs {
    /// Food name as it should appear in the log
    pub name: String,
    /// Calories per serving
    #[arg(short, long)]
    pub calories: i64,
    /// Protein per serving (g)
    #[arg(short, long, default_value_t = 0.0)]
    pub protein: f64,
    /// Carbs per serving (g)
    #[arg(long, default_value_t = 0.0)]
    pub carbs: f64,
    /// Fat per serving (g)
    #[arg(short, long, default_value_t = 0.0)]
    pub fat: f64,
    /// Sugar per serving (g)
    #[arg(long, default_value_t = 0.0)]
    pub sugar: f64,
    /// Fiber per serving (g)
    #[arg(long, default_value_t = 0.0)]
    pub fiber: f64,
    /// Sodium per serving (mg)
    #[arg(long, default_value_t = 0.0)]
    pub sodium: f64,
    /// Number of servings eaten
    #[arg(short, long, default_value_t = 1.0)]
    pub servings: f64,
    /// Menu item id (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,
    /// Dining court the food came from
    #[arg(long)]
    pub court: Option<String>,
    /// Station within the dining court
    #[arg(long)]
    pub station: Option<String>,
    /// Meal period (breakfast, lunch, dinner, ...)
    #[arg(short, long)]
    pub meal_time: Option<String>,
    /// Date (YYYY-MM-DD, today, yesterday, tomorrow)
    #[arg(short, long)]
    pub date: Option<String>,
}

impl MealArgs {
    fn into_entry(self) -> Result<MealEntry> {
        if self.calories < 0 {
            bail!("Calories cannot be negative");
        }
        if !self.servings.is_finite() || self.servings <= 0.0 {
            bail!("Servings must be a positive number");
        }
        let macros = Macros {
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            sugar: self.sugar,
            fiber: self.fiber,
            sodium: self.sodium,
            ..Macros::default()
        };
        let id = self
            .id
            .unwrap_or_else(|| format!("custom-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let mut entry = MealEntry::new(Some(id), self.name.trim(), self.calories, macros);
        entry.servings = self.servings;
        entry.dining_court = self.court.unwrap_or_default();
        entry.station = self.station.unwrap_or_default();
        entry.meal_time = self.meal_time.unwrap_or_default();
        Ok(entry)
    }
}

pub(crate) fn cmd_log(store: &Store, args: MealArgs, json: bool) -> Result<()> {
    let date = parse_date(args.date.clone())?;
    let entry = args.into_entry()?;

    let outcome = store.log_meal(date, entry.clone());
    report_outcome(outcome);
    if !outcome.is_persisted() {
        bail!("Entry was not saved");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        let name = &entry.name;
        let cal = entry.total_calories();
        let id = entry.id.as_deref().unwrap_or("-");
        let servings = entry.servings;
        let date = date_key(date);
        println!("Logged: {name} x{servings} on {date}: {cal:.0} kcal [{id}]");
    }

    Ok(())
}

pub(crate) fn cmd_remove(store: &Store, id: &str, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;

    let Some(entry) = store.remove_meal(date, id) else {
        let msg = format!("No entry '{id}' on {}", date_key(date));
        if json {
            println!("{}", json_error(&msg));
        } else {
            eprintln!("{msg}");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        let name = &entry.name;
        println!("Removed: {name} from {}", date_key(date));
    }

    Ok(())
}

pub(crate) fn cmd_clear(store: &Store, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let removed = store.clear_day(date);

    if json {
        println!(
            "{}",
            serde_json::json!({ "date": date_key(date), "removed": removed })
        );
    } else if removed == 0 {
        println!("Nothing logged on {}", date_key(date));
    } else {
        println!("Cleared {removed} entries from {}", date_key(date));
    }

    Ok(())
}
