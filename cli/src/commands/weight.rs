use anyhow::Result;
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use boilerfuel_core::models::date_key;
use boilerfuel_core::store::Store;

use super::helpers::{LBS_PER_KG, json_error, parse_date, report_outcome, to_kg};

#[derive(Serialize)]
struct WeightRecord {
    date: String,
    weight_kg: f64,
}

pub(crate) fn cmd_weight_log(
    store: &Store,
    value: f64,
    unit: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let weight_kg = to_kg(value, unit)?;
    if !unit.eq_ignore_ascii_case("kg") {
        eprintln!("Converting {value:.1} lbs to {weight_kg:.2} kg");
    }

    let date = parse_date(date)?;
    report_outcome(store.set_weight(date, weight_kg)?);

    let record = WeightRecord {
        date: date_key(date),
        weight_kg,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let lbs = record.weight_kg * LBS_PER_KG;
        println!(
            "Logged {:.1} kg ({lbs:.1} lbs) for {}",
            record.weight_kg, record.date
        );
    }

    Ok(())
}

pub(crate) fn cmd_weight_clear(store: &Store, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let date_str = date_key(date);

    if !store.clear_weight(date) {
        let msg = format!("No weight entry for {date_str}");
        if json {
            println!("{}", json_error(&msg));
        } else {
            eprintln!("{msg}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": date_str }));
    } else {
        println!("Deleted weight entry for {date_str}");
    }

    Ok(())
}

pub(crate) fn cmd_weight_history(store: &Store, days: Option<u32>, json: bool) -> Result<()> {
    let cutoff = days.map(|d| store.today() - chrono::Duration::days(i64::from(d)));
    let mut entries: Vec<WeightRecord> = store
        .weight()
        .iter()
        .filter(|(date, _)| cutoff.is_none_or(|c| *date > c))
        .map(|(date, weight_kg)| WeightRecord {
            date: date_key(date),
            weight_kg,
        })
        .collect();
    entries.reverse();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        eprintln!("No weight entries found. Use `boilerfuel weight log` to record your weight.");
    } else {
        #[derive(Tabled)]
        struct WeightRow {
            #[tabled(rename = "Date")]
            date: String,
            #[tabled(rename = "Weight (kg)")]
            kg: String,
            #[tabled(rename = "Weight (lbs)")]
            lbs: String,
        }

        let rows: Vec<WeightRow> = entries
            .iter()
            .map(|e| WeightRow {
                date: e.date.clone(),
                kg: format!("{:.1}", e.weight_kg),
                lbs: format!("{:.1}", e.weight_kg * LBS_PER_KG),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    Ok(())
}
