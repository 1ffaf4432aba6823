use anyhow::{Result, bail};

use boilerfuel_core::models::date_key;
use boilerfuel_core::store::Store;

use super::helpers::{parse_date, report_outcome};

fn print_water(date: &str, glasses: f64, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({ "date": date, "glasses": glasses })
        );
    } else {
        println!("{date}: {glasses} glasses of water");
    }
}

pub(crate) fn cmd_water_add(
    store: &Store,
    glasses: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if !glasses.is_finite() {
        bail!("Invalid amount");
    }
    let date = parse_date(date)?;
    let total = store.add_water(date, glasses);
    print_water(&date_key(date), total, json);
    Ok(())
}

pub(crate) fn cmd_water_set(
    store: &Store,
    glasses: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if !glasses.is_finite() || glasses < 0.0 {
        bail!("Glasses must be zero or more");
    }
    let date = parse_date(date)?;
    report_outcome(store.set_water(date, glasses));
    print_water(&date_key(date), store.water().get(date).unwrap_or(0.0), json);
    Ok(())
}

pub(crate) fn cmd_water_show(store: &Store, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    print_water(&date_key(date), store.water().get(date).unwrap_or(0.0), json);
    Ok(())
}
