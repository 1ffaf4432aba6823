use anyhow::{Context, Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use boilerfuel_core::models::{Goals, NUTRIENTS};
use boilerfuel_core::store::Store;

use super::helpers::report_outcome;

/// Parse `nutrient=value` pairs into a goals patch.
fn parse_assignments(assignments: &[String]) -> Result<Goals> {
    let mut patch = Goals::empty();
    for raw in assignments {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("Expected nutrient=value, got '{raw}'"))?;
        let name = name.trim().to_lowercase().replace('-', "_");
        if name != "calories" && !NUTRIENTS.contains(&name.as_str()) {
            bail!(
                "Unknown nutrient '{name}'. Use calories, {}",
                NUTRIENTS.join(", ")
            );
        }
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid number for {name}: '{value}'"))?;
        if !value.is_finite() || value < 0.0 {
            bail!("Goal for {name} must be zero or more");
        }
        patch.set(&name, value);
    }
    Ok(patch)
}

fn print_goals(goals: &Goals) {
    #[derive(Tabled)]
    struct GoalRow {
        #[tabled(rename = "Nutrient")]
        nutrient: String,
        #[tabled(rename = "Daily goal")]
        target: String,
    }

    let rows: Vec<GoalRow> = goals
        .iter()
        .map(|(nutrient, target)| GoalRow {
            nutrient: nutrient.to_string(),
            target: format!("{target:.0}"),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_goals_show(store: &Store, json: bool) -> Result<()> {
    let goals = store.goals();
    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
    } else {
        print_goals(&goals);
    }
    Ok(())
}

pub(crate) fn cmd_goals_set(store: &Store, assignments: &[String], json: bool) -> Result<()> {
    if assignments.is_empty() {
        bail!("Nothing to set. Example: boilerfuel goals set calories=2200 protein=160");
    }
    let patch = parse_assignments(assignments)?;
    report_outcome(store.set_goals(&patch));

    let goals = store.goals();
    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
    } else {
        println!("Goals updated");
        print_goals(&goals);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_nutrients() {
        let patch = parse_assignments(&[
            "calories=2200".to_string(),
            "Saturated-Fat = 20".to_string(),
        ])
        .unwrap();
        assert_eq!(patch.get("calories"), Some(2200.0));
        assert_eq!(patch.get("saturated_fat"), Some(20.0));
    }

    #[test]
    fn rejects_bad_assignments() {
        assert!(parse_assignments(&["calories".to_string()]).is_err());
        assert!(parse_assignments(&["vitamins=3".to_string()]).is_err());
        assert!(parse_assignments(&["protein=lots".to_string()]).is_err());
        assert!(parse_assignments(&["protein=-1".to_string()]).is_err());
    }

    #[test]
    fn set_merges_over_defaults() {
        let store = Store::in_memory();
        cmd_goals_set(&store, &["protein=180".to_string()], true).unwrap();
        let goals = store.goals();
        assert_eq!(goals.get("protein"), Some(180.0));
        assert_eq!(goals.get("calories"), Some(2000.0));
    }
}
