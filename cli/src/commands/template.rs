use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use boilerfuel_core::aggregate::totals_for;
use boilerfuel_core::models::date_key;
use boilerfuel_core::store::Store;

use super::helpers::{json_error, parse_date, report_outcome, truncate};

/// Save the entries logged on `from_date` as a reusable template.
pub(crate) fn cmd_template_save(
    store: &Store,
    name: &str,
    from_date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(from_date)?;
    let entries = store.log().entries(date).to_vec();
    if entries.is_empty() {
        bail!("Nothing logged on {} to save", date_key(date));
    }

    let count = entries.len();
    report_outcome(store.save_template(name, entries)?);

    if json {
        println!(
            "{}",
            serde_json::json!({ "name": name.trim(), "entries": count })
        );
    } else {
        println!("Saved template '{}' with {count} entries", name.trim());
    }
    Ok(())
}

pub(crate) fn cmd_template_list(store: &Store, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TemplateRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Items")]
        items: usize,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Foods")]
        foods: String,
    }

    let templates = store.templates();

    if json {
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    if templates.is_empty() {
        eprintln!("No templates saved. Use `boilerfuel template save <name>` to create one.");
        process::exit(2);
    }

    let rows: Vec<TemplateRow> = templates
        .iter()
        .map(|t| {
            let names: Vec<&str> = t.entries.iter().map(|e| e.name.as_str()).collect();
            TemplateRow {
                name: t.name.clone(),
                items: t.entries.len(),
                calories: format!("{:.0}", totals_for(&t.entries).calories),
                foods: truncate(&names.join(", "), 50),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_template_apply(
    store: &Store,
    name: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let added = store.apply_template(name, date)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "name": name, "date": date_key(date), "added": added })
        );
    } else {
        println!("Added {added} entries from '{name}' to {}", date_key(date));
    }
    Ok(())
}

pub(crate) fn cmd_template_delete(store: &Store, name: &str, json: bool) -> Result<()> {
    if !store.delete_template(name) {
        let msg = format!("No template named '{name}'");
        if json {
            println!("{}", json_error(&msg));
        } else {
            eprintln!("{msg}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": name }));
    } else {
        println!("Deleted template '{name}'");
    }
    Ok(())
}
