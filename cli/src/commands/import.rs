use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use boilerfuel_core::merge::{export_snapshot, import_str};
use boilerfuel_core::store::Store;

fn default_backup_name(store: &Store) -> PathBuf {
    PathBuf::from(format!(
        "boilerfuel-backup-{}.json",
        store.today().format("%Y-%m-%d")
    ))
}

/// Write a full snapshot to `output`, or to stdout when `output` is `-`.
pub fn cmd_export(store: &Store, output: Option<PathBuf>, json: bool) -> Result<()> {
    let snapshot = export_snapshot(store);
    let body = serde_json::to_string_pretty(&snapshot)?;

    if output.as_deref() == Some(Path::new("-")) {
        println!("{body}");
        return Ok(());
    }

    let path = output.unwrap_or_else(|| default_backup_name(store));
    std::fs::write(&path, &body)
        .with_context(|| format!("Failed to write backup: {}", path.display()))?;

    let days = snapshot.log.as_ref().map_or(0, |l| l.day_count());
    let entries = snapshot.log.as_ref().map_or(0, |l| l.entry_count());
    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": path.display().to_string(),
                "days": days,
                "entries": entries,
                "bytes": body.len(),
            })
        );
    } else {
        println!(
            "Exported {entries} entries across {days} days to {}",
            path.display()
        );
    }
    Ok(())
}

pub fn cmd_import(store: &Store, path: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let summary = import_str(store, &text)
        .with_context(|| format!("Could not import {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Import complete.\n");
        println!("  Entries added:    {}", summary.entries_added);
        println!("  Favorites added:  {}", summary.favorites_added);
        println!("  Templates added:  {}", summary.templates_added);
        if summary.templates_skipped > 0 {
            println!(
                "  Templates kept:   {} (name already in use)",
                summary.templates_skipped
            );
        }
        println!("  Water days added: {}", summary.water_days_added);
        println!("  Weight days added: {}", summary.weight_days_added);
        println!("  Goals changed:    {}", summary.goals_changed);
        if summary.dietary_changed {
            println!("  Dietary preferences updated");
        }
    }

    Ok(())
}
