use chrono::Utc;
use serde_json::Value;

use crate::error::ImportError;
use crate::models::{
    APP_ID, DailyLog, DietaryPatch, DietaryPrefs, Favorites, Goals, ImportSummary,
    SNAPSHOT_VERSION, Snapshot, Template, WaterLog, WeightLog,
};
use crate::store::{Domain, Store};

/// Full-state export of every synced domain.
#[must_use]
pub fn export_snapshot(store: &Store) -> Snapshot {
    Snapshot {
        app: Some(APP_ID.to_string()),
        version: Some(SNAPSHOT_VERSION),
        exported_at: Some(Utc::now().to_rfc3339()),
        log: Some(store.log()),
        goals: Some(store.goals()),
        water: Some(store.water()),
        weight: Some(store.weight()),
        favorites: Some(store.favorites()),
        templates: Some(store.templates()),
        dietary: Some(DietaryPatch::from(&store.dietary())),
    }
}

/// Check that `value` is a usable backup without touching the store.
pub fn parse_snapshot(value: Value) -> Result<Snapshot, ImportError> {
    if !value.is_object() {
        return Err(ImportError::Shape("backup must be a JSON object".to_string()));
    }
    let snapshot: Snapshot =
        serde_json::from_value(value).map_err(|e| ImportError::Shape(e.to_string()))?;
    if !snapshot.has_data() {
        return Err(ImportError::Shape(
            "backup contains none of log, goals, water, weight, favorites, templates, dietary"
                .to_string(),
        ));
    }
    if let Some(ref app) = snapshot.app {
        if app != APP_ID {
            tracing::warn!(app, "importing a backup from a different app identifier");
        }
    }
    Ok(snapshot)
}

pub fn import_str(store: &Store, text: &str) -> Result<ImportSummary, ImportError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ImportError::Parse(e.to_string()))?;
    import_value(store, value)
}

/// Validate the whole document first, then fold it in. A malformed document
/// leaves the store untouched.
pub fn import_value(store: &Store, value: Value) -> Result<ImportSummary, ImportError> {
    let snapshot = parse_snapshot(value)?;
    Ok(merge_snapshot(store, snapshot))
}

/// Fold an already validated snapshot into the live store.
pub fn merge_snapshot(store: &Store, snapshot: Snapshot) -> ImportSummary {
    let mut summary = ImportSummary::default();

    if let Some(incoming) = snapshot.log {
        summary.entries_added = store
            .update(Domain::Log, |log: &mut DailyLog| {
                incoming
                    .days()
                    .map(|(key, entries)| log.merge_day(key, entries.to_vec()))
                    .sum::<usize>()
            })
            .0;
    }

    if let Some(patch) = snapshot.goals {
        summary.goals_changed = store
            .update(Domain::Goals, |goals: &mut Goals| goals.merge(&patch))
            .0;
    }

    if let Some(incoming) = snapshot.favorites {
        summary.favorites_added = store
            .update(Domain::Favorites, |favs: &mut Favorites| favs.union(&incoming))
            .0;
    }

    if let Some(incoming) = snapshot.templates {
        let (added, skipped) = store
            .update(Domain::Templates, |templates: &mut Vec<Template>| {
                let mut added = 0;
                let mut skipped = 0;
                for template in incoming {
                    if templates.iter().any(|t| t.name == template.name) {
                        skipped += 1;
                    } else {
                        templates.push(template);
                        added += 1;
                    }
                }
                (added, skipped)
            })
            .0;
        summary.templates_added = added;
        summary.templates_skipped = skipped;
    }

    if let Some(incoming) = snapshot.water {
        summary.water_days_added = store
            .update(Domain::Water, |water: &mut WaterLog| water.fill_missing(&incoming))
            .0;
    }

    if let Some(incoming) = snapshot.weight {
        summary.weight_days_added = store
            .update(Domain::Weight, |weight: &mut WeightLog| {
                weight.fill_missing(&incoming)
            })
            .0;
    }

    if let Some(patch) = snapshot.dietary {
        summary.dietary_changed = store
            .update(Domain::Dietary, |prefs: &mut DietaryPrefs| patch.apply(prefs))
            .0;
    }

    tracing::info!(
        entries = summary.entries_added,
        favorites = summary.favorites_added,
        templates = summary.templates_added,
        "merged snapshot"
    );
    summary
}
