use anyhow::Result;
use std::process;

use boilerfuel_core::models::DietaryPatch;
use boilerfuel_core::store::Store;

use super::helpers::report_outcome;

pub(crate) fn cmd_favorite_toggle(store: &Store, id: &str, json: bool) -> Result<()> {
    let now_favorite = store.toggle_favorite(id);
    if json {
        println!(
            "{}",
            serde_json::json!({ "id": id, "favorite": now_favorite })
        );
    } else if now_favorite {
        println!("Added {id} to favorites");
    } else {
        println!("Removed {id} from favorites");
    }
    Ok(())
}

pub(crate) fn cmd_favorite_list(store: &Store, json: bool) -> Result<()> {
    let favorites = store.favorites();
    if json {
        println!("{}", serde_json::to_string_pretty(&favorites)?);
        return Ok(());
    }
    if favorites.is_empty() {
        eprintln!("No favorites yet");
        process::exit(2);
    }
    for id in favorites.iter() {
        println!("{id}");
    }
    Ok(())
}

pub(crate) fn cmd_diet_show(store: &Store, json: bool) -> Result<()> {
    let prefs = store.dietary();
    if json {
        println!("{}", serde_json::to_string_pretty(&prefs)?);
        return Ok(());
    }
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Vegetarian: {}", yes_no(prefs.vegetarian));
    println!("Vegan:      {}", yes_no(prefs.vegan));
    if prefs.exclude_allergens.is_empty() {
        println!("Excluding:  none");
    } else {
        println!("Excluding:  {}", prefs.exclude_allergens.join(", "));
    }
    Ok(())
}

pub(crate) fn cmd_diet_set(
    store: &Store,
    vegetarian: Option<bool>,
    vegan: Option<bool>,
    exclude: Option<Vec<String>>,
    json: bool,
) -> Result<()> {
    let patch = DietaryPatch {
        vegetarian,
        vegan,
        exclude_allergens: exclude.map(|list| {
            list.iter()
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect()
        }),
    };
    report_outcome(store.set_dietary(&patch));
    cmd_diet_show(store, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diet_set_only_touches_given_fields() {
        let store = Store::in_memory();
        cmd_diet_set(&store, Some(true), None, None, true).unwrap();
        cmd_diet_set(
            &store,
            None,
            None,
            Some(vec![" Peanuts".to_string(), String::new()]),
            true,
        )
        .unwrap();

        let prefs = store.dietary();
        assert!(prefs.vegetarian);
        assert!(!prefs.vegan);
        assert_eq!(prefs.exclude_allergens, vec!["peanuts".to_string()]);
    }

    #[test]
    fn favorite_toggle_flips() {
        let store = Store::in_memory();
        cmd_favorite_toggle(&store, "menu-7", true).unwrap();
        assert!(store.favorites().contains("menu-7"));
        cmd_favorite_toggle(&store, "menu-7", true).unwrap();
        assert!(!store.favorites().contains("menu-7"));
    }
}
