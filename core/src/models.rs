use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Identifier written into every exported snapshot.
pub const APP_ID: &str = "boilerfuel";
pub const SNAPSHOT_VERSION: u32 = 1;

pub const NUTRIENTS: &[&str] = &[
    "protein",
    "carbs",
    "fat",
    "sugar",
    "fiber",
    "sodium",
    "cholesterol",
    "saturated_fat",
    "added_sugar",
];

#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[must_use]
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_FORMAT).ok()
}

// --- Lenient number handling ---

/// Read the leading numeric prefix of a string, the way a browser `parseFloat`
/// reads `"12.5g"` as `12.5`. Anything without a leading number is `0`.
#[must_use]
pub fn parse_leading_number(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return 0.0;
    }
    s[..end].parse().unwrap_or(0.0)
}

/// Coerce an arbitrary JSON value into a finite number, defaulting to zero.
#[must_use]
pub fn number_from_value(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_leading_number(s),
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().map_or(0.0, number_from_value))
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .unwrap_or_else(|| n.as_f64().map_or(0, |f| f.round() as i64)),
        Some(other) => number_from_value(&other).round() as i64,
        None => 0,
    })
}

fn lenient_servings<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let n = lenient_f64(d)?;
    Ok(if n > 0.0 { n } else { default_servings() })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(id_from_value))
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn default_servings() -> f64 {
    1.0
}

// --- Meal entries ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, alias = "fats", deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sugar: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fiber: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sodium: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cholesterol: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub saturated_fat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub added_sugar: f64,
}

impl Macros {
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            protein: self.protein * factor,
            carbs: self.carbs * factor,
            fat: self.fat * factor,
            sugar: self.sugar * factor,
            fiber: self.fiber * factor,
            sodium: self.sodium * factor,
            cholesterol: self.cholesterol * factor,
            saturated_fat: self.saturated_fat * factor,
            added_sugar: self.added_sugar * factor,
        }
    }

    #[must_use]
    pub fn get(&self, nutrient: &str) -> Option<f64> {
        match nutrient {
            "protein" => Some(self.protein),
            "carbs" => Some(self.carbs),
            "fat" => Some(self.fat),
            "sugar" => Some(self.sugar),
            "fiber" => Some(self.fiber),
            "sodium" => Some(self.sodium),
            "cholesterol" => Some(self.cholesterol),
            "saturated_fat" => Some(self.saturated_fat),
            "added_sugar" => Some(self.added_sugar),
            _ => None,
        }
    }
}

impl std::ops::AddAssign for Macros {
    fn add_assign(&mut self, rhs: Self) {
        self.protein += rhs.protein;
        self.carbs += rhs.carbs;
        self.fat += rhs.fat;
        self.sugar += rhs.sugar;
        self.fiber += rhs.fiber;
        self.sodium += rhs.sodium;
        self.cholesterol += rhs.cholesterol;
        self.saturated_fat += rhs.saturated_fat;
        self.added_sugar += rhs.added_sugar;
    }
}

/// One logged food. Entries are never edited after creation; they are only
/// appended, removed, or replaced wholesale by a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealEntry {
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub calories: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub macros: Macros,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dining_court: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub station: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub meal_time: String,
    #[serde(default = "default_servings", deserialize_with = "lenient_servings")]
    pub servings: f64,
    #[serde(rename = "addedAt", default, deserialize_with = "lenient_i64")]
    pub added_at: i64,
}

/// What makes two entries on the same date "the same" during a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Id(String),
    AddedAt(i64),
}

impl MealEntry {
    #[must_use]
    pub fn new(id: Option<String>, name: &str, calories: i64, macros: Macros) -> Self {
        Self {
            id,
            name: name.to_string(),
            calories,
            macros,
            dining_court: String::new(),
            station: String::new(),
            meal_time: String::new(),
            servings: 1.0,
            added_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn identity_key(&self) -> EntryKey {
        match &self.id {
            Some(id) => EntryKey::Id(id.clone()),
            None => EntryKey::AddedAt(self.added_at),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn total_calories(&self) -> f64 {
        self.calories as f64 * self.servings
    }

    #[must_use]
    pub fn total_macros(&self) -> Macros {
        self.macros.scaled(self.servings)
    }
}

// --- Daily log ---

/// Date key → entries in arrival order. A date never maps to an empty list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<MealEntry>>")]
pub struct DailyLog(BTreeMap<String, Vec<MealEntry>>);

impl From<BTreeMap<String, Vec<MealEntry>>> for DailyLog {
    fn from(mut days: BTreeMap<String, Vec<MealEntry>>) -> Self {
        let before = days.len();
        days.retain(|key, entries| parse_date_key(key).is_some() && !entries.is_empty());
        if days.len() != before {
            tracing::warn!(
                dropped = before - days.len(),
                "dropped invalid or empty log dates"
            );
        }
        Self(days)
    }
}

impl DailyLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self, date: NaiveDate) -> &[MealEntry] {
        self.0.get(&date_key(date)).map_or(&[], Vec::as_slice)
    }

    pub fn push(&mut self, date: NaiveDate, entry: MealEntry) {
        self.0.entry(date_key(date)).or_default().push(entry);
    }

    /// Remove the most recently added entry with `id` on `date`.
    pub fn remove_last(&mut self, date: NaiveDate, id: &str) -> Option<MealEntry> {
        let key = date_key(date);
        let entries = self.0.get_mut(&key)?;
        let idx = entries.iter().rposition(|e| e.id.as_deref() == Some(id))?;
        let removed = entries.remove(idx);
        if entries.is_empty() {
            self.0.remove(&key);
        }
        Some(removed)
    }

    pub fn clear_day(&mut self, date: NaiveDate) -> usize {
        self.0.remove(&date_key(date)).map_or(0, |e| e.len())
    }

    /// Drop every date strictly before `cutoff`. Returns the number of entries removed.
    pub fn prune_before(&mut self, cutoff: NaiveDate) -> usize {
        let cutoff = date_key(cutoff);
        let keep = self.0.split_off(&cutoff);
        let removed = self.0.values().map(Vec::len).sum();
        self.0 = keep;
        removed
    }

    /// Append incoming entries for a date, skipping any whose identity key
    /// already exists locally for that date. Returns the number appended.
    pub fn merge_day(&mut self, key: &str, incoming: Vec<MealEntry>) -> usize {
        if incoming.is_empty() {
            return 0;
        }
        let day = self.0.entry(key.to_string()).or_default();
        let existing: std::collections::HashSet<EntryKey> =
            day.iter().map(MealEntry::identity_key).collect();
        let mut added = 0;
        for entry in incoming {
            if !existing.contains(&entry.identity_key()) {
                day.push(entry);
                added += 1;
            }
        }
        if day.is_empty() {
            self.0.remove(key);
        }
        added
    }

    /// Dates with at least one entry, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.0.keys().filter_map(|k| parse_date_key(k))
    }

    pub fn days(&self) -> impl Iterator<Item = (&str, &[MealEntry])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn has_entries(&self, date: NaiveDate) -> bool {
        self.0.contains_key(&date_key(date))
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn day_count(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// --- Goals ---

pub const DEFAULT_GOALS: &[(&str, f64)] = &[
    ("calories", 2000.0),
    ("protein", 150.0),
    ("carbs", 250.0),
    ("fat", 65.0),
];

/// Nutrient → daily target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>")]
pub struct Goals(BTreeMap<String, f64>);

impl From<BTreeMap<String, Value>> for Goals {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        Self(
            raw.into_iter()
                .filter(|(_, v)| matches!(v, Value::Number(_) | Value::String(_)))
                .map(|(k, v)| (k, number_from_value(&v)))
                .collect(),
        )
    }
}

impl Default for Goals {
    fn default() -> Self {
        Self(
            DEFAULT_GOALS
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
        )
    }
}

impl Goals {
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn get(&self, nutrient: &str) -> Option<f64> {
        self.0.get(nutrient).copied()
    }

    pub fn set(&mut self, nutrient: &str, target: f64) {
        self.0.insert(nutrient.to_string(), target);
    }

    /// Shallow merge: fields in `patch` overwrite, everything else is untouched.
    pub fn merge(&mut self, patch: &Goals) -> usize {
        let mut changed = 0;
        for (k, v) in &patch.0 {
            if self.0.insert(k.clone(), *v) != Some(*v) {
                changed += 1;
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// --- Favorites ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Value>")]
pub struct Favorites(BTreeSet<String>);

impl From<Vec<Value>> for Favorites {
    fn from(raw: Vec<Value>) -> Self {
        Self(raw.iter().filter_map(id_from_value).collect())
    }
}

impl Favorites {
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Returns whether `id` is a favorite after the toggle.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.0.remove(id) {
            false
        } else {
            self.0.insert(id.to_string());
            true
        }
    }

    pub fn union(&mut self, other: &Favorites) -> usize {
        let before = self.0.len();
        self.0.extend(other.0.iter().cloned());
        self.0.len() - before
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// --- Water / weight ---

/// Date → positive scalar. Setting a value to zero or below clears the date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>")]
pub struct DatedValues(BTreeMap<String, f64>);

pub type WaterLog = DatedValues;
pub type WeightLog = DatedValues;

impl From<BTreeMap<String, Value>> for DatedValues {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        Self(
            raw.into_iter()
                .filter(|(k, _)| parse_date_key(k).is_some())
                .map(|(k, v)| (k, number_from_value(&v)))
                .filter(|(_, v)| *v > 0.0)
                .collect(),
        )
    }
}

impl DatedValues {
    #[must_use]
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.0.get(&date_key(date)).copied()
    }

    pub fn set(&mut self, date: NaiveDate, value: f64) {
        if value > 0.0 && value.is_finite() {
            self.0.insert(date_key(date), value);
        } else {
            self.0.remove(&date_key(date));
        }
    }

    pub fn remove(&mut self, date: NaiveDate) -> Option<f64> {
        self.0.remove(&date_key(date))
    }

    /// Copy in dates that are absent locally; local values win.
    pub fn fill_missing(&mut self, other: &DatedValues) -> usize {
        let mut added = 0;
        for (k, v) in &other.0 {
            if !self.0.contains_key(k) {
                self.0.insert(k.clone(), *v);
                added += 1;
            }
        }
        added
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.0
            .iter()
            .filter_map(|(k, v)| parse_date_key(k).map(|d| (d, *v)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// --- Templates ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: Vec<MealEntry>,
    #[serde(rename = "createdAt", default, deserialize_with = "lenient_i64")]
    pub created_at: i64,
}

// --- Dietary preferences ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DietaryPrefs {
    #[serde(default)]
    pub vegetarian: bool,
    #[serde(default)]
    pub vegan: bool,
    #[serde(default)]
    pub exclude_allergens: Vec<String>,
}

/// Partial dietary preferences; absent fields leave local values alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DietaryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vegetarian: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vegan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_allergens: Option<Vec<String>>,
}

impl DietaryPatch {
    pub fn apply(&self, prefs: &mut DietaryPrefs) -> bool {
        let before = prefs.clone();
        if let Some(v) = self.vegetarian {
            prefs.vegetarian = v;
        }
        if let Some(v) = self.vegan {
            prefs.vegan = v;
        }
        if let Some(ref allergens) = self.exclude_allergens {
            prefs.exclude_allergens.clone_from(allergens);
        }
        *prefs != before
    }
}

impl From<&DietaryPrefs> for DietaryPatch {
    fn from(prefs: &DietaryPrefs) -> Self {
        Self {
            vegetarian: Some(prefs.vegetarian),
            vegan: Some(prefs.vegan),
            exclude_allergens: Some(prefs.exclude_allergens.clone()),
        }
    }
}

// --- Sync pairing ---

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPairing {
    pub token: String,
    pub secret: String,
}

impl fmt::Debug for SyncPairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPairing")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// --- Export / import ---

/// Full-state document produced by export and consumed by import and sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<DailyLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Goals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water: Option<WaterLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<WeightLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorites: Option<Favorites>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<Template>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dietary: Option<DietaryPatch>,
}

impl Snapshot {
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.log.is_some()
            || self.goals.is_some()
            || self.water.is_some()
            || self.weight.is_some()
            || self.favorites.is_some()
            || self.templates.is_some()
            || self.dietary.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub entries_added: usize,
    pub favorites_added: usize,
    pub templates_added: usize,
    pub templates_skipped: usize,
    pub water_days_added: usize,
    pub weight_days_added: usize,
    pub goals_changed: usize,
    pub dietary_changed: bool,
}
