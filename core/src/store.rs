//! The Persistent Store: one independently serialized document per domain,
//! with every write routed through the Quota Guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::models::{
    DailyLog, DietaryPatch, DietaryPrefs, Favorites, Goals, MealEntry, SyncPairing, Template,
    WaterLog, WeightLog,
};
use crate::quota::{AdvisoryState, QuotaGuard, WriteOutcome};
use crate::storage::{MemoryBackend, StorageBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Log,
    Goals,
    Favorites,
    Water,
    Weight,
    Templates,
    Dietary,
    Pairing,
    Watermark,
}

impl Domain {
    /// Domains that are part of the exported snapshot and observed by sync.
    pub const SYNCED: [Domain; 7] = [
        Domain::Log,
        Domain::Goals,
        Domain::Favorites,
        Domain::Water,
        Domain::Weight,
        Domain::Templates,
        Domain::Dietary,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Domain::Log => "boilerfuel_meals",
            Domain::Goals => "boilerfuel_goals",
            Domain::Favorites => "boilerfuel_favorites",
            Domain::Water => "boilerfuel_water",
            Domain::Weight => "boilerfuel_weight",
            Domain::Templates => "boilerfuel_templates",
            Domain::Dietary => "boilerfuel_dietary",
            Domain::Pairing => "boilerfuel_sync_pairing",
            Domain::Watermark => "boilerfuel_sync_last_pull",
        }
    }

    #[must_use]
    pub fn is_synced(self) -> bool {
        Self::SYNCED.contains(&self)
    }
}

type Listener = Box<dyn Fn(Domain) + Send + Sync>;
type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct Store {
    backend: Arc<dyn StorageBackend>,
    guard: QuotaGuard,
    write_lock: Mutex<()>,
    listeners: Mutex<Vec<Listener>>,
    advisory_pending: AtomicBool,
    clock: Clock,
}

impl Store {
    pub fn new(backend: Arc<dyn StorageBackend>, advisory: Arc<AdvisoryState>) -> Self {
        Self {
            backend,
            guard: QuotaGuard::new(advisory),
            write_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            advisory_pending: AtomicBool::new(false),
            clock: Arc::new(|| Local::now().date_naive()),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(AdvisoryState::new()),
        )
    }

    /// Replace the source of "today" used for quota pruning.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    #[must_use]
    pub fn advisory(&self) -> &Arc<AdvisoryState> {
        self.guard.advisory()
    }

    /// Returns true once after a write was dropped and the export advisory
    /// should be shown.
    pub fn take_advisory(&self) -> bool {
        self.advisory_pending.swap(false, Ordering::SeqCst)
    }

    /// Register a callback run after every persisted write to a synced domain.
    /// Callbacks run synchronously and must not register further listeners.
    pub fn on_change(&self, listener: impl Fn(Domain) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    // --- Generic load/save ---

    /// Missing, unreadable and corrupt documents all yield the type's default.
    pub fn load<T: DeserializeOwned + Default>(&self, domain: Domain) -> T {
        let key = domain.key();
        match self.backend.read(key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "stored data is corrupt, using defaults");
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                tracing::warn!(key, error = %e, "read failed, using defaults");
                T::default()
            }
        }
    }

    pub fn save<T: Serialize>(&self, domain: Domain, value: &T) -> WriteOutcome {
        let outcome = {
            let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.write_locked(domain, value)
        };
        self.after_write(domain, outcome);
        outcome
    }

    /// Serialized read-modify-write of one domain.
    pub fn update<T, R>(&self, domain: Domain, f: impl FnOnce(&mut T) -> R) -> (R, WriteOutcome)
    where
        T: DeserializeOwned + Default + Serialize,
    {
        let (result, outcome) = {
            let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut value: T = self.load(domain);
            let result = f(&mut value);
            (result, self.write_locked(domain, &value))
        };
        self.after_write(domain, outcome);
        (result, outcome)
    }

    fn write_locked<T: Serialize>(&self, domain: Domain, value: &T) -> WriteOutcome {
        let key = domain.key();
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key, error = %e, "could not serialize domain");
                return WriteOutcome::Failed;
            }
        };
        if let Ok(Some(existing)) = self.backend.read(key) {
            if existing == payload {
                return WriteOutcome::Unchanged;
            }
        }
        self.guard
            .write(self.backend.as_ref(), key, &payload, self.today())
    }

    fn after_write(&self, domain: Domain, outcome: WriteOutcome) {
        if let WriteOutcome::Dropped {
            advise_export: true,
        } = outcome
        {
            self.advisory_pending.store(true, Ordering::SeqCst);
        }
        if !outcome.wrote() {
            return;
        }
        if domain.is_synced() {
            self.notify(domain);
        }
        if let WriteOutcome::Pruned { removed, .. } = outcome {
            if domain != Domain::Log && removed > 0 {
                self.notify(Domain::Log);
            }
        }
    }

    fn notify(&self, domain: Domain) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(domain);
        }
    }

    // --- Typed reads ---

    #[must_use]
    pub fn log(&self) -> DailyLog {
        self.load(Domain::Log)
    }

    #[must_use]
    pub fn goals(&self) -> Goals {
        self.load(Domain::Goals)
    }

    #[must_use]
    pub fn favorites(&self) -> Favorites {
        self.load(Domain::Favorites)
    }

    #[must_use]
    pub fn water(&self) -> WaterLog {
        self.load(Domain::Water)
    }

    #[must_use]
    pub fn weight(&self) -> WeightLog {
        self.load(Domain::Weight)
    }

    #[must_use]
    pub fn templates(&self) -> Vec<Template> {
        self.load(Domain::Templates)
    }

    #[must_use]
    pub fn dietary(&self) -> DietaryPrefs {
        self.load(Domain::Dietary)
    }

    #[must_use]
    pub fn pairing(&self) -> Option<SyncPairing> {
        self.load(Domain::Pairing)
    }

    /// `updated_at` of the last blob pulled or pushed, 0 when never synced.
    #[must_use]
    pub fn watermark(&self) -> i64 {
        self.load(Domain::Watermark)
    }

    // --- Log ---

    pub fn log_meal(&self, date: NaiveDate, entry: MealEntry) -> WriteOutcome {
        self.update(Domain::Log, |log: &mut DailyLog| log.push(date, entry))
            .1
    }

    /// Remove the most recently added entry with `id` on `date`.
    pub fn remove_meal(&self, date: NaiveDate, id: &str) -> Option<MealEntry> {
        self.update(Domain::Log, |log: &mut DailyLog| log.remove_last(date, id))
            .0
    }

    pub fn clear_day(&self, date: NaiveDate) -> usize {
        self.update(Domain::Log, |log: &mut DailyLog| log.clear_day(date))
            .0
    }

    // --- Goals / favorites / dietary ---

    pub fn set_goals(&self, patch: &Goals) -> WriteOutcome {
        self.update(Domain::Goals, |goals: &mut Goals| goals.merge(patch))
            .1
    }

    /// Returns whether `id` is a favorite afterwards.
    pub fn toggle_favorite(&self, id: &str) -> bool {
        self.update(Domain::Favorites, |favs: &mut Favorites| favs.toggle(id))
            .0
    }

    pub fn set_dietary(&self, patch: &DietaryPatch) -> WriteOutcome {
        self.update(Domain::Dietary, |prefs: &mut DietaryPrefs| patch.apply(prefs))
            .1
    }

    // --- Water / weight ---

    /// Add `delta` glasses, clamped at zero. Returns the new count.
    pub fn add_water(&self, date: NaiveDate, delta: f64) -> f64 {
        self.update(Domain::Water, |water: &mut WaterLog| {
            let delta = if delta.is_finite() { delta } else { 0.0 };
            let next = (water.get(date).unwrap_or(0.0) + delta).max(0.0);
            water.set(date, next);
            next
        })
        .0
    }

    pub fn set_water(&self, date: NaiveDate, glasses: f64) -> WriteOutcome {
        self.update(Domain::Water, |water: &mut WaterLog| {
            water.set(date, glasses.max(0.0));
        })
        .1
    }

    pub fn set_weight(&self, date: NaiveDate, kg: f64) -> Result<WriteOutcome, StoreError> {
        if !kg.is_finite() || kg <= 0.0 {
            return Err(StoreError::InvalidWeight(kg));
        }
        Ok(self
            .update(Domain::Weight, |weight: &mut WeightLog| weight.set(date, kg))
            .1)
    }

    pub fn clear_weight(&self, date: NaiveDate) -> bool {
        self.update(Domain::Weight, |weight: &mut WeightLog| {
            weight.remove(date).is_some()
        })
        .0
    }

    // --- Templates ---

    pub fn save_template(
        &self,
        name: &str,
        entries: Vec<MealEntry>,
    ) -> Result<WriteOutcome, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyTemplateName);
        }
        let (result, outcome) = self.update(Domain::Templates, |templates: &mut Vec<Template>| {
            if templates.iter().any(|t| t.name == name) {
                return Err(StoreError::TemplateExists(name.to_string()));
            }
            templates.push(Template {
                name: name.to_string(),
                entries,
                created_at: chrono::Utc::now().timestamp_millis(),
            });
            Ok(())
        });
        result.map(|()| outcome)
    }

    pub fn delete_template(&self, name: &str) -> bool {
        self.update(Domain::Templates, |templates: &mut Vec<Template>| {
            let before = templates.len();
            templates.retain(|t| t.name != name);
            templates.len() != before
        })
        .0
    }

    /// Copy a template's entries onto `date` with fresh `addedAt` stamps.
    pub fn apply_template(&self, name: &str, date: NaiveDate) -> Result<usize, StoreError> {
        let template = self
            .templates()
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| StoreError::TemplateNotFound(name.to_string()))?;
        let now = chrono::Utc::now().timestamp_millis();
        let count = template.entries.len();
        self.update(Domain::Log, |log: &mut DailyLog| {
            for (offset, mut entry) in (0_i64..).zip(template.entries) {
                entry.added_at = now + offset;
                log.push(date, entry);
            }
        });
        Ok(count)
    }

    // --- Pairing ---

    pub fn set_pairing(&self, pairing: &SyncPairing) -> WriteOutcome {
        self.save(Domain::Pairing, &Some(pairing))
    }

    /// Forget the pairing and its watermark.
    pub fn clear_pairing(&self) {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        for domain in [Domain::Pairing, Domain::Watermark] {
            if let Err(e) = self.backend.remove(domain.key()) {
                tracing::warn!(key = domain.key(), error = %e, "could not remove pairing data");
            }
        }
    }

    pub fn set_watermark(&self, updated_at: i64) -> WriteOutcome {
        self.save(Domain::Watermark, &updated_at)
    }
}
