use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, NaiveDate};

use crate::models::DailyLog;
use crate::storage::StorageBackend;
use crate::store::Domain;

/// Retention windows tried in order when the backend runs out of room.
pub const PRUNE_STAGES: [i64; 2] = [90, 30];

/// Result of a guarded write. Storage never raises to the caller; it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Content was identical to what is stored; nothing was written.
    Unchanged,
    /// Written after pruning log dates older than `retained_days`.
    Pruned { retained_days: i64, removed: usize },
    /// Dropped after every pruning stage failed. `advise_export` is true the
    /// first time this happens in a session.
    Dropped { advise_export: bool },
    /// Non-capacity backend failure, swallowed.
    Failed,
}

impl WriteOutcome {
    #[must_use]
    pub fn is_persisted(self) -> bool {
        matches!(self, Self::Written | Self::Unchanged | Self::Pruned { .. })
    }

    #[must_use]
    pub fn wrote(self) -> bool {
        matches!(self, Self::Written | Self::Pruned { .. })
    }
}

/// Session-scoped "export advisory already shown" flag.
#[derive(Debug, Default)]
pub struct AdvisoryState {
    shown: AtomicBool,
}

impl AdvisoryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once until the next `reset`.
    pub fn claim(&self) -> bool {
        !self.shown.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn was_shown(&self) -> bool {
        self.shown.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.shown.store(false, Ordering::SeqCst);
    }
}

pub struct QuotaGuard {
    advisory: Arc<AdvisoryState>,
}

impl QuotaGuard {
    #[must_use]
    pub fn new(advisory: Arc<AdvisoryState>) -> Self {
        Self { advisory }
    }

    #[must_use]
    pub fn advisory(&self) -> &Arc<AdvisoryState> {
        &self.advisory
    }

    pub fn write(
        &self,
        backend: &dyn StorageBackend,
        key: &str,
        payload: &str,
        today: NaiveDate,
    ) -> WriteOutcome {
        match backend.write(key, payload) {
            Ok(()) => WriteOutcome::Written,
            Err(e) if e.is_capacity() => {
                tracing::warn!(key, error = %e, "storage full, pruning old log entries");
                self.recover(backend, key, payload, today)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "write failed, continuing without persisting");
                WriteOutcome::Failed
            }
        }
    }

    fn recover(
        &self,
        backend: &dyn StorageBackend,
        key: &str,
        payload: &str,
        today: NaiveDate,
    ) -> WriteOutcome {
        let log_key = Domain::Log.key();
        let mut removed_total = 0;

        for retained_days in PRUNE_STAGES {
            let cutoff = today - Duration::days(retained_days);

            let attempt = if key == log_key {
                // The pending value is the log itself; shrink it instead of
                // the copy that is about to be replaced.
                let mut log: DailyLog = serde_json::from_str(payload).unwrap_or_default();
                let removed = log.prune_before(cutoff);
                match serde_json::to_string(&log) {
                    Ok(pruned) => backend.write(key, &pruned).map(|()| removed),
                    Err(e) => {
                        tracing::warn!(error = %e, "could not reserialize pruned log");
                        return WriteOutcome::Failed;
                    }
                }
            } else {
                removed_total += prune_stored_log(backend, log_key, cutoff);
                backend.write(key, payload).map(|()| removed_total)
            };

            match attempt {
                Ok(removed) => {
                    tracing::info!(key, retained_days, removed, "write succeeded after pruning");
                    return WriteOutcome::Pruned {
                        retained_days,
                        removed,
                    };
                }
                Err(e) if e.is_capacity() => {}
                Err(e) => {
                    tracing::warn!(key, error = %e, "write failed during recovery");
                    return WriteOutcome::Failed;
                }
            }
        }

        let advise_export = self.advisory.claim();
        tracing::warn!(key, advise_export, "storage still full, write dropped");
        WriteOutcome::Dropped { advise_export }
    }
}

fn prune_stored_log(backend: &dyn StorageBackend, log_key: &str, cutoff: NaiveDate) -> usize {
    let Ok(Some(raw)) = backend.read(log_key) else {
        return 0;
    };
    let Ok(mut log) = serde_json::from_str::<DailyLog>(&raw) else {
        return 0;
    };
    let removed = log.prune_before(cutoff);
    if removed == 0 {
        return 0;
    }
    let Ok(pruned) = serde_json::to_string(&log) else {
        return 0;
    };
    match backend.write(log_key, &pruned) {
        Ok(()) => removed,
        Err(e) => {
            tracing::warn!(error = %e, "could not rewrite pruned log");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::models::{Macros, MealEntry};
    use crate::storage::MemoryBackend;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn log_spanning(days_back: &[i64]) -> DailyLog {
        let mut log = DailyLog::new();
        for (i, d) in days_back.iter().enumerate() {
            let mut e = MealEntry::new(Some(format!("food-{i}")), "Oatmeal", 150, Macros::default());
            e.added_at = i64::try_from(i).unwrap();
            log.push(today() - Duration::days(*d), e);
        }
        log
    }

    fn guard() -> QuotaGuard {
        QuotaGuard::new(Arc::new(AdvisoryState::new()))
    }

    #[test]
    fn test_advisory_claims_once_until_reset() {
        let state = AdvisoryState::new();
        assert!(state.claim());
        assert!(!state.claim());
        assert!(state.was_shown());
        state.reset();
        assert!(state.claim());
    }

    #[test]
    fn test_plain_write_passes_through() {
        let backend = MemoryBackend::new();
        let outcome = guard().write(&backend, "k", "v", today());
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[test]
    fn test_other_domain_write_prunes_stored_log() {
        let backend = MemoryBackend::new();
        let log = log_spanning(&[200, 120, 91, 90, 10, 0]);
        let log_json = serde_json::to_string(&log).unwrap();
        backend.write(Domain::Log.key(), &log_json).unwrap();

        let pruned_len = {
            let mut l = log.clone();
            l.prune_before(today() - Duration::days(90));
            serde_json::to_string(&l).unwrap().len()
        };
        let payload = "x".repeat(100);
        // Room for the 90-day log plus the payload, but not the full log.
        backend.set_quota(Some(
            Domain::Log.key().len() + pruned_len + "k".len() + payload.len(),
        ));

        let outcome = guard().write(&backend, "k", &payload, today());
        assert_eq!(outcome, WriteOutcome::Pruned {
            retained_days: 90,
            removed: 3
        });

        let stored: DailyLog =
            serde_json::from_str(&backend.read(Domain::Log.key()).unwrap().unwrap()).unwrap();
        assert_eq!(stored.entry_count(), 3);
        assert!(stored.dates().all(|d| d >= today() - Duration::days(90)));
        assert_eq!(backend.read("k").unwrap().as_deref(), Some(payload.as_str()));
    }

    #[test]
    fn test_log_write_prunes_pending_value() {
        let backend = MemoryBackend::new();
        let log = log_spanning(&[100, 40, 5]);
        let payload = serde_json::to_string(&log).unwrap();

        let mut thirty = log.clone();
        thirty.prune_before(today() - Duration::days(30));
        let thirty_len = serde_json::to_string(&thirty).unwrap().len();
        backend.set_quota(Some(Domain::Log.key().len() + thirty_len));

        let outcome = guard().write(&backend, Domain::Log.key(), &payload, today());
        assert_eq!(outcome, WriteOutcome::Pruned {
            retained_days: 30,
            removed: 2
        });
        let stored: DailyLog =
            serde_json::from_str(&backend.read(Domain::Log.key()).unwrap().unwrap()).unwrap();
        assert_eq!(stored.entry_count(), 1);
    }

    #[test]
    fn test_drop_advises_once() {
        let backend = MemoryBackend::with_quota(4);
        let g = guard();
        assert_eq!(
            g.write(&backend, "key", "too large", today()),
            WriteOutcome::Dropped {
                advise_export: true
            }
        );
        assert_eq!(
            g.write(&backend, "key", "still too large", today()),
            WriteOutcome::Dropped {
                advise_export: false
            }
        );
        assert_eq!(backend.read("key").unwrap(), None);
    }

    struct BrokenBackend;

    impl StorageBackend for BrokenBackend {
        fn read(&self, _key: &str) -> Result<Option<String>, BackendError> {
            Ok(None)
        }
        fn write(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
            Err(BackendError::Other("disk on fire".to_string()))
        }
        fn remove(&self, _key: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn test_non_capacity_error_is_swallowed() {
        let g = guard();
        assert_eq!(g.write(&BrokenBackend, "k", "v", today()), WriteOutcome::Failed);
        assert!(!g.advisory().was_shown());
    }
}
