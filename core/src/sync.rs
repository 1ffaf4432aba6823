//! Sync Client: pairs a device with a relay slot, pulls once on start, then
//! pushes the full encrypted snapshot after each quiet period.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::crypto;
use crate::error::SyncError;
use crate::merge::{export_snapshot, merge_snapshot, parse_snapshot};
use crate::models::{Snapshot, SyncPairing};
use crate::relay::{PullResponse, PushResponse, normalize_token};
use crate::store::{Domain, Store};

pub const PUSH_DEBOUNCE: Duration = Duration::from_secs(3);
pub const SUCCESS_COOLDOWN: Duration = Duration::from_secs(3);

/// The four relay operations, over whatever carries them.
pub trait RelayTransport: Send + Sync + 'static {
    fn create(&self) -> impl Future<Output = Result<String, SyncError>> + Send;

    fn push(
        &self,
        token: &str,
        ciphertext: &str,
        updated_at: i64,
    ) -> impl Future<Output = Result<PushResponse, SyncError>> + Send;

    fn pull(
        &self,
        token: &str,
        since: Option<i64>,
    ) -> impl Future<Output = Result<PullResponse, SyncError>> + Send;

    fn unpair(&self, token: &str) -> impl Future<Output = Result<(), SyncError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error(SyncError),
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Success => write!(f, "synced"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Serialize and encrypt a snapshot for the relay.
pub fn build_push_payload(snapshot: &Snapshot, secret: &str) -> Result<String, SyncError> {
    let plaintext = serde_json::to_vec(snapshot).map_err(|e| SyncError::Parse(e.to_string()))?;
    crypto::seal(secret, &plaintext).map_err(|e| SyncError::Relay(e.to_string()))
}

/// Decrypt and validate a pulled blob.
pub fn read_pull_payload(ciphertext: &str, secret: &str) -> Result<Snapshot, SyncError> {
    let plaintext = crypto::open(secret, ciphertext)?;
    let value: serde_json::Value =
        serde_json::from_slice(&plaintext).map_err(|e| SyncError::Parse(e.to_string()))?;
    parse_snapshot(value).map_err(|e| SyncError::Parse(e.to_string()))
}

// --- Debounce ---

/// Single pending timer. Arming again cancels the previous timer; a body that
/// has already started runs to completion and can be awaited with
/// [`Debouncer::settle`].
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn arm<F>(&self, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let in_flight = Arc::clone(&self.in_flight);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The body gets its own task so a later cancel only ever hits the sleep.
            let body = tokio::spawn(fire);
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(body);
        });
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Returns true if a timer was still waiting.
    pub fn cancel(&self) -> bool {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Wait for a body whose timer already fired.
    pub async fn settle(&self) {
        let body = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(body) = body {
            if let Err(e) = body.await {
                tracing::warn!(error = %e, "debounced task did not complete");
            }
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

// --- Client ---

struct Inner<T> {
    store: Arc<Store>,
    transport: T,
    debouncer: Debouncer,
    mounted: AtomicBool,
    dirty: AtomicBool,
    status: watch::Sender<SyncStatus>,
    status_epoch: AtomicU64,
    op_lock: tokio::sync::Mutex<()>,
}

pub struct SyncClient<T: RelayTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: RelayTransport> Clone for SyncClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RelayTransport> SyncClient<T> {
    pub fn new(store: Arc<Store>, transport: T) -> Self {
        Self::with_debounce(store, transport, PUSH_DEBOUNCE)
    }

    pub fn with_debounce(store: Arc<Store>, transport: T, delay: Duration) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        let inner = Arc::new(Inner {
            store: Arc::clone(&store),
            transport,
            debouncer: Debouncer::new(delay),
            mounted: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            status,
            status_epoch: AtomicU64::new(0),
            op_lock: tokio::sync::Mutex::new(()),
        });
        let weak = Arc::downgrade(&inner);
        store.on_change(move |domain| {
            if let Some(inner) = weak.upgrade() {
                SyncClient { inner }.notify_change(domain);
            }
        });
        Self { inner }
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn pairing(&self) -> Option<SyncPairing> {
        self.inner.store.pairing()
    }

    #[must_use]
    pub fn is_push_pending(&self) -> bool {
        self.inner.debouncer.is_armed()
    }

    /// Called for every write to a synced domain. Before `start` has finished
    /// its pull, changes are only remembered.
    pub fn notify_change(&self, domain: Domain) {
        if !domain.is_synced() {
            return;
        }
        if !self.inner.mounted.load(Ordering::SeqCst) {
            self.inner.dirty.store(true, Ordering::SeqCst);
            return;
        }
        if self.inner.store.pairing().is_some() {
            self.schedule_push();
        }
    }

    fn schedule_push(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            self.inner.dirty.store(true, Ordering::SeqCst);
            return;
        }
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        self.inner.debouncer.arm(async move {
            if let Some(inner) = weak.upgrade() {
                SyncClient { inner }.push_now().await;
            }
        });
    }

    fn set_status(&self, status: SyncStatus) {
        let epoch = self.inner.status_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let success = status == SyncStatus::Success;
        self.inner.status.send_replace(status);
        if success && tokio::runtime::Handle::try_current().is_ok() {
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(SUCCESS_COOLDOWN).await;
                if let Some(inner) = weak.upgrade() {
                    if inner.status_epoch.load(Ordering::SeqCst) == epoch {
                        inner.status.send_replace(SyncStatus::Idle);
                    }
                }
            });
        }
    }

    fn finish(&self, op: &str, result: Result<(), SyncError>) -> bool {
        match result {
            Ok(()) => {
                tracing::info!(op, "sync ok");
                self.set_status(SyncStatus::Success);
                true
            }
            Err(e) => {
                tracing::warn!(op, error = %e, "sync failed");
                self.set_status(SyncStatus::Error(e));
                false
            }
        }
    }

    fn still_paired(&self, pairing: &SyncPairing) -> bool {
        self.inner.store.pairing().as_ref() == Some(pairing)
    }

    /// Pull once if paired, then open the gate for debounced pushes. Changes
    /// made before or during the pull are pushed after the gate opens.
    pub async fn start(&self) -> bool {
        let ok = match self.inner.store.pairing() {
            Some(_) => self.pull_now().await,
            None => true,
        };
        self.mount();
        ok
    }

    fn mount(&self) {
        self.inner.mounted.store(true, Ordering::SeqCst);
        if self.inner.dirty.swap(false, Ordering::SeqCst) && self.inner.store.pairing().is_some()
        {
            self.schedule_push();
        }
    }

    /// Mint a new relay slot and push the current state into it.
    pub async fn create(&self) -> bool {
        let _op = self.inner.op_lock.lock().await;
        self.set_status(SyncStatus::Syncing);
        let previous = self.inner.store.pairing();
        let previous_watermark = self.inner.store.watermark();
        let result = async {
            let token = self.inner.transport.create().await?;
            let pairing = SyncPairing {
                token,
                secret: crypto::generate_secret(),
            };
            self.inner.store.set_pairing(&pairing);
            self.inner.store.set_watermark(0);
            if let Err(e) = self.push_with(&pairing).await {
                // Leave no pairing to a slot that never received our data.
                if let Err(cleanup) = self.inner.transport.unpair(&pairing.token).await {
                    tracing::debug!(error = %cleanup, "could not delete unused slot");
                }
                self.restore_pairing(previous.as_ref(), previous_watermark);
                return Err(e);
            }
            tracing::info!(token = pairing.token, "paired with new sync slot");
            Ok(())
        }
        .await;
        self.mount();
        self.finish("create", result)
    }

    /// Adopt an existing slot and pull from it. On failure the previous
    /// pairing, if any, is restored.
    pub async fn join(&self, token: &str, secret: &str) -> bool {
        let _op = self.inner.op_lock.lock().await;
        self.set_status(SyncStatus::Syncing);

        let Some(token) = normalize_token(token) else {
            return self.finish("join", Err(SyncError::TokenNotFound));
        };
        let secret = secret.trim();
        if secret.is_empty() {
            return self.finish("join", Err(SyncError::Decrypt));
        }

        let previous = self.inner.store.pairing();
        let previous_watermark = self.inner.store.watermark();
        let pairing = SyncPairing {
            token,
            secret: secret.to_string(),
        };
        self.inner.store.set_pairing(&pairing);
        self.inner.store.set_watermark(0);

        let result = self.pull_with(&pairing).await;
        let result = match result {
            Err(e) => {
                self.restore_pairing(previous.as_ref(), previous_watermark);
                Err(e)
            }
            Ok(()) => {
                tracing::info!(token = pairing.token, "joined sync slot");
                // Publish the merged state so the other device sees our history.
                let pushed = self.push_with(&pairing).await;
                if pushed.is_ok() {
                    self.inner.dirty.store(false, Ordering::SeqCst);
                }
                pushed
            }
        };
        self.mount();
        self.finish("join", result)
    }

    fn restore_pairing(&self, previous: Option<&SyncPairing>, watermark: i64) {
        match previous {
            Some(p) => {
                self.inner.store.set_pairing(p);
                self.inner.store.set_watermark(watermark);
            }
            None => self.inner.store.clear_pairing(),
        }
    }

    /// Delete the remote slot (best effort) and forget the local pairing.
    pub async fn unpair(&self) -> bool {
        self.inner.debouncer.cancel();
        let _op = self.inner.op_lock.lock().await;
        let Some(pairing) = self.inner.store.pairing() else {
            return true;
        };
        let remote = self.inner.transport.unpair(&pairing.token).await;
        self.inner.store.clear_pairing();
        self.inner.dirty.store(false, Ordering::SeqCst);
        self.set_status(SyncStatus::Idle);
        match remote {
            Ok(()) | Err(SyncError::TokenNotFound) => {
                tracing::info!(token = pairing.token, "unpaired");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not delete remote slot, forgot pairing anyway");
                false
            }
        }
    }

    pub async fn push_now(&self) -> bool {
        let _op = self.inner.op_lock.lock().await;
        let Some(pairing) = self.inner.store.pairing() else {
            return true;
        };
        self.set_status(SyncStatus::Syncing);
        let result = self.push_with(&pairing).await;
        self.finish("push", result)
    }

    pub async fn pull_now(&self) -> bool {
        let _op = self.inner.op_lock.lock().await;
        let Some(pairing) = self.inner.store.pairing() else {
            return self.finish("pull", Err(SyncError::NotPaired));
        };
        self.set_status(SyncStatus::Syncing);
        let result = self.pull_with(&pairing).await;
        self.finish("pull", result)
    }

    /// Send a pending debounced push right away.
    pub async fn flush(&self) -> bool {
        self.inner.debouncer.settle().await;
        let mut ok = true;
        // A refused push merges and re-arms the timer; send that one as well.
        for _ in 0..2 {
            if !(self.inner.debouncer.cancel() || self.inner.dirty.swap(false, Ordering::SeqCst)) {
                break;
            }
            ok = self.push_now().await;
        }
        ok
    }

    async fn push_with(&self, pairing: &SyncPairing) -> Result<(), SyncError> {
        let store = &self.inner.store;
        // Never stamp a push older than what we last saw on the relay.
        let updated_at = chrono::Utc::now()
            .timestamp_millis()
            .max(store.watermark().saturating_add(1));
        let ciphertext = build_push_payload(&export_snapshot(store), &pairing.secret)?;
        let ack = self
            .inner
            .transport
            .push(&pairing.token, &ciphertext, updated_at)
            .await?;

        if !self.still_paired(pairing) {
            tracing::debug!("pairing changed during push, discarding ack");
            return Ok(());
        }
        if ack.accepted {
            store.set_watermark(ack.updated_at);
            return Ok(());
        }

        tracing::info!(
            remote = ack.updated_at,
            "relay holds newer data, merging before pushing again"
        );
        self.pull_with(pairing).await?;
        self.schedule_push();
        Ok(())
    }

    async fn pull_with(&self, pairing: &SyncPairing) -> Result<(), SyncError> {
        let store = &self.inner.store;
        let since = store.watermark();
        let response = self
            .inner
            .transport
            .pull(&pairing.token, (since > 0).then_some(since))
            .await?;

        if !self.still_paired(pairing) {
            tracing::debug!("pairing changed during pull, discarding result");
            return Ok(());
        }
        if !response.changed {
            tracing::debug!(since, "remote unchanged");
            return Ok(());
        }
        let (Some(ciphertext), Some(updated_at)) = (response.ciphertext, response.updated_at)
        else {
            return Err(SyncError::Parse(
                "changed response without ciphertext".to_string(),
            ));
        };

        if !ciphertext.is_empty() {
            let snapshot = read_pull_payload(&ciphertext, &pairing.secret)?;
            let summary = merge_snapshot(store, snapshot);
            tracing::info!(
                updated_at,
                entries_added = summary.entries_added,
                "pulled remote snapshot"
            );
        }
        store.set_watermark(updated_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::NaiveDate;

    use super::*;
    use crate::models::{Macros, MealEntry};
    use crate::relay::LocalRelay;

    #[derive(Clone)]
    struct RecordingRelay {
        inner: LocalRelay,
        calls: Arc<Mutex<Vec<&'static str>>>,
        pull_delay: Duration,
        push_delay: Duration,
        fail_push: bool,
    }

    impl RecordingRelay {
        fn new(inner: LocalRelay) -> Self {
            Self {
                inner,
                calls: Arc::new(Mutex::new(Vec::new())),
                pull_delay: Duration::ZERO,
                push_delay: Duration::ZERO,
                fail_push: false,
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.calls().iter().filter(|c| **c == name).count()
        }

        fn record(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }
    }

    impl RelayTransport for RecordingRelay {
        async fn create(&self) -> Result<String, SyncError> {
            self.record("create");
            self.inner.create().await
        }

        async fn push(
            &self,
            token: &str,
            ciphertext: &str,
            updated_at: i64,
        ) -> Result<PushResponse, SyncError> {
            self.record("push");
            if !self.push_delay.is_zero() {
                tokio::time::sleep(self.push_delay).await;
            }
            if self.fail_push {
                return Err(SyncError::Network("connection reset".to_string()));
            }
            self.inner.push(token, ciphertext, updated_at).await
        }

        async fn pull(&self, token: &str, since: Option<i64>) -> Result<PullResponse, SyncError> {
            self.record("pull");
            if !self.pull_delay.is_zero() {
                tokio::time::sleep(self.pull_delay).await;
            }
            self.inner.pull(token, since).await
        }

        async fn unpair(&self, token: &str) -> Result<(), SyncError> {
            self.record("unpair");
            self.inner.unpair(token).await
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn meal(id: &str) -> MealEntry {
        MealEntry::new(Some(id.to_string()), id, 250, Macros::default())
    }

    fn new_store() -> Arc<Store> {
        Arc::new(Store::in_memory())
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_coalesces_and_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_secs(3));
        for _ in 0..5 {
            let f = Arc::clone(&fired);
            debouncer.arm(async move {
                f.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(debouncer.is_armed());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let f = Arc::clone(&fired);
        debouncer.arm(async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_settle_waits_for_running_body() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_secs(3));
        let f = Arc::clone(&fired);
        debouncer.arm(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert!(!debouncer.cancel());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        debouncer.settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Nothing left to wait for.
        debouncer.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_mutations_one_push() {
        let relay = RecordingRelay::new(LocalRelay::in_memory().unwrap());
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        assert!(client.create().await);
        assert!(client.start().await);
        let pushes_after_create = relay.count("push");

        for i in 0..10 {
            store.log_meal(today(), meal(&format!("item-{i}")));
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        store.toggle_favorite("item-3");
        store.add_water(today(), 2.0);
        assert!(client.is_push_pending());

        tokio::time::sleep(PUSH_DEBOUNCE + Duration::from_secs(1)).await;
        assert_eq!(relay.count("push"), pushes_after_create + 1);
        assert!(!client.is_push_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_precedes_push_on_start() {
        let local = LocalRelay::in_memory().unwrap();
        let token = local.create().await.unwrap();

        let mut relay = RecordingRelay::new(local);
        relay.pull_delay = Duration::from_secs(5);
        let store = new_store();
        store.set_pairing(&SyncPairing {
            token,
            secret: crypto::generate_secret(),
        });

        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        // Mutation lands before the client has mounted.
        store.log_meal(today(), meal("early"));

        let starter = {
            let client = client.clone();
            tokio::spawn(async move { client.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // And another one while the slow pull is in flight.
        store.log_meal(today(), meal("during"));
        assert!(starter.await.unwrap());

        tokio::time::sleep(PUSH_DEBOUNCE + Duration::from_secs(1)).await;
        assert_eq!(relay.calls(), vec!["pull", "push"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_join_reproduces_snapshot() {
        let relay = LocalRelay::in_memory().unwrap();

        let store_a = new_store();
        store_a.log_meal(today(), meal("pasta"));
        store_a.log_meal(today(), meal("pasta"));
        store_a.toggle_favorite("pasta");
        store_a.set_weight(today(), 75.0).unwrap();
        store_a.save_template("Lunch", vec![meal("wrap")]).unwrap();
        let client_a = SyncClient::new(Arc::clone(&store_a), relay.clone());
        assert!(client_a.create().await);
        let pairing = client_a.pairing().unwrap();

        let store_b = new_store();
        let client_b = SyncClient::new(Arc::clone(&store_b), relay.clone());
        assert!(client_b.join(&pairing.token.to_lowercase(), &pairing.secret).await);

        let a = export_snapshot(&store_a);
        let b = export_snapshot(&store_b);
        assert_eq!(a.log, b.log);
        assert_eq!(a.goals, b.goals);
        assert_eq!(a.favorites, b.favorites);
        assert_eq!(a.weight, b.weight);
        assert_eq!(a.templates, b.templates);
        assert_eq!(a.dietary, b.dietary);
        assert_eq!(client_b.pairing(), Some(pairing));
        assert_eq!(client_b.status(), SyncStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_publishes_local_history() {
        let relay = LocalRelay::in_memory().unwrap();
        let store_a = new_store();
        store_a.log_meal(today(), meal("a-meal"));
        let client_a = SyncClient::new(Arc::clone(&store_a), relay.clone());
        assert!(client_a.create().await);
        let pairing = client_a.pairing().unwrap();

        let store_b = new_store();
        store_b.log_meal(today(), meal("b-meal"));
        let client_b = SyncClient::new(Arc::clone(&store_b), relay.clone());
        assert!(client_b.join(&pairing.token, &pairing.secret).await);
        assert!(!client_b.is_push_pending());

        // No debounce wait: the merged state is already on the relay.
        let pulled = relay.pull(&pairing.token, None).await.unwrap();
        let snapshot = read_pull_payload(&pulled.ciphertext.unwrap(), &pairing.secret).unwrap();
        let ids: Vec<_> = snapshot
            .log
            .unwrap()
            .entries(today())
            .iter()
            .filter_map(|e| e.id.clone())
            .collect();
        assert!(ids.contains(&"a-meal".to_string()));
        assert!(ids.contains(&"b-meal".to_string()));
        assert_eq!(store_b.watermark(), pulled.updated_at.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failed_push_keeps_previous_pairing() {
        let local = LocalRelay::in_memory().unwrap();
        let mut relay = RecordingRelay::new(local.clone());
        relay.fail_push = true;
        let store = new_store();
        store.log_meal(today(), meal("kept"));
        let client = SyncClient::new(Arc::clone(&store), relay.clone());

        assert!(!client.create().await);
        assert!(store.pairing().is_none());
        assert_eq!(store.watermark(), 0);
        assert!(matches!(
            client.status(),
            SyncStatus::Error(SyncError::Network(_))
        ));
        assert_eq!(relay.calls(), vec!["create", "push", "unpair"]);

        // An existing pairing survives a failed re-create.
        let old = SyncPairing {
            token: local.create().await.unwrap(),
            secret: crypto::generate_secret(),
        };
        store.set_pairing(&old);
        store.set_watermark(42);
        assert!(!client.create().await);
        assert_eq!(store.pairing(), Some(old));
        assert_eq!(store.watermark(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_watermark_push_fails_cleanly() {
        let relay = LocalRelay::in_memory().unwrap();
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay);
        assert!(client.create().await);

        store.set_watermark(i64::MAX);
        assert!(!client.push_now().await);
        assert!(matches!(
            client.status(),
            SyncStatus::Error(SyncError::Relay(_))
        ));
        assert_eq!(store.watermark(), i64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_unknown_token_rolls_back() {
        let relay = LocalRelay::in_memory().unwrap();
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay);

        assert!(!client.join("ZZZZZZ", "whatever").await);
        assert!(store.pairing().is_none());
        assert_eq!(client.status(), SyncStatus::Error(SyncError::TokenNotFound));

        assert!(!client.join("bad", "whatever").await);
        assert!(store.pairing().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_wrong_secret_is_decrypt_error() {
        let relay = LocalRelay::in_memory().unwrap();
        let store_a = new_store();
        store_a.log_meal(today(), meal("toast"));
        let client_a = SyncClient::new(Arc::clone(&store_a), relay.clone());
        assert!(client_a.create().await);
        let token = client_a.pairing().unwrap().token;

        let store_b = new_store();
        let client_b = SyncClient::new(Arc::clone(&store_b), relay);
        assert!(!client_b.join(&token, "not-the-secret").await);
        assert_eq!(client_b.status(), SyncStatus::Error(SyncError::Decrypt));
        assert!(store_b.log().is_empty());
        assert!(store_b.pairing().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_reverts_to_idle_after_cooldown() {
        let relay = LocalRelay::in_memory().unwrap();
        let client = SyncClient::new(new_store(), relay);
        assert!(client.create().await);
        assert_eq!(client.status(), SyncStatus::Success);

        tokio::time::sleep(SUCCESS_COOLDOWN - Duration::from_millis(100)).await;
        assert_eq!(client.status(), SyncStatus::Success);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.status(), SyncStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_persists_until_next_attempt() {
        let relay = LocalRelay::in_memory().unwrap();
        let client = SyncClient::new(new_store(), relay);
        assert!(!client.pull_now().await);
        assert_eq!(client.status(), SyncStatus::Error(SyncError::NotPaired));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.status(), SyncStatus::Error(SyncError::NotPaired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_push_pulls_and_rearms() {
        let relay = LocalRelay::in_memory().unwrap();
        let store = new_store();
        store.log_meal(today(), meal("local"));
        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        assert!(client.create().await);
        assert!(client.start().await);
        let pairing = client.pairing().unwrap();

        // Another device pushed with a timestamp far ahead of ours.
        let remote_store = Store::in_memory();
        remote_store.log_meal(today(), meal("remote"));
        let far_future = chrono::Utc::now().timestamp_millis() + 60 * 60 * 1000;
        let payload = build_push_payload(&export_snapshot(&remote_store), &pairing.secret).unwrap();
        relay.push(&pairing.token, &payload, far_future).await.unwrap();

        store.log_meal(today(), meal("second"));
        tokio::time::sleep(PUSH_DEBOUNCE + Duration::from_secs(1)).await;

        let ids: Vec<_> = store
            .log()
            .entries(today())
            .iter()
            .filter_map(|e| e.id.clone())
            .collect();
        assert!(ids.contains(&"remote".to_string()));
        assert_eq!(store.watermark(), far_future);
        // The merge re-armed a push that now wins.
        assert!(client.is_push_pending());
        tokio::time::sleep(PUSH_DEBOUNCE + Duration::from_secs(1)).await;
        let pulled = relay.pull(&pairing.token, Some(far_future)).await.unwrap();
        assert!(pulled.changed);
        let snapshot = read_pull_payload(&pulled.ciphertext.unwrap(), &pairing.secret).unwrap();
        assert_eq!(snapshot.log.unwrap().entries(today()).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_discarded_after_pairing_removed() {
        let local = LocalRelay::in_memory().unwrap();
        let store_a = new_store();
        store_a.log_meal(today(), meal("remote"));
        let client_a = SyncClient::new(Arc::clone(&store_a), local.clone());
        assert!(client_a.create().await);
        let pairing = client_a.pairing().unwrap();

        let mut relay = RecordingRelay::new(local);
        relay.pull_delay = Duration::from_secs(2);
        let store_b = new_store();
        store_b.set_pairing(&pairing);
        let client_b = SyncClient::new(Arc::clone(&store_b), relay);

        let pulling = {
            let client = client_b.clone();
            tokio::spawn(async move { client.pull_now().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        store_b.clear_pairing();
        assert!(pulling.await.unwrap());
        assert!(store_b.log().is_empty());
        assert_eq!(store_b.watermark(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpair_deletes_slot_and_credentials() {
        let relay = LocalRelay::in_memory().unwrap();
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        assert!(client.create().await);
        let token = client.pairing().unwrap().token;

        assert!(client.unpair().await);
        assert!(store.pairing().is_none());
        assert_eq!(
            relay.pull(&token, None).await,
            Err(SyncError::TokenNotFound)
        );
        assert_eq!(client.status(), SyncStatus::Idle);
        assert!(client.unpair().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sends_pending_push() {
        let relay = RecordingRelay::new(LocalRelay::in_memory().unwrap());
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        assert!(client.create().await);
        assert!(client.start().await);

        store.log_meal(today(), meal("late"));
        assert!(client.is_push_pending());
        let before = relay.count("push");
        assert!(client.flush().await);
        assert_eq!(relay.count("push"), before + 1);
        assert!(!client.is_push_pending());

        // Nothing pending: flush is a no-op.
        assert!(client.flush().await);
        assert_eq!(relay.count("push"), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_push_in_flight() {
        let local = LocalRelay::in_memory().unwrap();
        let mut relay = RecordingRelay::new(local.clone());
        relay.push_delay = Duration::from_secs(2);
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        assert!(client.create().await);
        assert!(client.start().await);
        let pairing = client.pairing().unwrap();

        store.log_meal(today(), meal("late"));
        // The timer has fired and the push is waiting on the relay.
        tokio::time::sleep(PUSH_DEBOUNCE + Duration::from_millis(10)).await;
        assert!(!client.is_push_pending());

        assert!(client.flush().await);
        let pulled = local.pull(&pairing.token, None).await.unwrap();
        let snapshot = read_pull_payload(&pulled.ciphertext.unwrap(), &pairing.secret).unwrap();
        assert_eq!(snapshot.log.unwrap().entries(today()).len(), 1);
        assert_eq!(store.watermark(), pulled.updated_at.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpaired_mutations_never_push() {
        let relay = RecordingRelay::new(LocalRelay::in_memory().unwrap());
        let store = new_store();
        let client = SyncClient::new(Arc::clone(&store), relay.clone());
        assert!(client.start().await);
        store.log_meal(today(), meal("solo"));
        tokio::time::sleep(PUSH_DEBOUNCE * 2).await;
        assert!(relay.calls().is_empty());
    }

    #[test]
    fn test_payload_roundtrip_is_pure() {
        let store = Store::in_memory();
        store.log_meal(today(), meal("x"));
        let snapshot = export_snapshot(&store);
        let sealed = build_push_payload(&snapshot, "secret").unwrap();
        assert_eq!(read_pull_payload(&sealed, "secret").unwrap(), snapshot);
        assert_eq!(
            read_pull_payload(&sealed, "other"),
            Err(SyncError::Decrypt)
        );
    }
}
