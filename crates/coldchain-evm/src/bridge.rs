//! Live subscription bridge.
//!
//! Turns push notifications into reconciliations. A notification is only a
//! cue: the bridge never looks at anything but its entity key.
//!
//! Per key there is at most one worker. A notification for a key whose worker
//! is running marks it dirty; when the worker finishes it runs exactly once
//! more, however many notifications arrived meanwhile. Workers for distinct
//! keys run concurrently but each holds a permit from the shared fetch
//! semaphore while reconciling.
//!
//! Callers that need the outcome, such as backfill, go through
//! [`SubscriptionBridge::reconcile_now`]. It claims the key in the same
//! table, so a notification for that key during the call is folded into one
//! trailing worker run after it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use coldchain_core::error::IndexerError;
use coldchain_core::push::{Notification, Subscription};
use coldchain_core::snapshot::ShipmentSnapshot;
use coldchain_core::types::EntityKey;

use crate::reconcile::Reconcile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Running,
    /// Running, with a follow-up owed.
    RunningDirty,
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub notifications: u64,
    pub reconciliations: u64,
    /// Notifications folded into an already-scheduled follow-up.
    pub coalesced: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    notifications: AtomicU64,
    reconciliations: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

struct Inner<R: ?Sized> {
    reconciler: Arc<R>,
    permits: Arc<Semaphore>,
    keys: Mutex<HashMap<EntityKey, KeyState>>,
    /// Number of keys with a live worker.
    active: watch::Sender<usize>,
    counters: Counters,
}

/// Coalescing notification → reconciliation scheduler.
pub struct SubscriptionBridge<R: ?Sized> {
    inner: Arc<Inner<R>>,
}

impl<R: ?Sized> Clone for SubscriptionBridge<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Reconcile + ?Sized> SubscriptionBridge<R> {
    pub fn new(reconciler: Arc<R>, permits: Arc<Semaphore>) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                reconciler,
                permits,
                keys: Mutex::new(HashMap::new()),
                active,
                counters: Counters::default(),
            }),
        }
    }

    fn keys(&self) -> MutexGuard<'_, HashMap<EntityKey, KeyState>> {
        self.inner.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one push notification.
    pub fn notify(&self, note: Notification) {
        self.inner.counters.notifications.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = %note.key.short(), kind = %note.kind, block = note.block_number, "notification");
        self.schedule(note.key);
    }

    /// Schedule a reconciliation of `key`. Returns `true` if a new worker was
    /// started, `false` if the request was folded into the running one.
    pub fn schedule(&self, key: EntityKey) -> bool {
        let mut keys = self.keys();
        match keys.entry(key) {
            Entry::Occupied(mut e) => {
                if *e.get() == KeyState::RunningDirty {
                    self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                }
                e.insert(KeyState::RunningDirty);
                false
            }
            Entry::Vacant(e) => {
                e.insert(KeyState::Running);
                self.inner.active.send_replace(keys.len());
                drop(keys);
                let bridge = self.clone();
                tokio::spawn(async move { bridge.work(key).await });
                true
            }
        }
    }

    async fn work(self, key: EntityKey) {
        loop {
            // A closed semaphore means the engine is gone; drop the key.
            let Ok(permit) = self.inner.permits.acquire().await else {
                tracing::debug!(key = %key.short(), "fetch permits closed; abandoning reconciliation");
                self.forget(key);
                return;
            };
            self.inner.counters.reconciliations.fetch_add(1, Ordering::Relaxed);
            if self.inner.reconciler.reconcile(key).await.is_err() {
                self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            drop(permit);

            if !self.finish(key) {
                return;
            }
            tracing::trace!(key = %key.short(), "running trailing reconciliation");
        }
    }

    /// End one run of `key`. Returns `true` if a trailing run is owed; the key
    /// then stays claimed for it.
    fn finish(&self, key: EntityKey) -> bool {
        let mut keys = self.keys();
        if keys.get(&key) == Some(&KeyState::RunningDirty) {
            keys.insert(key, KeyState::Running);
            true
        } else {
            keys.remove(&key);
            self.inner.active.send_replace(keys.len());
            false
        }
    }

    fn forget(&self, key: EntityKey) {
        let mut keys = self.keys();
        keys.remove(&key);
        self.inner.active.send_replace(keys.len());
    }

    /// Wait until no run of `key` is in flight, then claim it.
    async fn claim(&self, key: EntityKey) -> Claim<R> {
        // Subscribe before checking so a release in between is not missed.
        let mut released = self.inner.active.subscribe();
        loop {
            {
                let mut keys = self.keys();
                if let Entry::Vacant(e) = keys.entry(key) {
                    e.insert(KeyState::Running);
                    self.inner.active.send_replace(keys.len());
                    return Claim {
                        bridge: self.clone(),
                        key,
                    };
                }
            }
            // The sender lives in `self`, so the channel cannot close here.
            let _ = released.changed().await;
        }
    }

    /// Reconcile `key` on the caller's task and return the outcome.
    ///
    /// Serialized with bridge workers for the same key and bounded by the
    /// same permits. Notifications that arrive meanwhile schedule one
    /// trailing run once this call returns.
    pub async fn reconcile_now(
        &self,
        key: EntityKey,
    ) -> Result<Option<Arc<ShipmentSnapshot>>, IndexerError> {
        let _claim = self.claim(key).await;
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| IndexerError::Other("fetch permits closed".into()))?;
        self.inner.counters.reconciliations.fetch_add(1, Ordering::Relaxed);
        let outcome = self.inner.reconciler.reconcile(key).await;
        if outcome.is_err() {
            self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Forward every notification from `sub` until it closes. Aborting the
    /// returned task drops, and so releases, the subscription.
    pub fn attach(&self, mut sub: Subscription) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            tracing::debug!(id = %sub.id(), kind = %sub.kind(), "bridge attached");
            while let Some(note) = sub.recv().await {
                bridge.notify(note);
            }
        })
    }

    /// Keys with a reconciliation running or owed.
    pub fn in_flight(&self) -> usize {
        self.keys().len()
    }

    /// Resolves once no key is claimed.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn stats(&self) -> BridgeStats {
        let c = &self.inner.counters;
        BridgeStats {
            notifications: c.notifications.load(Ordering::Relaxed),
            reconciliations: c.reconciliations.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }
}

/// A key claimed by [`SubscriptionBridge::reconcile_now`]. Released on drop,
/// handing the key to a worker if a notification arrived meanwhile.
struct Claim<R: Reconcile + ?Sized> {
    bridge: SubscriptionBridge<R>,
    key: EntityKey,
}

impl<R: Reconcile + ?Sized> Drop for Claim<R> {
    fn drop(&mut self) {
        if !self.bridge.finish(self.key) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.bridge.clone().work(self.key));
            }
            Err(_) => self.bridge.forget(self.key),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
