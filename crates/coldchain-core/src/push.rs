//! In-process push hub and scoped subscription handles.
//!
//! [`PushHub`] fans published notifications out to every matching
//! subscription. A [`Subscription`] owns its receiving end and removes itself
//! from the hub on [`unsubscribe`](Subscription::unsubscribe) or drop,
//! whichever comes first.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::IndexerError;
use crate::event::EventKind;
use crate::source::PushChannel;
use crate::types::EntityKey;

/// A cue that `key` has new activity at `block_number`. Not the update itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub key: EntityKey,
    pub kind: EventKind,
    pub block_number: u64,
}

/// Hub-assigned subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription. Dropping it releases the underlying registration.
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    rx: mpsc::UnboundedReceiver<Notification>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        kind: EventKind,
        rx: mpsc::UnboundedReceiver<Notification>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            kind,
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next notification; `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Release the registration. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.rx.close();
            tracing::debug!(id = %self.id, kind = %self.kind, "unsubscribed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Entry {
    kind: EventKind,
    key: Option<EntityKey>,
    sender: mpsc::UnboundedSender<Notification>,
}

/// Fan-out registry of subscriptions.
#[derive(Clone, Default)]
pub struct PushHub {
    entries: Arc<Mutex<HashMap<SubscriptionId, Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscription and return its handle.
    pub fn register(&self, kind: EventKind, key: Option<EntityKey>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries().insert(id, Entry { kind, key, sender: tx });

        let entries = Arc::clone(&self.entries);
        Subscription::new(id, kind, rx, move || {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        })
    }

    /// Deliver `note` to every matching subscriber. Returns the number reached.
    pub fn publish(&self, note: Notification) -> usize {
        let entries = self.entries();
        entries
            .values()
            .filter(|e| e.kind == note.kind && e.key.map_or(true, |k| k == note.key))
            .filter(|e| e.sender.send(note).is_ok())
            .count()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PushChannel for PushHub {
    async fn subscribe(
        &self,
        kind: EventKind,
        key: Option<EntityKey>,
    ) -> Result<Subscription, IndexerError> {
        Ok(self.register(kind, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, kind: EventKind) -> Notification {
        Notification {
            key: EntityKey::from_shipment_id(id),
            kind,
            block_number: 1,
        }
    }

    #[tokio::test]
    async fn publish_routes_by_kind_and_key() {
        let hub = PushHub::new();
        let mut all = hub.register(EventKind::Delivered, None);
        let mut only_a = hub.register(EventKind::Delivered, Some(EntityKey::from_shipment_id("A")));

        assert_eq!(hub.publish(note("A", EventKind::Delivered)), 2);
        assert_eq!(hub.publish(note("B", EventKind::Delivered)), 1);
        assert_eq!(hub.publish(note("A", EventKind::Created)), 0);

        assert_eq!(all.recv().await.unwrap().key, EntityKey::from_shipment_id("A"));
        assert_eq!(all.recv().await.unwrap().key, EntityKey::from_shipment_id("B"));
        assert_eq!(only_a.recv().await.unwrap().key, EntityKey::from_shipment_id("A"));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let hub = PushHub::new();
        let mut sub = hub.register(EventKind::Created, None);
        assert_eq!(hub.len(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(hub.is_empty());
        assert!(!sub.is_active());
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn drop_releases_registration() {
        let hub = PushHub::new();
        {
            let _sub = hub.register(EventKind::TemperatureRecorded, None);
            assert_eq!(hub.len(), 1);
        }
        assert!(hub.is_empty());
    }
}
