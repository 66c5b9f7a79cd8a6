//! In-memory entity store: the single source of truth for readers.
//!
//! Snapshots are held behind `Arc` and replaced whole on commit, so a reader
//! either sees the previous snapshot or the new one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::snapshot::ShipmentSnapshot;
use crate::types::EntityKey;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Thread-safe map from entity key to its latest committed snapshot.
pub struct EntityStore {
    snapshots: RwLock<HashMap<EntityKey, Arc<ShipmentSnapshot>>>,
    updates: broadcast::Sender<EntityKey>,
}

impl EntityStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            snapshots: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Latest committed snapshot for `key`.
    pub fn get(&self, key: &EntityKey) -> Option<Arc<ShipmentSnapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Atomically replace the snapshot for `key`.
    pub fn commit(&self, key: EntityKey, snapshot: ShipmentSnapshot) -> Arc<ShipmentSnapshot> {
        debug_assert_eq!(key, snapshot.key);
        let snapshot = Arc::new(snapshot);
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&snapshot));
        // No receivers is fine.
        let _ = self.updates.send(key);
        snapshot
    }

    /// Insert a pending placeholder for `key` unless a snapshot exists.
    /// Returns `true` if a placeholder was inserted.
    pub fn ensure_pending(&self, key: EntityKey) -> bool {
        let mut map = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, Arc::new(ShipmentSnapshot::pending(key)));
        true
    }

    /// All current snapshots, ordered by shipment id (pending ones last).
    pub fn snapshots(&self) -> Vec<Arc<ShipmentSnapshot>> {
        let mut all: Vec<_> = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| match (&a.shipment_id, &b.shipment_id) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.key.cmp(&b.key),
        });
        all
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive the key of every committed snapshot.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<EntityKey> {
        self.updates.subscribe()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
