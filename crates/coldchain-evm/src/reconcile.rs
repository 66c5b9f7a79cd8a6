//! Per-entity reconciliation: point query + log refresh + reduce + commit.
//!
//! A reconciliation never patches a snapshot from a pushed payload. It asks
//! the ledger for the authoritative status, re-reads the entity's readings and
//! lifecycle events over the configured lookback windows, folds them into the
//! prior snapshot and commits the result whole. Any failure leaves the prior
//! snapshot untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use coldchain_core::config::{IndexerConfig, MalformedPolicy};
use coldchain_core::decoder::EventDecoder;
use coldchain_core::error::IndexerError;
use coldchain_core::event::{DomainEvent, EventKind};
use coldchain_core::reducer::LifecycleReducer;
use coldchain_core::snapshot::ShipmentSnapshot;
use coldchain_core::source::Ledger;
use coldchain_core::store::EntityStore;
use coldchain_core::types::{EntityKey, LogFilter, RawLogRecord};

use crate::fetcher::{FetchConfig, RangeFetcher};

/// Re-derives one entity's snapshot from authoritative sources.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    /// Returns the committed snapshot, or `None` if the ledger does not know
    /// the entity.
    async fn reconcile(&self, key: EntityKey) -> Result<Option<Arc<ShipmentSnapshot>>, IndexerError>;
}

/// The production [`Reconcile`] implementation.
pub struct Reconciler<L: ?Sized> {
    ledger: Arc<L>,
    fetcher: RangeFetcher<L>,
    store: Arc<EntityStore>,
    decoder: EventDecoder,
    reducer: LifecycleReducer,
    contract: String,
    readings_lookback: u64,
    lifecycle_lookback: u64,
    policy: MalformedPolicy,
}

impl<L: Ledger + ?Sized> Reconciler<L> {
    pub fn new(ledger: Arc<L>, store: Arc<EntityStore>, config: &IndexerConfig) -> Self {
        Self {
            fetcher: RangeFetcher::new(Arc::clone(&ledger), FetchConfig::from(config)),
            ledger,
            store,
            decoder: EventDecoder::new(),
            reducer: LifecycleReducer::new(),
            contract: config.contract_address.to_ascii_lowercase(),
            readings_lookback: config.readings_lookback,
            lifecycle_lookback: config.lifecycle_lookback,
            policy: config.malformed_policy,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &RangeFetcher<L> {
        &self.fetcher
    }

    /// Raw records for `key` over the readings and lifecycle windows.
    async fn collect(&self, key: &EntityKey, head: u64) -> Result<Vec<RawLogRecord>, IndexerError> {
        let key_topic = key.to_topic();

        let readings = LogFilter::new(&self.contract)
            .topic(EventKind::TemperatureRecorded.topic0())
            .topic(&key_topic);
        let mut records = self
            .fetcher
            .fetch(&readings, head.saturating_sub(self.readings_lookback), head)
            .await?;

        let lifecycle_from = head.saturating_sub(self.lifecycle_lookback);
        for kind in EventKind::LIFECYCLE {
            let filter = LogFilter::new(&self.contract).topic(kind.topic0());
            // Proposals are keyed by payload only: fetch all, filter after decoding.
            let filter = if kind.key_is_indexed() {
                filter.topic(&key_topic)
            } else {
                filter
            };
            records.extend(self.fetcher.fetch(&filter, lifecycle_from, head).await?);
        }
        Ok(records)
    }

    /// Attach block timestamps to lifecycle events that lack one.
    async fn fill_block_times(&self, events: &mut [DomainEvent]) -> Result<(), IndexerError> {
        let mut cache: HashMap<u64, Option<u64>> = HashMap::new();
        for event in events.iter_mut() {
            if event.block_timestamp_ms.is_some() || event.kind.lifecycle_kind().is_none() {
                continue;
            }
            let ts = match cache.get(&event.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self
                        .ledger
                        .block(event.block_number)
                        .await?
                        .map(|b| b.timestamp.saturating_mul(1000));
                    if ts.is_none() {
                        tracing::warn!(block = event.block_number, "block not found for lifecycle timestamp");
                    }
                    cache.insert(event.block_number, ts);
                    ts
                }
            };
            event.block_timestamp_ms = ts;
        }
        Ok(())
    }

    async fn run(&self, key: EntityKey) -> Result<Option<Arc<ShipmentSnapshot>>, IndexerError> {
        let status = self.ledger.entity_status(&key).await?;
        if !status.exists {
            tracing::debug!(key = %key.short(), "entity not found on ledger");
            return Ok(None);
        }

        let head = self.fetcher.head().await?;
        let records = self.collect(&key, head).await?;

        let mut events = self.decoder.decode_all(&records, self.policy)?;
        events.retain(|e| e.key == key);
        self.fill_block_times(&mut events).await?;

        let prior = self.store.get(&key);
        let snapshot = self
            .reducer
            .reduce(prior.as_deref(), key, &events, Some(&status));

        tracing::debug!(
            key = %key.short(),
            head,
            events = events.len(),
            status = %snapshot.status,
            breaches = snapshot.breach_count,
            "reconciled"
        );
        Ok(Some(self.store.commit(key, snapshot)))
    }
}

#[async_trait]
impl<L: Ledger + ?Sized + 'static> Reconcile for Reconciler<L> {
    async fn reconcile(&self, key: EntityKey) -> Result<Option<Arc<ShipmentSnapshot>>, IndexerError> {
        self.run(key).await.map_err(|e| {
            tracing::warn!(key = %key.short(), error = %e, "reconciliation failed; keeping prior snapshot");
            e
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use coldchain_core::snapshot::{LifecycleKind, ShipmentStatus, StatusSource};
    use coldchain_core::testing::{logs, MockLedger};

    const C: &str = "0xc0";

    fn setup() -> (Arc<MockLedger>, Reconciler<MockLedger>) {
        let ledger = Arc::new(MockLedger::new());
        let store = Arc::new(EntityStore::new());
        let config = IndexerConfig::without_delays(logs::address(C));
        let rec = Reconciler::new(Arc::clone(&ledger), store, &config);
        (ledger, rec)
    }

    fn seed_sh1(ledger: &MockLedger) {
        ledger.push(logs::created(C, "SH-1", 1, "0x01"));
        ledger.push(logs::temperature(C, "SH-1", 452, 10, 2, "0x02"));
        ledger.push(logs::temperature(C, "SH-1", 901, 20, 3, "0x03"));
        ledger.push(logs::delivered(C, "SH-1", 4, "0x04"));
        ledger.set_block_time(1, 0);
        ledger.set_block_time(4, 30);
        ledger.set_status("SH-1", ShipmentStatus::Delivered, 1);
    }

    #[tokio::test]
    async fn reconciles_delivered_shipment() {
        let (ledger, rec) = setup();
        seed_sh1(&ledger);
        let key = EntityKey::from_shipment_id("SH-1");

        let snap = rec.reconcile(key).await.unwrap().unwrap();
        assert_eq!(snap.status, ShipmentStatus::Delivered);
        assert_eq!(snap.status_source, StatusSource::Ledger);
        assert_eq!(snap.breach_count, 1);

        let temps: Vec<_> = snap.readings.iter().map(|r| (r.temperature, r.is_breach())).collect();
        assert_eq!(temps, vec![(452, false), (901, true)]);

        let trail: Vec<_> = snap.lifecycle.iter().map(|l| (l.kind, l.timestamp_ms)).collect();
        assert_eq!(
            trail,
            vec![(LifecycleKind::Created, 0), (LifecycleKind::Delivered, 30_000)]
        );
        assert_eq!(rec.store().get(&key).unwrap(), snap);
    }

    #[tokio::test]
    async fn unknown_entity_is_absent_not_error() {
        let (_ledger, rec) = setup();
        let key = EntityKey::from_shipment_id("GHOST");
        assert!(rec.reconcile(key).await.unwrap().is_none());
        assert!(rec.store().get(&key).is_none());
    }

    #[tokio::test]
    async fn failure_keeps_prior_snapshot() {
        let (ledger, rec) = setup();
        seed_sh1(&ledger);
        let key = EntityKey::from_shipment_id("SH-1");
        let before = rec.reconcile(key).await.unwrap().unwrap();

        ledger.push(logs::temperature(C, "SH-1", 100, 40, 5, "0x05"));
        ledger.fail_at_block(Some(5));
        assert!(rec.reconcile(key).await.is_err());
        assert_eq!(rec.store().get(&key).unwrap(), before);

        ledger.fail_status_queries(true);
        assert!(rec.reconcile(key).await.is_err());
        assert_eq!(rec.store().get(&key).unwrap(), before);
    }

    #[tokio::test]
    async fn proposals_for_other_shipments_are_ignored() {
        let (ledger, rec) = setup();
        seed_sh1(&ledger);
        ledger.push(logs::custody_proposed(C, "SH-2", "0x0a", "0x0b", 2, "0x20"));
        ledger.push(logs::custody_proposed(C, "SH-1", "0x0a", "0x0b", 2, "0x21"));
        ledger.set_block_time(2, 5);

        let snap = rec
            .reconcile(EntityKey::from_shipment_id("SH-1"))
            .await
            .unwrap()
            .unwrap();
        let proposals: Vec<_> = snap
            .lifecycle
            .iter()
            .filter(|l| l.kind == LifecycleKind::CustodyProposed)
            .map(|l| l.tx_hash.as_str())
            .collect();
        assert_eq!(proposals, vec!["0x21"]);
    }

    #[tokio::test]
    async fn block_timestamps_cached_per_reconciliation() {
        let (ledger, rec) = setup();
        seed_sh1(&ledger);
        ledger.push(logs::picked_up(C, "SH-1", "0x0c", 4, "0x05"));
        rec.reconcile(EntityKey::from_shipment_id("SH-1")).await.unwrap();
        // Blocks 1 and 4; block 4 carries two lifecycle events.
        assert_eq!(ledger.block_calls(), 2);
    }

    #[tokio::test]
    async fn events_outside_lookback_are_invisible() {
        let ledger = Arc::new(MockLedger::new());
        let mut config = IndexerConfig::without_delays(logs::address(C));
        config.readings_lookback = 10;
        let rec = Reconciler::new(Arc::clone(&ledger), Arc::new(EntityStore::new()), &config);

        ledger.push(logs::temperature(C, "SH-1", 500, 1, 5, "0x01"));
        ledger.push(logs::temperature(C, "SH-1", 510, 2, 50, "0x02"));
        ledger.set_status("SH-1", ShipmentStatus::InTransit, 0);

        let snap = rec
            .reconcile(EntityKey::from_shipment_id("SH-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.readings.len(), 1);
        assert_eq!(snap.readings[0].block_number, 50);
    }
}
