//! Historical backfill.
//!
//! Discovers shipments from `ShipmentCreated` logs inside the discovery
//! window, registers a pending placeholder for each, then reconciles them one
//! at a time through the subscription bridge. A shipment is therefore never
//! reconciled by backfill and a live notification at once, and both draw
//! from the same fetch permits.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use coldchain_core::abi;
use coldchain_core::config::IndexerConfig;
use coldchain_core::error::IndexerError;
use coldchain_core::event::EventKind;
use coldchain_core::source::LogSource;
use coldchain_core::store::EntityStore;
use coldchain_core::types::{EntityKey, LogFilter};

use crate::bridge::SubscriptionBridge;
use crate::fetcher::{FetchConfig, RangeFetcher};
use crate::reconcile::Reconcile;

/// Outcome of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub head: u64,
    pub discovered: usize,
    pub reconciled: usize,
    /// Discovered but unknown to the point query.
    pub not_found: usize,
    pub failed: usize,
}

/// Sequential backfill driver.
pub struct Backfill<S: ?Sized, R: ?Sized> {
    fetcher: RangeFetcher<S>,
    bridge: SubscriptionBridge<R>,
    store: Arc<EntityStore>,
    contract: String,
    lookback: u64,
}

impl<S: LogSource + ?Sized, R: Reconcile + ?Sized> Backfill<S, R> {
    pub fn new(
        source: Arc<S>,
        bridge: SubscriptionBridge<R>,
        store: Arc<EntityStore>,
        config: &IndexerConfig,
    ) -> Self {
        Self {
            fetcher: RangeFetcher::new(source, FetchConfig::from(config)),
            bridge,
            store,
            contract: config.contract_address.to_ascii_lowercase(),
            lookback: config.discovery_lookback,
        }
    }

    /// Keys of shipments created inside the discovery window, in emission order.
    pub async fn discover(&self) -> Result<(u64, Vec<EntityKey>), IndexerError> {
        let head = self.fetcher.head().await?;
        let filter = LogFilter::new(&self.contract).topic(EventKind::Created.topic0());
        let records = self
            .fetcher
            .fetch(&filter, head.saturating_sub(self.lookback), head)
            .await?;

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for record in &records {
            let Some(key) = record
                .topics
                .get(1)
                .and_then(|t| abi::topic_bytes(t))
                .map(EntityKey::from_bytes)
            else {
                tracing::warn!(tx = %record.tx_hash, "creation log without key topic");
                continue;
            };
            if seen.insert(key) {
                keys.push(key);
            }
        }
        Ok((head, keys))
    }

    /// Discover, pre-populate placeholders, and reconcile every shipment in turn.
    ///
    /// Only discovery errors are returned; per-shipment failures are counted
    /// and leave the placeholder (or prior snapshot) in place.
    pub async fn run(&self) -> Result<BackfillReport, IndexerError> {
        let (head, keys) = self.discover().await?;
        for key in &keys {
            self.store.ensure_pending(*key);
        }
        tracing::info!(head, shipments = keys.len(), lookback = self.lookback, "starting backfill");

        let mut report = BackfillReport {
            head,
            discovered: keys.len(),
            ..BackfillReport::default()
        };
        for (i, key) in keys.iter().enumerate() {
            match self.bridge.reconcile_now(*key).await {
                Ok(Some(_)) => report.reconciled += 1,
                Ok(None) => report.not_found += 1,
                Err(_) => report.failed += 1,
            }
            tracing::debug!(done = i + 1, total = keys.len(), key = %key.short(), "backfill progress");
        }

        tracing::info!(
            reconciled = report.reconciled,
            not_found = report.not_found,
            failed = report.failed,
            "backfill complete"
        );
        Ok(report)
    }
}
