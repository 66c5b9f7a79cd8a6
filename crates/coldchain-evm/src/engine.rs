//! The reconciliation engine: backfill, then live.
//!
//! # Start
//! Subscribe to all six event kinds and attach each subscription to the
//! bridge, start the log poller if there is one, then run the sequential
//! backfill. Backfill reconciles through the bridge, so a notification for
//! a shipment that backfill is working on runs once, after it.
//!
//! # Shutdown
//! Release every subscription, stop the poller and wait for in-flight
//! reconciliations. Calling it again is a no-op.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use coldchain_core::config::{EngineState, IndexerConfig};
use coldchain_core::error::IndexerError;
use coldchain_core::event::EventKind;
use coldchain_core::snapshot::ShipmentSnapshot;
use coldchain_core::source::{Ledger, PushChannel};
use coldchain_core::store::EntityStore;
use coldchain_core::types::EntityKey;

use crate::backfill::{Backfill, BackfillReport};
use crate::bridge::{BridgeStats, SubscriptionBridge};
use crate::poller::LogPoller;
use crate::reconcile::Reconciler;

type DynReconciler = Reconciler<dyn Ledger>;

/// A running projection of one ledger contract.
pub struct Engine {
    config: IndexerConfig,
    store: Arc<EntityStore>,
    push: Arc<dyn PushChannel>,
    poller: Option<Arc<LogPoller<dyn Ledger>>>,
    bridge: SubscriptionBridge<DynReconciler>,
    backfill: Backfill<dyn Ledger, DynReconciler>,
    state: Mutex<EngineState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Engine fed by an external push channel.
    pub fn new(
        config: IndexerConfig,
        ledger: Arc<dyn Ledger>,
        push: Arc<dyn PushChannel>,
    ) -> Result<Self, IndexerError> {
        Self::assemble(config, ledger, push, None)
    }

    /// Engine whose push channel is a [`LogPoller`] over the same ledger.
    pub fn polling(config: IndexerConfig, ledger: Arc<dyn Ledger>) -> Result<Self, IndexerError> {
        let poller = Arc::new(LogPoller::new(Arc::clone(&ledger), &config));
        let push: Arc<dyn PushChannel> = poller.clone();
        Self::assemble(config, ledger, push, Some(poller))
    }

    fn assemble(
        config: IndexerConfig,
        ledger: Arc<dyn Ledger>,
        push: Arc<dyn PushChannel>,
        poller: Option<Arc<LogPoller<dyn Ledger>>>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let store = Arc::new(EntityStore::new());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_fetches));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&ledger),
            Arc::clone(&store),
            &config,
        ));
        let bridge = SubscriptionBridge::new(reconciler, permits);
        let backfill = Backfill::new(ledger, bridge.clone(), Arc::clone(&store), &config);
        Ok(Self {
            config,
            store,
            push,
            poller,
            bridge,
            backfill,
            state: Mutex::new(EngineState::Idle),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn state_guard(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state_guard();
        tracing::debug!(from = %*state, to = %next, "engine state");
        *state = next;
    }

    pub fn state(&self) -> EngineState {
        *self.state_guard()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn snapshot(&self, key: &EntityKey) -> Option<Arc<ShipmentSnapshot>> {
        self.store.get(key)
    }

    pub fn snapshots(&self) -> Vec<Arc<ShipmentSnapshot>> {
        self.store.snapshots()
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    /// Queue a reconciliation of `key`, as if a notification had arrived.
    pub fn refresh(&self, key: EntityKey) {
        self.bridge.schedule(key);
    }

    /// Wait until the bridge has no reconciliation running.
    pub async fn settle(&self) {
        self.bridge.wait_idle().await;
    }

    /// Run one backfill pass without subscribing.
    pub async fn backfill(&self) -> Result<BackfillReport, IndexerError> {
        self.backfill.run().await
    }

    /// Subscribe, start polling, backfill, and go live.
    ///
    /// Fails only if the engine was already started or a subscription could
    /// not be acquired; a failed backfill is logged and the engine still goes
    /// live with an empty report.
    pub async fn start(&self) -> Result<BackfillReport, IndexerError> {
        {
            let mut state = self.state_guard();
            if *state != EngineState::Idle {
                return Err(IndexerError::Other(format!(
                    "cannot start engine in state {}",
                    *state
                )));
            }
            *state = EngineState::Backfilling;
        }

        let mut subs = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            match self.push.subscribe(kind, None).await {
                Ok(sub) => subs.push(sub),
                Err(e) => {
                    // Already-acquired subscriptions are released on drop.
                    drop(subs);
                    self.set_state(EngineState::Idle);
                    return Err(IndexerError::Subscription(format!("{kind}: {e}")));
                }
            }
        }

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.extend(subs.into_iter().map(|sub| self.bridge.attach(sub)));
            if let Some(poller) = &self.poller {
                tasks.push(Arc::clone(poller).spawn());
            }
        }
        tracing::info!(kinds = EventKind::ALL.len(), polling = self.poller.is_some(), "subscribed");

        let report = match self.backfill.run().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "backfill failed; continuing live");
                BackfillReport::default()
            }
        };

        {
            let mut state = self.state_guard();
            if *state == EngineState::Backfilling {
                *state = EngineState::Live;
            }
        }
        tracing::info!(shipments = self.store.len(), "engine live");
        Ok(report)
    }

    /// Release subscriptions, stop background tasks and drain reconciliations.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state_guard();
            if matches!(*state, EngineState::Stopping | EngineState::Stopped) {
                return;
            }
            *state = EngineState::Stopping;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Aborted tasks resolve with a cancellation error; that is expected.
            let _ = task.await;
        }

        self.bridge.wait_idle().await;
        self.set_state(EngineState::Stopped);
        tracing::info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldchain_core::push::{Notification, PushHub};
    use coldchain_core::snapshot::ShipmentStatus;
    use coldchain_core::testing::{logs, MockLedger};

    const C: &str = "0xc0";

    fn engine(ledger: &Arc<MockLedger>, hub: &PushHub) -> Engine {
        let config = IndexerConfig::without_delays(logs::address(C));
        Engine::new(config, ledger.clone(), Arc::new(hub.clone())).unwrap()
    }

    #[tokio::test]
    async fn start_backfills_and_goes_live() {
        let ledger = Arc::new(MockLedger::new());
        ledger.push(logs::created(C, "SH-1", 1, "0x01"));
        ledger.set_status("SH-1", ShipmentStatus::Created, 0);
        let hub = PushHub::new();
        let engine = engine(&ledger, &hub);

        let report = engine.start().await.unwrap();
        assert_eq!(report.reconciled, 1);
        assert_eq!(engine.state(), EngineState::Live);
        assert_eq!(hub.len(), EventKind::ALL.len());
        assert_eq!(
            engine
                .snapshot(&EntityKey::from_shipment_id("SH-1"))
                .unwrap()
                .status,
            ShipmentStatus::Created
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn notification_triggers_reconciliation() {
        let ledger = Arc::new(MockLedger::new());
        let hub = PushHub::new();
        let engine = engine(&ledger, &hub);
        engine.start().await.unwrap();

        ledger.push(logs::created(C, "SH-7", 3, "0x07"));
        ledger.set_status("SH-7", ShipmentStatus::Created, 0);
        let key = EntityKey::from_shipment_id("SH-7");
        hub.publish(Notification {
            key,
            kind: EventKind::Created,
            block_number: 3,
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        engine.settle().await;

        assert_eq!(engine.snapshot(&key).unwrap().shipment_id.as_deref(), Some("SH-7"));
        assert_eq!(engine.bridge_stats().notifications, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn notification_during_backfill_waits_for_it() {
        let ledger = Arc::new(MockLedger::new());
        ledger.push(logs::created(C, "SH-1", 1, "0x01"));
        ledger.set_status("SH-1", ShipmentStatus::Created, 0);
        ledger.set_latency(std::time::Duration::from_millis(50));
        let hub = PushHub::new();
        let engine = engine(&ledger, &hub);

        let key = EntityKey::from_shipment_id("SH-1");
        let live = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            ledger.set_status("SH-1", ShipmentStatus::InTransit, 0);
            hub.publish(Notification {
                key,
                kind: EventKind::CustodyConfirmedPickup,
                block_number: 2,
            });
        };
        let (report, ()) = tokio::join!(engine.start(), live);
        assert_eq!(report.unwrap().reconciled, 1);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        engine.settle().await;

        assert_eq!(ledger.max_status_overlap(), 1);
        assert_eq!(ledger.status_calls(), 2);
        assert_eq!(engine.snapshot(&key).unwrap().status, ShipmentStatus::InTransit);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_reconciles_on_demand() {
        let ledger = Arc::new(MockLedger::new());
        let hub = PushHub::new();
        let engine = engine(&ledger, &hub);

        ledger.push(logs::created(C, "SH-3", 2, "0x03"));
        ledger.set_status("SH-3", ShipmentStatus::InTransit, 0);
        let key = EntityKey::from_shipment_id("SH-3");
        engine.refresh(key);
        engine.settle().await;
        assert_eq!(engine.snapshot(&key).unwrap().status, ShipmentStatus::InTransit);
    }

    #[tokio::test]
    async fn shutdown_releases_everything_once() {
        let ledger = Arc::new(MockLedger::new());
        let hub = PushHub::new();
        let engine = engine(&ledger, &hub);
        engine.start().await.unwrap();

        engine.shutdown().await;
        assert!(hub.is_empty());
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let ledger = Arc::new(MockLedger::new());
        let hub = PushHub::new();
        let engine = engine(&ledger, &hub);
        engine.start().await.unwrap();
        assert!(engine.start().await.is_err());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let ledger: Arc<dyn Ledger> = Arc::new(MockLedger::new());
        let config = IndexerConfig::without_delays("not-an-address");
        assert!(matches!(
            Engine::polling(config, ledger),
            Err(IndexerError::Config(_))
        ));
    }
}
