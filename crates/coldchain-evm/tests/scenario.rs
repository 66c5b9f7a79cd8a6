//! End-to-end: backfill a shipment, then follow it live.

use std::sync::Arc;
use std::time::Duration;

use coldchain_core::snapshot::{LifecycleKind, ShipmentStatus, StatusSource};
use coldchain_core::testing::{logs, MockLedger};
use coldchain_core::{EngineState, EntityKey, IndexerConfig};
use coldchain_evm::{Engine, EngineBuilder};

const C: &str = "0xc0";

/// SH-1: Created(t=0), 4.52 °C (t=10), 9.01 °C (t=20), Delivered(t=30).
fn sh1_ledger() -> Arc<MockLedger> {
    let ledger = Arc::new(MockLedger::new());
    ledger.push(logs::created(C, "SH-1", 100, "0xa1"));
    ledger.push(logs::temperature(C, "SH-1", 452, 10, 101, "0xa2"));
    ledger.push(logs::temperature(C, "SH-1", 901, 20, 102, "0xa3"));
    ledger.push(logs::delivered(C, "SH-1", 103, "0xa4"));
    ledger.set_block_time(100, 0);
    ledger.set_block_time(103, 30);
    ledger.set_status("SH-1", ShipmentStatus::Delivered, 1);
    ledger
}

fn polling_engine(ledger: &Arc<MockLedger>) -> Engine {
    EngineBuilder::from_config(IndexerConfig::without_delays(logs::address(C)))
        .build_polling(ledger.clone())
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn delivered_shipment_scenario() {
    let ledger = sh1_ledger();
    let engine = polling_engine(&ledger);

    let report = engine.start().await.unwrap();
    assert_eq!(report.discovered, 1);
    assert_eq!(report.reconciled, 1);
    assert_eq!(engine.state(), EngineState::Live);

    let snap = engine.snapshot(&EntityKey::from_shipment_id("SH-1")).unwrap();
    assert_eq!(snap.shipment_id.as_deref(), Some("SH-1"));
    assert_eq!(snap.status, ShipmentStatus::Delivered);
    assert_eq!(snap.status_source, StatusSource::Ledger);
    assert_eq!(snap.breach_count, 1);

    let readings: Vec<_> = snap
        .readings
        .iter()
        .map(|r| (r.celsius(), r.is_breach(), r.timestamp_ms))
        .collect();
    assert_eq!(readings, vec![(4.52, false, 10_000), (9.01, true, 20_000)]);

    let trail: Vec<_> = snap.lifecycle.iter().map(|l| l.kind).collect();
    assert_eq!(trail, vec![LifecycleKind::Created, LifecycleKind::Delivered]);
    assert_eq!(snap.breach_divergence(), None);

    engine.shutdown().await;
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn live_events_refresh_the_snapshot() {
    let ledger = Arc::new(MockLedger::new());
    ledger.push(logs::created(C, "SH-2", 10, "0xb1"));
    ledger.set_block_time(10, 1_000);
    ledger.set_status("SH-2", ShipmentStatus::Created, 0);

    let engine = polling_engine(&ledger);
    engine.start().await.unwrap();
    let key = EntityKey::from_shipment_id("SH-2");
    assert!(engine.snapshot(&key).unwrap().readings.is_empty());

    // Let the poller record its starting head before new blocks appear.
    tokio::time::sleep(Duration::from_millis(30)).await;

    ledger.push(logs::picked_up(C, "SH-2", "0x0c", 11, "0xb2"));
    ledger.push(logs::temperature(C, "SH-2", 1_050, 1_100, 12, "0xb3"));
    ledger.set_block_time(11, 1_050);
    ledger.set_status("SH-2", ShipmentStatus::BreachDetected, 1);

    eventually(|| {
        engine
            .snapshot(&key)
            .is_some_and(|s| s.status == ShipmentStatus::BreachDetected && s.readings.len() == 1)
    })
    .await;

    let snap = engine.snapshot(&key).unwrap();
    assert_eq!(snap.breach_count, 1);
    assert!(snap
        .lifecycle
        .iter()
        .any(|l| l.kind == LifecycleKind::CustodyPickedUp && l.timestamp_ms == 1_050_000));

    engine.shutdown().await;
}

#[tokio::test]
async fn rate_limited_source_yields_same_snapshot() {
    let clean = sh1_ledger();
    let clean_engine = polling_engine(&clean);
    clean_engine.backfill().await.unwrap();

    let limited = sh1_ledger();
    limited.rate_limit_above(2);
    let limited_engine = polling_engine(&limited);
    limited_engine.backfill().await.unwrap();

    let key = EntityKey::from_shipment_id("SH-1");
    assert_eq!(
        clean_engine.snapshot(&key).unwrap(),
        limited_engine.snapshot(&key).unwrap()
    );
}

#[tokio::test]
async fn unreachable_point_query_leaves_placeholder() {
    let ledger = sh1_ledger();
    ledger.fail_status_queries(true);
    let engine = polling_engine(&ledger);

    let report = engine.start().await.unwrap();
    assert_eq!(report.failed, 1);

    let snap = engine.snapshot(&EntityKey::from_shipment_id("SH-1")).unwrap();
    assert!(snap.is_pending());
    assert_eq!(snap.status, ShipmentStatus::Unknown);
    engine.shutdown().await;
}
