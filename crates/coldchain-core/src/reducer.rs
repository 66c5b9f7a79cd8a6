//! Folds decoded events for one shipment into a [`ShipmentSnapshot`].
//!
//! Reduction is a set merge followed by a sort: events already present
//! (same tx hash + kind) are ignored, so repeated or reordered delivery
//! converges to the same snapshot.
//!
//! Status and breach counter come from the ledger's point query when one is
//! supplied; the log stream only supplies readings and the audit trail,
//! because a bounded lookback cannot guarantee every historical event was seen.

use std::collections::HashSet;

use crate::event::{DomainEvent, EventPayload};
use crate::snapshot::{
    LifecycleEvent, LifecycleKind, ShipmentSnapshot, ShipmentStatus, StatusSource,
    TemperatureReading,
};
use crate::source::LedgerStatus;
use crate::types::EntityKey;

/// The lifecycle reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleReducer;

impl LifecycleReducer {
    pub fn new() -> Self {
        Self
    }

    /// Merge `events` into `prior` (or a fresh snapshot) for `key`.
    ///
    /// # Panics
    /// If any event belongs to a different entity key.
    pub fn reduce(
        &self,
        prior: Option<&ShipmentSnapshot>,
        key: EntityKey,
        events: &[DomainEvent],
        ledger: Option<&LedgerStatus>,
    ) -> ShipmentSnapshot {
        let mut next = match prior {
            Some(p) => {
                assert_eq!(p.key, key, "prior snapshot belongs to another entity");
                p.clone()
            }
            None => ShipmentSnapshot::pending(key),
        };

        let mut seen_readings: HashSet<String> =
            next.readings.iter().map(|r| r.tx_hash.clone()).collect();
        let mut seen_lifecycle: HashSet<(String, LifecycleKind)> = next
            .lifecycle
            .iter()
            .map(|l| (l.tx_hash.clone(), l.kind))
            .collect();

        for event in events {
            assert_eq!(
                event.key, key,
                "event {} in tx {} routed to the wrong entity",
                event.kind, event.tx_hash
            );

            if next.shipment_id.is_none() {
                next.shipment_id = Some(event.shipment_id.clone());
            }
            next.last_block = next.last_block.max(event.block_number);

            match &event.payload {
                EventPayload::Temperature {
                    scaled,
                    timestamp_ms,
                } => {
                    if seen_readings.insert(event.tx_hash.clone()) {
                        next.readings.push(TemperatureReading {
                            temperature: *scaled,
                            timestamp_ms: *timestamp_ms,
                            block_number: event.block_number,
                            tx_hash: event.tx_hash.clone(),
                        });
                    }
                }
                _ => {
                    let Some(kind) = event.kind.lifecycle_kind() else {
                        continue;
                    };
                    if seen_lifecycle.insert((event.tx_hash.clone(), kind)) {
                        next.lifecycle.push(LifecycleEvent {
                            kind,
                            timestamp_ms: event.block_timestamp_ms.unwrap_or_default(),
                            block_number: event.block_number,
                            tx_hash: event.tx_hash.clone(),
                        });
                    } else if let Some(ts) = event.block_timestamp_ms {
                        // A row stored before its block time was known takes it now.
                        if let Some(row) = next.lifecycle.iter_mut().find(|l| {
                            l.kind == kind && l.tx_hash == event.tx_hash && l.timestamp_ms == 0
                        }) {
                            row.timestamp_ms = ts;
                        }
                    }
                }
            }
        }

        next.sort_rows();

        match ledger {
            Some(status) if status.exists => {
                next.status = status.status;
                next.breach_count = status.breach_count;
                next.status_source = StatusSource::Ledger;
            }
            _ if next.status_source == StatusSource::Ledger => {
                // Keep the last authoritative values until the next point query.
            }
            _ => {
                if !next.readings.is_empty() || !next.lifecycle.is_empty() {
                    next.status = infer_status(&next);
                    next.breach_count = next.classified_breaches();
                    next.status_source = StatusSource::Inferred;
                }
            }
        }

        if let Some((ledger_count, classified)) = next.breach_divergence() {
            tracing::warn!(
                key = %key.short(),
                ledger = ledger_count,
                classified,
                "breach counter diverges from classified readings; keeping ledger value"
            );
        }

        next
    }
}

fn infer_status(snapshot: &ShipmentSnapshot) -> ShipmentStatus {
    let has = |kind: LifecycleKind| snapshot.lifecycle.iter().any(|l| l.kind == kind);
    if has(LifecycleKind::Delivered) {
        ShipmentStatus::Delivered
    } else if snapshot.readings.iter().any(|r| r.is_breach()) {
        ShipmentStatus::BreachDetected
    } else if has(LifecycleKind::CustodyProposed)
        || has(LifecycleKind::CustodyPickedUp)
        || has(LifecycleKind::CustodyDropped)
    {
        ShipmentStatus::InTransit
    } else if has(LifecycleKind::Created) {
        ShipmentStatus::Created
    } else {
        ShipmentStatus::Unknown
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
