//! Derived per-shipment state.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityKey;

/// Lowest in-range temperature, scaled ×100 (2.00 °C).
pub const SAFE_MIN_SCALED: i64 = 200;
/// Highest in-range temperature, scaled ×100 (8.00 °C).
pub const SAFE_MAX_SCALED: i64 = 800;

// ─── ShipmentStatus ───────────────────────────────────────────────────────────

/// Ledger-side shipment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    /// Placeholder while backfill is pending, or an unrecognised ledger value.
    Unknown,
    Created,
    InTransit,
    BreachDetected,
    Delivered,
}

impl ShipmentStatus {
    /// Map the ledger's enum index to a status.
    pub fn from_index(index: u64) -> Self {
        match index {
            0 => Self::Created,
            1 => Self::InTransit,
            2 => Self::BreachDetected,
            3 => Self::Delivered,
            _ => Self::Unknown,
        }
    }

    pub fn index(&self) -> Option<u64> {
        match self {
            Self::Created => Some(0),
            Self::InTransit => Some(1),
            Self::BreachDetected => Some(2),
            Self::Delivered => Some(3),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Created => write!(f, "CREATED"),
            Self::InTransit => write!(f, "IN_TRANSIT"),
            Self::BreachDetected => write!(f, "BREACH_DETECTED"),
            Self::Delivered => write!(f, "DELIVERED"),
        }
    }
}

/// Where a snapshot's status and breach counter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// Nothing reconciled yet.
    Pending,
    /// Point query against the ledger (authoritative).
    Ledger,
    /// Inferred from the observed event stream only.
    Inferred,
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// One temperature reading assembled from a `TemperatureRecorded` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Temperature ×100. Convert with [`celsius`](Self::celsius) only for display.
    pub temperature: i64,
    pub timestamp_ms: u64,
    pub block_number: u64,
    pub tx_hash: String,
}

impl TemperatureReading {
    pub fn celsius(&self) -> f64 {
        self.temperature as f64 / 100.0
    }

    /// Outside the 2–8 °C band, computed on the scaled integer.
    pub fn is_breach(&self) -> bool {
        self.temperature < SAFE_MIN_SCALED || self.temperature > SAFE_MAX_SCALED
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms as i64).single()
    }

    fn sort_key(&self) -> (u64, &str) {
        (self.timestamp_ms, &self.tx_hash)
    }
}

/// Audit-trail tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleKind {
    Created,
    CustodyProposed,
    CustodyPickedUp,
    CustodyDropped,
    Delivered,
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::CustodyProposed => write!(f, "CUSTODY_PROPOSED"),
            Self::CustodyPickedUp => write!(f, "CUSTODY_PICKED_UP"),
            Self::CustodyDropped => write!(f, "CUSTODY_DROPPED"),
            Self::Delivered => write!(f, "DELIVERED"),
        }
    }
}

/// One lifecycle audit-trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    /// Emitting block's timestamp in ms (0 if it could not be resolved).
    pub timestamp_ms: u64,
    pub block_number: u64,
    pub tx_hash: String,
}

impl LifecycleEvent {
    fn sort_key(&self) -> (u64, &str, LifecycleKind) {
        (self.timestamp_ms, &self.tx_hash, self.kind)
    }
}

// ─── ShipmentSnapshot ─────────────────────────────────────────────────────────

/// Immutable, whole-value view of one shipment.
///
/// Produced only by the reducer and replaced atomically in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentSnapshot {
    pub key: EntityKey,
    /// Human-readable id; `None` until an event carrying it has been seen.
    pub shipment_id: Option<String>,
    pub status: ShipmentStatus,
    pub status_source: StatusSource,
    pub breach_count: u64,
    /// Ascending by `(timestamp, tx_hash)`.
    pub readings: Vec<TemperatureReading>,
    /// Ascending by `(timestamp, tx_hash)`.
    pub lifecycle: Vec<LifecycleEvent>,
    /// Highest block that contributed an event.
    pub last_block: u64,
}

impl ShipmentSnapshot {
    /// Placeholder inserted while backfill for `key` is still pending.
    pub fn pending(key: EntityKey) -> Self {
        Self {
            key,
            shipment_id: None,
            status: ShipmentStatus::Unknown,
            status_source: StatusSource::Pending,
            breach_count: 0,
            readings: vec![],
            lifecycle: vec![],
            last_block: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status_source == StatusSource::Pending
    }

    /// Readings newest first, for display.
    pub fn readings_desc(&self) -> impl Iterator<Item = &TemperatureReading> {
        self.readings.iter().rev()
    }

    /// Readings classified as breaches from their own values.
    pub fn classified_breaches(&self) -> u64 {
        self.readings.iter().filter(|r| r.is_breach()).count() as u64
    }

    /// `Some((ledger, classified))` when the ledger's counter disagrees with
    /// client-side classification of the readings in view.
    pub fn breach_divergence(&self) -> Option<(u64, u64)> {
        let classified = self.classified_breaches();
        (self.status_source == StatusSource::Ledger && classified != self.breach_count)
            .then_some((self.breach_count, classified))
    }

    pub(crate) fn sort_rows(&mut self) {
        self.readings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.lifecycle.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temperature: i64) -> TemperatureReading {
        TemperatureReading {
            temperature,
            timestamp_ms: 0,
            block_number: 0,
            tx_hash: "0x0".into(),
        }
    }

    #[test]
    fn breach_band_edges_are_inclusive() {
        assert!(!reading(200).is_breach());
        assert!(!reading(800).is_breach());
        assert!(reading(199).is_breach());
        assert!(reading(801).is_breach());
        assert!(reading(-50).is_breach());
    }

    #[test]
    fn celsius_conversion() {
        assert_eq!(reading(452).celsius(), 4.52);
        assert_eq!(reading(-125).celsius(), -1.25);
    }

    #[test]
    fn status_index_mapping() {
        assert_eq!(ShipmentStatus::from_index(3), ShipmentStatus::Delivered);
        assert_eq!(ShipmentStatus::from_index(9), ShipmentStatus::Unknown);
        assert_eq!(ShipmentStatus::BreachDetected.to_string(), "BREACH_DETECTED");
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&ShipmentStatus::InTransit).unwrap();
        assert_eq!(json, "\"IN_TRANSIT\"");
    }

    #[test]
    fn pending_snapshot_has_no_divergence() {
        let snap = ShipmentSnapshot::pending(EntityKey::from_shipment_id("SH-1"));
        assert!(snap.is_pending());
        assert_eq!(snap.breach_divergence(), None);
    }
}
