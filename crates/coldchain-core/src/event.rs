//! Typed ledger events.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::abi::event_topic;
use crate::snapshot::LifecycleKind;
use crate::types::EntityKey;

// ─── EventKind ────────────────────────────────────────────────────────────────

/// The six event kinds the ledger emits for a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    TemperatureRecorded,
    CustodyProposed,
    CustodyConfirmedPickup,
    CustodyConfirmedDrop,
    Delivered,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::Created,
        Self::TemperatureRecorded,
        Self::CustodyProposed,
        Self::CustodyConfirmedPickup,
        Self::CustodyConfirmedDrop,
        Self::Delivered,
    ];

    /// Kinds that contribute to the lifecycle audit trail.
    pub const LIFECYCLE: [EventKind; 5] = [
        Self::Created,
        Self::CustodyProposed,
        Self::CustodyConfirmedPickup,
        Self::CustodyConfirmedDrop,
        Self::Delivered,
    ];

    /// Canonical Solidity event signature.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Created => "ShipmentCreated(bytes32,string,address)",
            Self::TemperatureRecorded => "TemperatureRecorded(bytes32,string,int256,uint256)",
            Self::CustodyProposed => "CustodyProposed(address,address,string)",
            Self::CustodyConfirmedPickup => "CustodyPickedUp(bytes32,string,address)",
            Self::CustodyConfirmedDrop => "CustodyDropped(bytes32,string,address)",
            Self::Delivered => "Delivered(bytes32,string,address)",
        }
    }

    /// topic0 for this kind.
    pub fn topic0(&self) -> &'static str {
        static TOPICS: OnceLock<Vec<String>> = OnceLock::new();
        let topics = TOPICS.get_or_init(|| {
            Self::ALL
                .iter()
                .map(|k| event_topic(k.signature()))
                .collect()
        });
        &topics[*self as usize]
    }

    /// Resolve a topic0 back to its kind.
    pub fn from_topic0(topic: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.topic0().eq_ignore_ascii_case(topic))
    }

    /// Whether the entity key is `topics[1]`. When `false` it must be derived
    /// from the shipment id in the payload.
    pub fn key_is_indexed(&self) -> bool {
        !matches!(self, Self::CustodyProposed)
    }

    /// The audit-trail tag for this kind, if it is a lifecycle kind.
    pub fn lifecycle_kind(&self) -> Option<LifecycleKind> {
        match self {
            Self::Created => Some(LifecycleKind::Created),
            Self::TemperatureRecorded => None,
            Self::CustodyProposed => Some(LifecycleKind::CustodyProposed),
            Self::CustodyConfirmedPickup => Some(LifecycleKind::CustodyPickedUp),
            Self::CustodyConfirmedDrop => Some(LifecycleKind::CustodyDropped),
            Self::Delivered => Some(LifecycleKind::Delivered),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "ShipmentCreated",
            Self::TemperatureRecorded => "TemperatureRecorded",
            Self::CustodyProposed => "CustodyProposed",
            Self::CustodyConfirmedPickup => "CustodyPickedUp",
            Self::CustodyConfirmedDrop => "CustodyDropped",
            Self::Delivered => "Delivered",
        };
        f.write_str(name)
    }
}

// ─── DomainEvent ──────────────────────────────────────────────────────────────

/// Kind-specific payload of a decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Created { pharmacy: String },
    /// Temperature scaled ×100 (452 = 4.52 °C); timestamp in ms since epoch.
    Temperature { scaled: i64, timestamp_ms: u64 },
    CustodyProposed { from: String, to: String },
    CustodyPickedUp { carrier: String },
    CustodyDropped { carrier: String },
    Delivered { pharmacy: String },
}

/// A decoded ledger event with provenance.
///
/// Two events with the same `(tx_hash, key, kind)` are the same logical event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub key: EntityKey,
    pub shipment_id: String,
    pub payload: EventPayload,
    pub block_number: u64,
    /// Lowercase `0x…` transaction hash.
    pub tx_hash: String,
    pub log_index: u32,
    /// Emitting block's timestamp in ms, when known.
    pub block_timestamp_ms: Option<u64>,
}

impl DomainEvent {
    /// Logical identity used for deduplication.
    pub fn identity(&self) -> (&str, EntityKey, EventKind) {
        (&self.tx_hash, self.key, self.kind)
    }

    /// Best-known timestamp: the payload timestamp for readings, the block
    /// timestamp otherwise.
    pub fn timestamp_ms(&self) -> Option<u64> {
        match &self.payload {
            EventPayload::Temperature { timestamp_ms, .. } => Some(*timestamp_ms),
            _ => self.block_timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_distinct_and_resolvable() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_topic0(kind.topic0()), Some(kind));
            assert_eq!(kind.topic0().len(), 66);
        }
        assert_eq!(EventKind::from_topic0("0xdead"), None);
    }

    #[test]
    fn topic_lookup_is_case_insensitive() {
        let upper = EventKind::Delivered.topic0().to_uppercase().replacen("0X", "0x", 1);
        assert_eq!(EventKind::from_topic0(&upper), Some(EventKind::Delivered));
    }

    #[test]
    fn only_proposal_has_payload_key() {
        let unindexed: Vec<_> = EventKind::ALL
            .into_iter()
            .filter(|k| !k.key_is_indexed())
            .collect();
        assert_eq!(unindexed, vec![EventKind::CustodyProposed]);
    }

    #[test]
    fn temperature_is_not_lifecycle() {
        assert!(EventKind::TemperatureRecorded.lifecycle_kind().is_none());
        assert_eq!(
            EventKind::Delivered.lifecycle_kind(),
            Some(LifecycleKind::Delivered)
        );
    }
}
