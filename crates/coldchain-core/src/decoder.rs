//! Raw log record → [`DomainEvent`].
//!
//! Payload layouts (head words, after the indexed topics):
//!
//! | kind                 | topics                 | data                              |
//! |----------------------|------------------------|-----------------------------------|
//! | ShipmentCreated      | sig, key               | string id, address pharmacy       |
//! | TemperatureRecorded  | sig, key               | string id, int256 temp, uint256 ts|
//! | CustodyProposed      | sig, from, to          | string id                         |
//! | CustodyPickedUp      | sig, key               | string id, address carrier        |
//! | CustodyDropped       | sig, key               | string id, address carrier        |
//! | Delivered            | sig, key               | string id, address pharmacy       |

use crate::abi::{self, AbiError};
use crate::config::MalformedPolicy;
use crate::error::IndexerError;
use crate::event::{DomainEvent, EventKind, EventPayload};
use crate::types::{EntityKey, RawLogRecord};

/// Stateless decoder for the ledger's event schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a single record.
    ///
    /// Fails with [`IndexerError::MalformedEvent`] when the topic is unknown,
    /// the payload does not match the kind's layout, or an indexed key does not
    /// match the shipment id carried in the payload.
    pub fn decode(&self, record: &RawLogRecord) -> Result<DomainEvent, IndexerError> {
        let tx_hash = record.tx_hash.to_ascii_lowercase();
        let malformed = |reason: &dyn ToString| IndexerError::malformed(tx_hash.clone(), reason.to_string());
        let abi_err = |e: AbiError| IndexerError::malformed(tx_hash.clone(), e);

        let topic0 = record
            .topics
            .first()
            .ok_or_else(|| malformed(&"record has no topics"))?;
        let kind = EventKind::from_topic0(topic0)
            .ok_or_else(|| malformed(&format!("unknown event topic {topic0}")))?;

        let data = &record.data;
        let shipment_id = abi::read_string(data, 0).map_err(abi_err)?;
        let derived = EntityKey::from_shipment_id(&shipment_id);

        let key = if kind.key_is_indexed() {
            let topic = record
                .topics
                .get(1)
                .ok_or_else(|| malformed(&format!("{kind} is missing its key topic")))?;
            let key = abi::topic_bytes(topic)
                .map(EntityKey::from_bytes)
                .ok_or_else(|| malformed(&format!("bad key topic {topic}")))?;
            if key != derived {
                return Err(malformed(&format!(
                    "key topic {key} does not match shipment id '{shipment_id}'"
                )));
            }
            key
        } else {
            derived
        };

        let payload = match kind {
            EventKind::Created => EventPayload::Created {
                pharmacy: abi::read_address(data, 1).map_err(abi_err)?,
            },
            EventKind::TemperatureRecorded => {
                let scaled = abi::read_i64(data, 1).map_err(abi_err)?;
                let secs = abi::read_u64(data, 2).map_err(abi_err)?;
                let timestamp_ms = secs
                    .checked_mul(1000)
                    .ok_or_else(|| malformed(&format!("timestamp {secs} out of range")))?;
                EventPayload::Temperature {
                    scaled,
                    timestamp_ms,
                }
            }
            EventKind::CustodyProposed => {
                let from = record.topics.get(1).and_then(|t| abi::topic_address(t));
                let to = record.topics.get(2).and_then(|t| abi::topic_address(t));
                match (from, to) {
                    (Some(from), Some(to)) => EventPayload::CustodyProposed { from, to },
                    _ => return Err(malformed(&"CustodyProposed is missing party topics")),
                }
            }
            EventKind::CustodyConfirmedPickup => EventPayload::CustodyPickedUp {
                carrier: abi::read_address(data, 1).map_err(abi_err)?,
            },
            EventKind::CustodyConfirmedDrop => EventPayload::CustodyDropped {
                carrier: abi::read_address(data, 1).map_err(abi_err)?,
            },
            EventKind::Delivered => EventPayload::Delivered {
                pharmacy: abi::read_address(data, 1).map_err(abi_err)?,
            },
        };

        Ok(DomainEvent {
            kind,
            key,
            shipment_id,
            payload,
            block_number: record.block_number,
            tx_hash,
            log_index: record.log_index,
            block_timestamp_ms: record.block_timestamp.map(|s| s.saturating_mul(1000)),
        })
    }

    /// Decode a batch under `policy`.
    ///
    /// `Skip` logs and drops malformed records; `Abort` fails the whole batch
    /// on the first one. Exact duplicates (same identity) are collapsed.
    pub fn decode_all(
        &self,
        records: &[RawLogRecord],
        policy: MalformedPolicy,
    ) -> Result<Vec<DomainEvent>, IndexerError> {
        let mut out: Vec<DomainEvent> = Vec::with_capacity(records.len());
        for record in records {
            match self.decode(record) {
                Ok(event) => {
                    if !out.iter().any(|e| e.identity() == event.identity()) {
                        out.push(event);
                    }
                }
                Err(e) => match policy {
                    MalformedPolicy::Skip => {
                        tracing::warn!(
                            block = record.block_number,
                            tx = %record.tx_hash,
                            error = %e,
                            "skipping malformed event"
                        );
                    }
                    MalformedPolicy::Abort => return Err(e),
                },
            }
        }
        Ok(out)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::logs;

    #[test]
    fn decodes_temperature_reading() {
        let rec = logs::temperature("0xc0", "SH-1", 452, 10, 100, "0xAA");
        let ev = EventDecoder::new().decode(&rec).unwrap();
        assert_eq!(ev.kind, EventKind::TemperatureRecorded);
        assert_eq!(ev.key, EntityKey::from_shipment_id("SH-1"));
        assert_eq!(ev.shipment_id, "SH-1");
        assert_eq!(ev.tx_hash, "0xaa");
        assert_eq!(
            ev.payload,
            EventPayload::Temperature {
                scaled: 452,
                timestamp_ms: 10_000
            }
        );
    }

    #[test]
    fn negative_temperature_survives() {
        let rec = logs::temperature("0xc0", "SH-1", -1250, 10, 100, "0xaa");
        let ev = EventDecoder::new().decode(&rec).unwrap();
        assert!(matches!(ev.payload, EventPayload::Temperature { scaled: -1250, .. }));
    }

    #[test]
    fn proposal_key_comes_from_payload() {
        let rec = logs::custody_proposed("0xc0", "SH-9", "0x01", "0x02", 7, "0xbb");
        assert_eq!(rec.topics.len(), 3);
        let ev = EventDecoder::new().decode(&rec).unwrap();
        assert_eq!(ev.key, EntityKey::from_shipment_id("SH-9"));
        match ev.payload {
            EventPayload::CustodyProposed { from, to } => {
                assert!(from.ends_with("01"));
                assert!(to.ends_with("02"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn mismatched_key_topic_is_malformed() {
        let mut rec = logs::delivered("0xc0", "SH-1", 9, "0xcc");
        rec.topics[1] = EntityKey::from_shipment_id("SH-2").to_topic();
        let err = EventDecoder::new().decode(&rec).unwrap_err();
        assert!(matches!(err, IndexerError::MalformedEvent { .. }));
    }

    #[test]
    fn unknown_topic_is_malformed() {
        let mut rec = logs::created("0xc0", "SH-1", 1, "0x01");
        rec.topics[0] = format!("0x{}", "11".repeat(32));
        assert!(EventDecoder::new().decode(&rec).is_err());
    }

    #[test]
    fn block_timestamp_carried_in_ms() {
        let mut rec = logs::created("0xc0", "SH-1", 1, "0x01");
        rec.block_timestamp = Some(42);
        let ev = EventDecoder::new().decode(&rec).unwrap();
        assert_eq!(ev.block_timestamp_ms, Some(42_000));
        assert_eq!(ev.timestamp_ms(), Some(42_000));
    }

    #[test]
    fn skip_policy_drops_bad_records_only() {
        let good = logs::created("0xc0", "SH-1", 1, "0x01");
        let mut bad = logs::delivered("0xc0", "SH-1", 2, "0x02");
        bad.data.truncate(16);
        let decoder = EventDecoder::new();

        let events = decoder
            .decode_all(&[good.clone(), bad.clone()], MalformedPolicy::Skip)
            .unwrap();
        assert_eq!(events.len(), 1);

        let err = decoder
            .decode_all(&[good, bad], MalformedPolicy::Abort)
            .unwrap_err();
        assert!(matches!(err, IndexerError::MalformedEvent { .. }));
    }

    #[test]
    fn duplicate_delivery_collapses() {
        let rec = logs::created("0xc0", "SH-1", 1, "0x01");
        let events = EventDecoder::new()
            .decode_all(&[rec.clone(), rec], MalformedPolicy::Abort)
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
