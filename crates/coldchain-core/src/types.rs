//! Shared types for the indexing pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::abi::keccak256;

// ─── EntityKey ────────────────────────────────────────────────────────────────

/// Fixed-size key identifying one shipment on the ledger.
///
/// Derived as `keccak256(utf8(shipment_id))`, which is also the value the
/// ledger emits as the indexed `key` topic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey([u8; 32]);

impl EntityKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the key for a human-readable shipment identifier (e.g. `"SH-451-B7"`).
    pub fn from_shipment_id(shipment_id: &str) -> Self {
        Self(keccak256(shipment_id.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The key rendered as a topic filter value (`0x` + 64 hex chars).
    pub fn to_topic(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Short form for log lines: `0x1234abcd…`.
    pub fn short(&self) -> String {
        format!("0x{}…", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({})", self.short())
    }
}

impl FromStr for EntityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        if raw.len() != 64 {
            return Err(format!("expected 32-byte hex key, got {} chars", raw.len()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(raw, &mut out).map_err(|e| format!("bad hex key '{s}': {e}"))?;
        Ok(Self(out))
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── RawLogRecord ─────────────────────────────────────────────────────────────

/// An undecoded log record as returned by the log source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogRecord {
    /// Emitting contract address (`0x…`).
    pub address: String,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed payload.
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    /// Block timestamp in seconds, when the source includes it.
    pub block_timestamp: Option<u64>,
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Address + positional topic filter for a log scan.
///
/// `topics[i] = None` matches anything in position `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
}

impl LogFilter {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topics: vec![],
        }
    }

    /// Append a positional topic constraint.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(Some(topic.into()));
        self
    }

    /// Append a wildcard position.
    pub fn any_topic(mut self) -> Self {
        self.topics.push(None);
        self
    }

    /// Returns `true` if `record` satisfies this filter.
    pub fn matches(&self, record: &RawLogRecord) -> bool {
        if !record.address.eq_ignore_ascii_case(&self.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, want)| match want {
            None => true,
            Some(t) => record
                .topics
                .get(i)
                .is_some_and(|have| have.eq_ignore_ascii_case(t)),
        })
    }
}

// ─── Block / receipt detail ───────────────────────────────────────────────────

/// Block header detail used for per-row provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDetail {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub transactions_root: String,
    pub receipts_root: String,
    pub state_root: String,
    pub tx_hashes: Vec<String>,
}

impl BlockDetail {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockDetail) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

/// Transaction receipt detail used for per-row provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    /// Sender (the oracle, for temperature readings).
    pub from: String,
    pub gas_used: u64,
    /// `true` if the transaction succeeded.
    pub status: bool,
    pub block_number: u64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topics: &[&str]) -> RawLogRecord {
        RawLogRecord {
            address: "0xAbCd".into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            data: vec![],
            block_number: 1,
            tx_hash: "0x1".into(),
            log_index: 0,
            block_timestamp: None,
        }
    }

    #[test]
    fn entity_key_is_keccak_of_id() {
        // keccak256("")
        let empty = EntityKey::from_shipment_id("");
        assert_eq!(
            empty.to_topic(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn entity_key_parse_roundtrip() {
        let key = EntityKey::from_shipment_id("SH-1");
        let parsed: EntityKey = key.to_topic().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("0x1234".parse::<EntityKey>().is_err());
    }

    #[test]
    fn filter_matches_positionally() {
        let f = LogFilter::new("0xabcd").topic("0xaa").any_topic().topic("0xcc");
        assert!(f.matches(&record(&["0xAA", "0xbb", "0xcc"])));
        assert!(!f.matches(&record(&["0xaa", "0xbb"])));
        assert!(!f.matches(&record(&["0xab", "0xbb", "0xcc"])));
    }

    #[test]
    fn filter_rejects_other_address() {
        let f = LogFilter::new("0x9999");
        assert!(!f.matches(&record(&[])));
    }
}
