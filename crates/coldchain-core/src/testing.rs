//! Test doubles: raw log builders and an in-memory ledger.
//!
//! Enabled for this crate's tests and, through the `test-utils` feature, for
//! downstream crates' tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::snapshot::ShipmentStatus;
use crate::source::{BlockLookup, LedgerStatus, LogSource, PointQuery};
use crate::types::{BlockDetail, EntityKey, LogFilter, RawLogRecord, TxReceipt};

/// Builders for well-formed ledger logs.
pub mod logs {
    use crate::abi::Encoder;
    use crate::event::EventKind;
    use crate::types::{EntityKey, RawLogRecord};

    /// Left-pad a short hex address (`"0x0a"`) to 20 bytes.
    pub fn address(short: &str) -> String {
        let raw = short.strip_prefix("0x").unwrap_or(short);
        format!("0x{raw:0>40}")
    }

    fn address_topic(short: &str) -> String {
        let raw = short.strip_prefix("0x").unwrap_or(short);
        format!("0x{raw:0>64}")
    }

    fn record(contract: &str, topics: Vec<String>, data: Vec<u8>, block: u64, tx: &str) -> RawLogRecord {
        RawLogRecord {
            address: address(contract),
            topics,
            data,
            block_number: block,
            tx_hash: tx.to_string(),
            log_index: 0,
            block_timestamp: None,
        }
    }

    fn keyed(kind: EventKind, id: &str) -> Vec<String> {
        vec![
            kind.topic0().to_string(),
            EntityKey::from_shipment_id(id).to_topic(),
        ]
    }

    pub fn created(contract: &str, id: &str, block: u64, tx: &str) -> RawLogRecord {
        let data = Encoder::new().string(id).address(&address("0xfa")).finish();
        record(contract, keyed(EventKind::Created, id), data, block, tx)
    }

    /// `scaled` is ×100; `ts_secs` is the oracle timestamp in seconds.
    pub fn temperature(
        contract: &str,
        id: &str,
        scaled: i64,
        ts_secs: u64,
        block: u64,
        tx: &str,
    ) -> RawLogRecord {
        let data = Encoder::new().string(id).int(scaled).uint(ts_secs).finish();
        record(contract, keyed(EventKind::TemperatureRecorded, id), data, block, tx)
    }

    pub fn custody_proposed(
        contract: &str,
        id: &str,
        from: &str,
        to: &str,
        block: u64,
        tx: &str,
    ) -> RawLogRecord {
        let topics = vec![
            EventKind::CustodyProposed.topic0().to_string(),
            address_topic(from),
            address_topic(to),
        ];
        let data = Encoder::new().string(id).finish();
        record(contract, topics, data, block, tx)
    }

    pub fn picked_up(contract: &str, id: &str, carrier: &str, block: u64, tx: &str) -> RawLogRecord {
        let data = Encoder::new().string(id).address(&address(carrier)).finish();
        record(contract, keyed(EventKind::CustodyConfirmedPickup, id), data, block, tx)
    }

    pub fn dropped(contract: &str, id: &str, carrier: &str, block: u64, tx: &str) -> RawLogRecord {
        let data = Encoder::new().string(id).address(&address(carrier)).finish();
        record(contract, keyed(EventKind::CustodyConfirmedDrop, id), data, block, tx)
    }

    pub fn delivered(contract: &str, id: &str, block: u64, tx: &str) -> RawLogRecord {
        let data = Encoder::new().string(id).address(&address("0xfb")).finish();
        record(contract, keyed(EventKind::Delivered, id), data, block, tx)
    }
}

#[derive(Default)]
struct MockState {
    records: Vec<RawLogRecord>,
    head: u64,
    statuses: HashMap<EntityKey, LedgerStatus>,
    blocks: HashMap<u64, BlockDetail>,
    receipts: HashMap<String, TxReceipt>,
    rate_limit_above: Option<u64>,
    fail_at_block: Option<u64>,
    fail_status: bool,
    log_calls: Vec<(u64, u64)>,
    status_calls: u64,
    block_calls: u64,
    latency: Duration,
    status_in_flight: HashMap<EntityKey, usize>,
    max_status_overlap: usize,
}

/// An in-memory ledger implementing [`LogSource`], [`PointQuery`] and
/// [`BlockLookup`], with fault injection.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record; head advances to cover it.
    pub fn push(&self, record: RawLogRecord) {
        let mut s = self.state();
        s.head = s.head.max(record.block_number);
        s.records.push(record);
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    pub fn set_status(&self, shipment_id: &str, status: ShipmentStatus, breach_count: u64) {
        self.state().statuses.insert(
            EntityKey::from_shipment_id(shipment_id),
            LedgerStatus {
                exists: true,
                status,
                breach_count,
            },
        );
    }

    /// Register block `number` with the given timestamp (seconds).
    pub fn set_block_time(&self, number: u64, timestamp: u64) {
        self.state().blocks.insert(
            number,
            BlockDetail {
                number,
                hash: format!("0x{number:064x}"),
                parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
                timestamp,
                transactions_root: "0x01".into(),
                receipts_root: "0x02".into(),
                state_root: "0x03".into(),
                tx_hashes: vec![],
            },
        );
    }

    pub fn set_receipt(&self, receipt: TxReceipt) {
        self.state()
            .receipts
            .insert(receipt.tx_hash.to_ascii_lowercase(), receipt);
    }

    /// Reject any `get_logs` spanning more than `width` blocks as rate-limited.
    pub fn rate_limit_above(&self, width: u64) {
        self.state().rate_limit_above = Some(width);
    }

    /// Fail any `get_logs` covering `block` with a transport error.
    pub fn fail_at_block(&self, block: Option<u64>) {
        self.state().fail_at_block = block;
    }

    /// Make point queries fail with a transport error.
    pub fn fail_status_queries(&self, fail: bool) {
        self.state().fail_status = fail;
    }

    /// Delay applied to every point query.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Every `(from, to)` passed to `get_logs`, including rejected ones.
    pub fn log_calls(&self) -> Vec<(u64, u64)> {
        self.state().log_calls.clone()
    }

    pub fn status_calls(&self) -> u64 {
        self.state().status_calls
    }

    pub fn block_calls(&self) -> u64 {
        self.state().block_calls
    }

    /// Most point queries ever in flight at once for a single key.
    pub fn max_status_overlap(&self) -> usize {
        self.state().max_status_overlap
    }
}

#[async_trait]
impl LogSource for MockLedger {
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogRecord>, IndexerError> {
        let mut s = self.state();
        s.log_calls.push((from, to));
        if let Some(limit) = s.rate_limit_above {
            if to - from + 1 > limit {
                return Err(IndexerError::RateLimited {
                    message: format!("range {from}..={to} exceeds {limit} blocks"),
                });
            }
        }
        if let Some(bad) = s.fail_at_block {
            if (from..=to).contains(&bad) {
                return Err(IndexerError::Transport(format!("connection reset at {bad}")));
            }
        }
        let mut out: Vec<_> = s
            .records
            .iter()
            .filter(|r| (from..=to).contains(&r.block_number) && filter.matches(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.block_number, r.log_index));
        Ok(out)
    }

    async fn block_height(&self) -> Result<u64, IndexerError> {
        Ok(self.state().head)
    }
}

#[async_trait]
impl PointQuery for MockLedger {
    async fn entity_status(&self, key: &EntityKey) -> Result<LedgerStatus, IndexerError> {
        let (latency, fail, status) = {
            let mut s = self.state();
            s.status_calls += 1;
            let in_flight = s.status_in_flight.entry(*key).or_default();
            *in_flight += 1;
            let overlap = *in_flight;
            s.max_status_overlap = s.max_status_overlap.max(overlap);
            (
                s.latency,
                s.fail_status,
                s.statuses.get(key).copied().unwrap_or_else(LedgerStatus::not_found),
            )
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(n) = self.state().status_in_flight.get_mut(key) {
            *n -= 1;
        }
        if fail {
            return Err(IndexerError::Transport("point query unavailable".into()));
        }
        Ok(status)
    }
}

#[async_trait]
impl BlockLookup for MockLedger {
    async fn block(&self, number: u64) -> Result<Option<BlockDetail>, IndexerError> {
        let mut s = self.state();
        s.block_calls += 1;
        Ok(s.blocks.get(&number).cloned())
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, IndexerError> {
        Ok(self
            .state()
            .receipts
            .get(&tx_hash.to_ascii_lowercase())
            .cloned())
    }
}
