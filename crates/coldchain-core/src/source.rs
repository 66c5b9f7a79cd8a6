//! Collaborator traits: the ledger-facing ports the engine consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::event::EventKind;
use crate::push::Subscription;
use crate::snapshot::ShipmentStatus;
use crate::types::{BlockDetail, EntityKey, LogFilter, RawLogRecord, TxReceipt};

/// Authoritative current state of one shipment, from a ledger point query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub exists: bool,
    pub status: ShipmentStatus,
    pub breach_count: u64,
}

impl LedgerStatus {
    pub fn not_found() -> Self {
        Self {
            exists: false,
            status: ShipmentStatus::Unknown,
            breach_count: 0,
        }
    }
}

/// Paginated historical log access.
///
/// Implementations must report rate-limit rejections as
/// [`IndexerError::RateLimited`] so the fetcher can adapt.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// All records matching `filter` in the inclusive range `[from, to]`.
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogRecord>, IndexerError>;

    /// Current chain head.
    async fn block_height(&self) -> Result<u64, IndexerError>;
}

/// Synchronous, authoritative state query.
#[async_trait]
pub trait PointQuery: Send + Sync {
    async fn entity_status(&self, key: &EntityKey) -> Result<LedgerStatus, IndexerError>;
}

/// Block and receipt lookup, used for provenance and block timestamps.
#[async_trait]
pub trait BlockLookup: Send + Sync {
    async fn block(&self, number: u64) -> Result<Option<BlockDetail>, IndexerError>;

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, IndexerError>;
}

/// Push notifications for newly confirmed events.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to `kind`, optionally restricted to one entity.
    async fn subscribe(
        &self,
        kind: EventKind,
        key: Option<EntityKey>,
    ) -> Result<Subscription, IndexerError>;
}

/// Everything reconciliation needs from one ledger endpoint.
pub trait Ledger: LogSource + PointQuery + BlockLookup {}

impl<T: LogSource + PointQuery + BlockLookup + ?Sized> Ledger for T {}
