//! On-demand provenance for a single reading or lifecycle row.
//!
//! Nothing here runs during indexing. A presentation layer expands one row
//! and the inspector loads the emitting block, its neighbours and the
//! transaction receipt.

use std::sync::Arc;

use futures::future;
use serde::Serialize;

use coldchain_core::error::IndexerError;
use coldchain_core::source::BlockLookup;
use coldchain_core::types::{BlockDetail, TxReceipt};

/// Audit detail for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub block: BlockDetail,
    /// `None` for genesis or when the node does not have it.
    pub previous: Option<BlockDetail>,
    /// `None` while the block is still the head.
    pub next: Option<BlockDetail>,
    pub receipt: Option<TxReceipt>,
}

impl Provenance {
    /// Whether the loaded neighbours hash-link to the block.
    pub fn is_linked(&self) -> bool {
        self.previous.as_ref().map_or(true, |p| self.block.extends(p))
            && self.next.as_ref().map_or(true, |n| n.extends(&self.block))
    }

    /// Whether the block lists the receipt's transaction.
    pub fn includes_tx(&self) -> bool {
        self.receipt.as_ref().is_some_and(|r| {
            self.block
                .tx_hashes
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&r.tx_hash))
        })
    }
}

/// Lazy block/receipt loader.
pub struct ProvenanceInspector<L: ?Sized> {
    lookup: Arc<L>,
}

impl<L: BlockLookup + ?Sized> ProvenanceInspector<L> {
    pub fn new(lookup: Arc<L>) -> Self {
        Self { lookup }
    }

    /// Load provenance for a row in `block_number`, optionally with the
    /// receipt of `tx_hash`. `Ok(None)` if the block itself is unknown.
    pub async fn inspect(
        &self,
        block_number: u64,
        tx_hash: Option<&str>,
    ) -> Result<Option<Provenance>, IndexerError> {
        let Some(block) = self.lookup.block(block_number).await? else {
            return Ok(None);
        };

        let previous = async {
            match block_number.checked_sub(1) {
                Some(n) => self.lookup.block(n).await,
                None => Ok(None),
            }
        };
        let next = self.lookup.block(block_number + 1);
        let receipt = async {
            match tx_hash {
                Some(h) => self.lookup.receipt(h).await,
                None => Ok(None),
            }
        };
        let (previous, next, receipt) = future::try_join3(previous, next, receipt).await?;

        let provenance = Provenance {
            block,
            previous,
            next,
            receipt,
        };
        if !provenance.is_linked() {
            tracing::warn!(block = block_number, "neighbouring blocks do not hash-link");
        }
        Ok(Some(provenance))
    }
}
