//! coldchain-evm: EVM ledger access and the live reconciliation engine.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use coldchain_evm::{EngineBuilder, JsonRpcLedger};
//!
//! # async fn run() -> Result<(), coldchain_core::IndexerError> {
//! let contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
//! let ledger = Arc::new(JsonRpcLedger::new("http://127.0.0.1:8545", contract, Duration::from_secs(30))?);
//! let engine = EngineBuilder::new().contract(contract).build_polling(ledger)?;
//! engine.start().await?;
//! for snap in engine.snapshots() {
//!     println!("{:?} {}", snap.shipment_id, snap.status);
//! }
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod bridge;
pub mod builder;
pub mod engine;
pub mod fetcher;
pub mod poller;
pub mod provenance;
pub mod reconcile;
pub mod rpc;

pub use backfill::{Backfill, BackfillReport};
pub use bridge::{BridgeStats, SubscriptionBridge};
pub use builder::EngineBuilder;
pub use engine::Engine;
pub use fetcher::{FetchConfig, FetchStats, RangeFetcher};
pub use poller::LogPoller;
pub use provenance::{Provenance, ProvenanceInspector};
pub use reconcile::{Reconcile, Reconciler};
pub use rpc::JsonRpcLedger;
