//! coldchain-core: read-side projection of pharmaceutical shipment custody
//! and cold-chain integrity from an append-only ledger event log.
//!
//! # Architecture
//!
//! ```text
//! LogSource ─► RangeFetcher ─► EventDecoder ─► LifecycleReducer ─► EntityStore
//!                                                     ▲
//! PushChannel ─► SubscriptionBridge ─► Reconciler ────┘ (point query + logs)
//! ```
//!
//! This crate holds everything that does not touch the network: the domain
//! types, the decoder, the reducer, the store and the collaborator traits.
//! The fetcher, bridge and JSON-RPC client live in `coldchain-evm`.

pub mod abi;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod push;
pub mod reducer;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{EngineState, IndexerConfig, MalformedPolicy};
pub use decoder::EventDecoder;
pub use error::IndexerError;
pub use event::{DomainEvent, EventKind, EventPayload};
pub use push::{Notification, PushHub, Subscription, SubscriptionId};
pub use reducer::LifecycleReducer;
pub use snapshot::{
    LifecycleEvent, LifecycleKind, ShipmentSnapshot, ShipmentStatus, StatusSource,
    TemperatureReading,
};
pub use source::{BlockLookup, Ledger, LedgerStatus, LogSource, PointQuery, PushChannel};
pub use store::EntityStore;
pub use types::{BlockDetail, EntityKey, LogFilter, RawLogRecord, TxReceipt};
