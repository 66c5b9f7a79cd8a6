//! Fluent builder API for creating engines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use coldchain_evm::{EngineBuilder, JsonRpcLedger};
//!
//! # fn main() -> Result<(), coldchain_core::IndexerError> {
//! let contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
//! let ledger = JsonRpcLedger::new("http://127.0.0.1:8545", contract, Duration::from_secs(30))?;
//! let engine = EngineBuilder::new()
//!     .contract(contract)
//!     .readings_lookback(5_000)
//!     .max_concurrent_fetches(2)
//!     .build_polling(Arc::new(ledger))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use coldchain_core::config::{IndexerConfig, MalformedPolicy};
use coldchain_core::error::IndexerError;
use coldchain_core::source::{Ledger, PushChannel};

use crate::engine::Engine;

/// Fluent builder for [`IndexerConfig`] and [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: IndexerConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Set the ledger contract address.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    /// Blocks scanned back from head to discover shipments.
    pub fn discovery_lookback(mut self, blocks: u64) -> Self {
        self.config.discovery_lookback = blocks;
        self
    }

    /// Blocks scanned back from head for one shipment's readings.
    pub fn readings_lookback(mut self, blocks: u64) -> Self {
        self.config.readings_lookback = blocks;
        self
    }

    /// Blocks scanned back from head for one shipment's lifecycle events.
    pub fn lifecycle_lookback(mut self, blocks: u64) -> Self {
        self.config.lifecycle_lookback = blocks;
        self
    }

    /// Set the starting number of blocks per `eth_getLogs` request.
    pub fn chunk_width(mut self, blocks: u64) -> Self {
        self.config.initial_chunk_width = blocks;
        self
    }

    pub fn request_delay_ms(mut self, ms: u64) -> Self {
        self.config.request_delay_ms = ms;
        self
    }

    pub fn rate_limit_backoff_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_backoff_ms = ms;
        self
    }

    pub fn max_rate_limit_retries(mut self, n: u32) -> Self {
        self.config.max_rate_limit_retries = n;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set confirmation depth (blocks behind head before the poller publishes).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Ceiling on concurrent reconciliations, backfill included.
    pub fn max_concurrent_fetches(mut self, n: usize) -> Self {
        self.config.max_concurrent_fetches = n;
        self
    }

    pub fn malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.config.malformed_policy = policy;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build an engine fed by `push`.
    pub fn build(
        self,
        ledger: Arc<dyn Ledger>,
        push: Arc<dyn PushChannel>,
    ) -> Result<Engine, IndexerError> {
        Engine::new(self.config, ledger, push)
    }

    /// Build an engine that polls `ledger` for new events.
    pub fn build_polling(self, ledger: Arc<dyn Ledger>) -> Result<Engine, IndexerError> {
        Engine::polling(self.config, ledger)
    }
}
