//! Engine configuration and runtime state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// What to do with a record that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log and drop the record; the rest of the batch is kept.
    #[default]
    Skip,
    /// Fail the whole batch.
    Abort,
}

/// Configuration for an engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Ledger contract address (`0x…`).
    pub contract_address: String,
    /// Blocks scanned back from head when discovering shipments.
    pub discovery_lookback: u64,
    /// Blocks scanned back from head for one shipment's temperature readings.
    pub readings_lookback: u64,
    /// Blocks scanned back from head for one shipment's lifecycle events.
    pub lifecycle_lookback: u64,
    /// Starting number of blocks per `getLogs` request.
    pub initial_chunk_width: u64,
    /// Pause after every successful chunk (milliseconds).
    pub request_delay_ms: u64,
    /// Pause after a rate-limit rejection (milliseconds).
    pub rate_limit_backoff_ms: u64,
    /// Consecutive rate-limit rejections tolerated once the chunk width is 1.
    pub max_rate_limit_retries: u32,
    /// Head polling interval for the log poller (milliseconds).
    pub poll_interval_ms: u64,
    /// Blocks behind head before the poller treats a block as confirmed.
    pub confirmation_depth: u64,
    /// Upper bound on reconciliations running at once, backfill included.
    pub max_concurrent_fetches: usize,
    pub malformed_policy: MalformedPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            discovery_lookback: 2_000,
            readings_lookback: 5_000,
            lifecycle_lookback: 10_000,
            initial_chunk_width: 9,
            request_delay_ms: 300,
            rate_limit_backoff_ms: 500,
            max_rate_limit_retries: 8,
            poll_interval_ms: 4_000,
            confirmation_depth: 0,
            max_concurrent_fetches: 2,
            malformed_policy: MalformedPolicy::Skip,
        }
    }
}

impl IndexerConfig {
    /// Config with every delay set to zero, for tests and local nodes.
    pub fn without_delays(contract_address: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            request_delay_ms: 0,
            rate_limit_backoff_ms: 0,
            poll_interval_ms: 10,
            ..Self::default()
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        let addr = self
            .contract_address
            .strip_prefix("0x")
            .unwrap_or(&self.contract_address);
        if addr.len() != 40 || !addr.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexerError::Config(format!(
                "contract_address '{}' is not a 20-byte hex address",
                self.contract_address
            )));
        }
        if self.initial_chunk_width == 0 {
            return Err(IndexerError::Config("initial_chunk_width must be ≥ 1".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(IndexerError::Config(
                "max_concurrent_fetches must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// Runtime state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// Not yet started.
    Idle,
    /// Reconstructing historical shipments.
    Backfilling,
    /// Following push notifications.
    Live,
    /// Releasing subscriptions and draining reconciliations.
    Stopping,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
