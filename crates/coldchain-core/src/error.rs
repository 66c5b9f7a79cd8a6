//! Error types for the coldchain pipeline.

use thiserror::Error;

/// Errors that can occur while fetching, decoding or reconciling shipment state.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The log source rejected the request because of its rate limit.
    /// Recovered by the range fetcher; never surfaced past it.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Any other transport failure (connection, protocol, node error).
    #[error("transport error: {0}")]
    Transport(String),

    /// A single raw record could not be decoded against its topic's schema.
    #[error("malformed event in tx {tx_hash}: {reason}")]
    MalformedEvent { tx_hash: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error belongs to the rate-limit class.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub(crate) fn malformed(tx_hash: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedEvent {
            tx_hash: tx_hash.into(),
            reason: reason.to_string(),
        }
    }
}
