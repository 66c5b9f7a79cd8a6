//! Adaptive range fetcher.
//!
//! Walks `[from, to]` in consecutive chunks through a [`LogSource`]. A
//! rate-limit rejection halves the chunk width (floor 1), backs off, and
//! retries the same cursor; any other error aborts the whole scan. The cursor
//! only advances past a chunk after that chunk succeeded, so no block is
//! skipped or fetched twice when the width changes mid-scan.

use std::sync::Arc;
use std::time::Duration;

use coldchain_core::config::IndexerConfig;
use coldchain_core::error::IndexerError;
use coldchain_core::source::LogSource;
use coldchain_core::types::{LogFilter, RawLogRecord};

/// Tuning for [`RangeFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Blocks per request at the start of every scan.
    pub initial_width: u64,
    /// Pause after each successful chunk.
    pub request_delay: Duration,
    /// Pause after a rate-limit rejection.
    pub backoff: Duration,
    /// Consecutive rejections tolerated at width 1 before giving up.
    pub max_retries_at_floor: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&IndexerConfig::default())
    }
}

impl From<&IndexerConfig> for FetchConfig {
    fn from(cfg: &IndexerConfig) -> Self {
        Self {
            initial_width: cfg.initial_chunk_width.max(1),
            request_delay: cfg.request_delay(),
            backoff: cfg.rate_limit_backoff(),
            max_retries_at_floor: cfg.max_rate_limit_retries,
        }
    }
}

/// Outcome of one scan, for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: u32,
    pub rate_limited: u32,
    /// Chunk width in effect when the scan finished.
    pub final_width: u64,
}

/// Chunked, rate-limit-aware log scanner.
pub struct RangeFetcher<S: ?Sized> {
    source: Arc<S>,
    config: FetchConfig,
}

impl<S: ?Sized> Clone for RangeFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        }
    }
}

impl<S: LogSource + ?Sized> RangeFetcher<S> {
    pub fn new(source: Arc<S>, config: FetchConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Current chain head, straight from the source.
    pub async fn head(&self) -> Result<u64, IndexerError> {
        self.source.block_height().await
    }

    /// All records matching `filter` in `[from, to]`. All-or-nothing.
    pub async fn fetch(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogRecord>, IndexerError> {
        self.fetch_with_stats(filter, from, to).await.map(|(logs, _)| logs)
    }

    /// Like [`fetch`](Self::fetch), also returning scan statistics.
    pub async fn fetch_with_stats(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<(Vec<RawLogRecord>, FetchStats), IndexerError> {
        let mut stats = FetchStats {
            final_width: self.config.initial_width.max(1),
            ..FetchStats::default()
        };
        if to < from {
            return Ok((vec![], stats));
        }

        let mut out = Vec::new();
        let mut width = stats.final_width;
        let mut cursor = from;
        let mut strikes_at_floor = 0u32;

        tracing::debug!(from, to, width, "starting chunked log scan");

        while cursor <= to {
            let end = cursor.saturating_add(width - 1).min(to);
            stats.requests += 1;

            match self.source.get_logs(filter, cursor, end).await {
                Ok(chunk) => {
                    tracing::trace!(from = cursor, to = end, logs = chunk.len(), "chunk fetched");
                    out.extend(chunk);
                    strikes_at_floor = 0;
                    if end == to {
                        break;
                    }
                    cursor = end + 1;
                    if !self.config.request_delay.is_zero() {
                        tokio::time::sleep(self.config.request_delay).await;
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    stats.rate_limited += 1;
                    if width == 1 {
                        strikes_at_floor += 1;
                        if strikes_at_floor > self.config.max_retries_at_floor {
                            tracing::error!(
                                block = cursor,
                                error = %e,
                                "rate limit persisted at minimum chunk width"
                            );
                            return Err(IndexerError::Transport(format!(
                                "rate limited at block {cursor} after {strikes_at_floor} attempts: {e}"
                            )));
                        }
                    }
                    width = (width / 2).max(1);
                    tracing::warn!(
                        from = cursor,
                        to = end,
                        width,
                        "getLogs rate limited, narrowing chunk and retrying"
                    );
                    if !self.config.backoff.is_zero() {
                        tokio::time::sleep(self.config.backoff).await;
                    }
                }
                Err(e) => {
                    tracing::error!(from = cursor, to = end, error = %e, "chunked log scan failed");
                    return Err(e);
                }
            }
        }

        stats.final_width = width;
        tracing::debug!(
            from,
            to,
            logs = out.len(),
            requests = stats.requests,
            rate_limited = stats.rate_limited,
            "chunked log scan finished"
        );
        Ok((out, stats))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use coldchain_core::testing::{logs, MockLedger};

    const C: &str = "0x00000000000000000000000000000000000000c0";

    fn config(width: u64) -> FetchConfig {
        FetchConfig {
            initial_width: width,
            request_delay: Duration::ZERO,
            backoff: Duration::ZERO,
            max_retries_at_floor: 3,
        }
    }

    fn seeded() -> Arc<MockLedger> {
        let ledger = Arc::new(MockLedger::new());
        for b in 0..=100u64 {
            if b % 3 == 0 {
                ledger.push(logs::temperature(C, "SH-1", b as i64, b, b, &format!("0x{b:x}")));
            }
        }
        ledger
    }

    fn filter() -> LogFilter {
        LogFilter::new(logs::address(C))
    }

    fn blocks(records: &[RawLogRecord]) -> Vec<u64> {
        records.iter().map(|r| r.block_number).collect()
    }

    #[tokio::test]
    async fn chunks_cover_range_exactly() {
        let ledger = seeded();
        let fetcher = RangeFetcher::new(ledger.clone(), config(9));
        let out = fetcher.fetch(&filter(), 5, 40).await.unwrap();
        assert_eq!(blocks(&out), vec![6, 9, 12, 15, 18, 21, 24, 27, 30, 33, 36, 39]);

        let calls = ledger.log_calls();
        assert_eq!(calls.first(), Some(&(5, 13)));
        assert_eq!(calls.last(), Some(&(32, 40)));
        for pair in calls.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 + 1, "gap or overlap in {calls:?}");
        }
    }

    #[tokio::test]
    async fn no_block_loss_under_rate_limiting() {
        for threshold in [1u64, 2, 3, 5, 8] {
            let clean = seeded();
            let expected = RangeFetcher::new(clean, config(9))
                .fetch(&filter(), 0, 100)
                .await
                .unwrap();

            let limited = seeded();
            limited.rate_limit_above(threshold);
            let (got, stats) = RangeFetcher::new(limited, config(9))
                .fetch_with_stats(&filter(), 0, 100)
                .await
                .unwrap();

            assert_eq!(got, expected, "threshold {threshold}");
            assert!(stats.final_width <= threshold);
            assert!(stats.rate_limited > 0);
        }
    }

    #[tokio::test]
    async fn width_halves_on_rate_limit() {
        let ledger = seeded();
        ledger.rate_limit_above(3);
        RangeFetcher::new(ledger.clone(), config(9))
            .fetch(&filter(), 0, 5)
            .await
            .unwrap();
        // 9 (clamped to 6 blocks) → 4 → 2, then 2-wide chunks.
        assert_eq!(ledger.log_calls(), vec![(0, 5), (0, 3), (0, 1), (2, 3), (4, 5)]);
    }

    #[tokio::test]
    async fn transport_error_aborts_scan() {
        let ledger = seeded();
        ledger.fail_at_block(Some(50));
        let err = RangeFetcher::new(ledger, config(9))
            .fetch(&filter(), 0, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Transport(_)));
    }

    #[tokio::test]
    async fn persistent_rate_limit_at_floor_gives_up() {
        let ledger = seeded();
        ledger.rate_limit_above(0);
        let err = RangeFetcher::new(ledger.clone(), config(4))
            .fetch(&filter(), 0, 10)
            .await
            .unwrap_err();
        assert!(!err.is_rate_limited());
        // 4 → 2 → 1, then max_retries_at_floor + 1 attempts at width 1.
        assert_eq!(ledger.log_calls().len(), 2 + 4);
    }

    #[tokio::test]
    async fn empty_range_is_empty() {
        let ledger = seeded();
        let out = RangeFetcher::new(ledger.clone(), config(9))
            .fetch(&filter(), 10, 9)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert!(ledger.log_calls().is_empty());
    }
}
