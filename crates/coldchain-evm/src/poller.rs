//! Push channel backed by head polling.
//!
//! Every poll interval the poller reads the chain head, scans the newly
//! confirmed blocks for the contract's events through the range fetcher and
//! publishes one [`Notification`] per event to its in-process hub. The first
//! poll only records the head: notifications cover blocks emitted after the
//! poller started.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use coldchain_core::config::IndexerConfig;
use coldchain_core::decoder::EventDecoder;
use coldchain_core::error::IndexerError;
use coldchain_core::event::EventKind;
use coldchain_core::push::{Notification, PushHub, Subscription};
use coldchain_core::source::{LogSource, PushChannel};
use coldchain_core::types::{EntityKey, LogFilter};

use crate::fetcher::{FetchConfig, RangeFetcher};

/// Log-polling implementation of [`PushChannel`].
pub struct LogPoller<S: ?Sized> {
    fetcher: RangeFetcher<S>,
    hub: PushHub,
    decoder: EventDecoder,
    filter: LogFilter,
    confirmation_depth: u64,
    interval: Duration,
    /// Last block already scanned.
    cursor: Mutex<Option<u64>>,
}

impl<S: LogSource + ?Sized + 'static> LogPoller<S> {
    pub fn new(source: Arc<S>, config: &IndexerConfig) -> Self {
        Self {
            fetcher: RangeFetcher::new(source, FetchConfig::from(config)),
            hub: PushHub::new(),
            decoder: EventDecoder::new(),
            filter: LogFilter::new(config.contract_address.to_ascii_lowercase()),
            confirmation_depth: config.confirmation_depth,
            interval: config.poll_interval(),
            cursor: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> &PushHub {
        &self.hub
    }

    pub fn cursor(&self) -> Option<u64> {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan blocks confirmed since the last poll and publish their events.
    /// Returns the number of notifications published. On error the cursor
    /// does not move, so the next poll covers the same blocks again.
    pub async fn poll_once(&self) -> Result<usize, IndexerError> {
        let head = self.fetcher.head().await?;
        let confirmed = head.saturating_sub(self.confirmation_depth);

        let from = match self.cursor() {
            None => {
                tracing::debug!(head = confirmed, "poller starting at head");
                self.set_cursor(confirmed);
                return Ok(0);
            }
            Some(last) if confirmed <= last => return Ok(0),
            Some(last) => last + 1,
        };

        let records = self.fetcher.fetch(&self.filter, from, confirmed).await?;
        let mut published = 0;
        for record in &records {
            if record
                .topics
                .first()
                .and_then(|t| EventKind::from_topic0(t))
                .is_none()
            {
                continue;
            }
            match self.decoder.decode(record) {
                Ok(event) => {
                    self.hub.publish(Notification {
                        key: event.key,
                        kind: event.kind,
                        block_number: event.block_number,
                    });
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(block = record.block_number, error = %e, "undecodable log in live scan");
                }
            }
        }

        self.set_cursor(confirmed);
        tracing::debug!(from, to = confirmed, events = published, "live scan complete");
        Ok(published)
    }

    fn set_cursor(&self, block: u64) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Some(block);
    }

    /// Poll forever on the configured interval. Abort the handle to stop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once().await {
                    tracing::warn!(error = %e, "live poll failed; retrying next tick");
                }
            }
        })
    }
}

#[async_trait]
impl<S: LogSource + ?Sized + 'static> PushChannel for LogPoller<S> {
    async fn subscribe(
        &self,
        kind: EventKind,
        key: Option<EntityKey>,
    ) -> Result<Subscription, IndexerError> {
        self.hub.subscribe(kind, key).await
    }
}
