//! Time-windowed duplicate suppression for detected opportunities.
//!
//! Two independent windows apply:
//!
//! ```text
//! bucket  decides what counts as "the same" opportunity: detections of one
//!         pair/exchange route within the same bucket share an id
//! ttl     decides how long an id is remembered once added
//! ```

use chrono::{DateTime, Utc};
use cryptoarb_core::{DedupConfig, ExchangeId, Symbol};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Default detection bucket width (3 minutes).
pub const DEFAULT_BUCKET: Duration = Duration::from_secs(180);

/// Default id retention (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct Deduplicator {
    seen: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
    bucket: Duration,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_BUCKET)
    }
}

impl Deduplicator {
    #[must_use]
    pub fn new(ttl: Duration, bucket: Duration) -> Self {
        Self {
            seen: RwLock::new(HashMap::new()),
            ttl,
            bucket: bucket.max(Duration::from_secs(1)),
        }
    }

    #[must_use]
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.ttl(), config.bucket())
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn bucket(&self) -> Duration {
        self.bucket
    }

    /// Index of the bucket containing `timestamp`.
    #[must_use]
    pub fn bucket_index(&self, timestamp: DateTime<Utc>) -> i64 {
        let width = i64::try_from(self.bucket.as_secs()).unwrap_or(i64::MAX);
        timestamp.timestamp().div_euclid(width)
    }

    /// Hex SHA-256 of pair, route and detection bucket.
    #[must_use]
    pub fn generate_id(
        &self,
        pair: &Symbol,
        buy_exchange: ExchangeId,
        sell_exchange: ExchangeId,
        timestamp: DateTime<Utc>,
    ) -> String {
        let key = format!(
            "{pair}|{buy_exchange}|{sell_exchange}|{}",
            self.bucket_index(timestamp)
        );
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// True when `id` was added less than one TTL ago.
    #[must_use]
    pub fn is_duplicate(&self, id: &str) -> bool {
        self.seen
            .read()
            .get(id)
            .is_some_and(|added| added.elapsed() < self.ttl)
    }

    /// Records `id` as seen now.
    pub fn add(&self, id: &str) {
        self.seen.write().insert(id.to_string(), Instant::now());
    }

    /// Drops entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut seen = self.seen.write();
        let before = seen.len();
        seen.retain(|_, added| added.elapsed() < ttl);
        before - seen.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.read().is_empty()
    }

    /// Spawns the periodic sweep. It exits when `stop` flips to true or its
    /// sender is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = dedup.purge_expired();
                        if removed > 0 {
                            debug!(removed, remaining = dedup.len(), "Dedup sweep");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
