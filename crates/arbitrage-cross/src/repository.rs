//! Persistence contract for accepted opportunities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::ArbitrageOpportunity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid opportunity: {0}")]
    Invalid(String),
}

/// Storage the detector hands accepted opportunities to.
///
/// `create` must be idempotent on [`ArbitrageOpportunity::external_id`].
#[async_trait]
pub trait OpportunityRepository: Send + Sync {
    /// Stores an opportunity.
    ///
    /// # Errors
    /// Returns [`RepositoryError`] when the opportunity cannot be stored.
    async fn create(&self, opportunity: &ArbitrageOpportunity) -> Result<(), RepositoryError>;

    /// Number of stored opportunities that have not expired.
    ///
    /// # Errors
    /// Returns [`RepositoryError`] when storage cannot be queried.
    async fn count_active(&self) -> Result<usize, RepositoryError>;
}

/// Process-local repository keyed by external id.
#[derive(Debug, Default)]
pub struct InMemoryOpportunityRepository {
    entries: RwLock<HashMap<String, ArbitrageOpportunity>>,
}

impl InMemoryOpportunityRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, external_id: &str) -> Option<ArbitrageOpportunity> {
        self.entries.read().get(external_id).cloned()
    }

    /// All stored opportunities, newest first.
    #[must_use]
    pub fn all(&self) -> Vec<ArbitrageOpportunity> {
        let mut all: Vec<_> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Marks an opportunity as notified. Returns false when it is unknown.
    pub fn mark_notified(&self, external_id: &str) -> bool {
        match self.entries.write().get_mut(external_id) {
            Some(opportunity) => {
                opportunity.mark_notified();
                true
            }
            None => false,
        }
    }

    /// Removes opportunities expired at `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, opportunity| !opportunity.is_expired(now));
        before - entries.len()
    }

    /// Purges expired opportunities every `interval` until `stop` flips to true.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let repository = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = repository.purge_expired(Utc::now());
                        if removed > 0 {
                            debug!(removed, remaining = repository.len(), "Opportunity sweep");
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

#[async_trait]
impl OpportunityRepository for InMemoryOpportunityRepository {
    async fn create(&self, opportunity: &ArbitrageOpportunity) -> Result<(), RepositoryError> {
        if opportunity.external_id.is_empty() {
            return Err(RepositoryError::Invalid("empty external id".to_string()));
        }
        self.entries
            .write()
            .entry(opportunity.external_id.clone())
            .or_insert_with(|| opportunity.clone());
        Ok(())
    }

    async fn count_active(&self) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .values()
            .filter(|opportunity| !opportunity.is_expired(now))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArbitrageCalculation;
    use chrono::Duration;
    use cryptoarb_core::{ExchangeId, Symbol};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn opportunity(id: &str, detected_at: DateTime<Utc>) -> ArbitrageOpportunity {
        let calculation = ArbitrageCalculation {
            pair: Symbol::new("ETH", "USDT"),
            buy_exchange: ExchangeId::Okx,
            sell_exchange: ExchangeId::Bybit,
            buy_price: dec!(2000),
            sell_price: dec!(2020),
            volume_24h: dec!(5000000),
            gross_profit_percent: dec!(1),
            buy_fee_percent: dec!(0.1),
            sell_fee_percent: dec!(0.1),
            withdrawal_fee_percent: dec!(0.24),
            total_fees_percent: dec!(0.44),
            slippage_percent: Decimal::ZERO,
            net_profit_percent: dec!(0.56),
            recommended_amount: dec!(1000),
            net_profit_usd: dec!(5.6),
            spread_percent: dec!(0.995),
        };
        ArbitrageOpportunity::new(
            id.to_string(),
            calculation,
            Decimal::ZERO,
            Decimal::ZERO,
            detected_at,
            Duration::minutes(3),
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let repo = InMemoryOpportunityRepository::new();
        let first = opportunity("a", Utc::now());
        let mut second = first.clone();
        second.calculation.net_profit_percent = dec!(9);

        repo.create(&first).await.unwrap();
        repo.create(&second).await.unwrap();

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get("a").unwrap().net_profit_percent(), dec!(0.56));
    }

    #[tokio::test]
    async fn test_count_active_skips_expired() {
        let repo = InMemoryOpportunityRepository::new();
        repo.create(&opportunity("fresh", Utc::now())).await.unwrap();
        repo.create(&opportunity("old", Utc::now() - Duration::minutes(10)))
            .await
            .unwrap();

        assert_eq!(repo.count_active().await.unwrap(), 1);
        assert_eq!(repo.purge_expired(Utc::now()), 1);
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_drops_expired_entries() {
        let repo = Arc::new(InMemoryOpportunityRepository::new());
        repo.create(&opportunity("fresh", Utc::now())).await.unwrap();
        repo.create(&opportunity("old", Utc::now() - Duration::minutes(10)))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = repo.spawn_sweeper(std::time::Duration::from_millis(10), stop_rx);
        for _ in 0..100 {
            if repo.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(repo.len(), 1);
        assert!(repo.get("fresh").is_some());

        stop_tx.send(true).unwrap();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_empty_id() {
        let repo = InMemoryOpportunityRepository::new();
        assert!(matches!(
            repo.create(&opportunity("", Utc::now())).await,
            Err(RepositoryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_notified() {
        let repo = InMemoryOpportunityRepository::new();
        repo.create(&opportunity("a", Utc::now())).await.unwrap();
        assert!(repo.mark_notified("a"));
        assert!(repo.get("a").unwrap().notified);
        assert!(!repo.mark_notified("missing"));
    }
}
