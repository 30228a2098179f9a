//! Cross-exchange arbitrage detection.
//!
//! Every aggregator update schedules a re-evaluation of the updated symbol.
//! Evaluation is a fail-closed pipeline:
//!
//! ```text
//! best prices ─> crossed? ─> both books ─> slippage walk ─> slippage cap
//!      ─> net profit ─> volume / spread / size filters ─> dedup
//!      ─> persist ─> register id ─> callback
//! ```
//!
//! Any failed step drops the candidate. At most one evaluation per symbol is
//! in flight at a time; updates arriving meanwhile collapse into a single
//! rerun. A semaphore caps evaluations across all symbols. The opportunity
//! callback runs on the blocking pool and never holds a detection permit.

use chrono::{DateTime, Utc};
use cryptoarb_core::{DetectorConfig, Side, Symbol};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use crate::aggregator::OrderBookAggregator;
use crate::calculator::ProfitCalculator;
use crate::dedup::Deduplicator;
use crate::fees::FeeTable;
use crate::repository::OpportunityRepository;
use crate::types::ArbitrageOpportunity;

/// Receives each accepted opportunity exactly once.
pub type OpportunityCallback = Arc<dyn Fn(ArbitrageOpportunity) + Send + Sync>;

// =============================================================================
// Rejections
// =============================================================================

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    NoPrices,
    NotCrossed,
    SameExchange,
    MissingBook,
    StaleBook,
    InsufficientLiquidity,
    SlippageTooHigh,
    InvalidPrices,
    ProfitTooLow,
    VolumeTooLow,
    SpreadTooWide,
    AmountTooSmall,
    Duplicate,
    PersistenceFailed,
}

impl Rejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPrices => "no_prices",
            Self::NotCrossed => "not_crossed",
            Self::SameExchange => "same_exchange",
            Self::MissingBook => "missing_book",
            Self::StaleBook => "stale_book",
            Self::InsufficientLiquidity => "insufficient_liquidity",
            Self::SlippageTooHigh => "slippage_too_high",
            Self::InvalidPrices => "invalid_prices",
            Self::ProfitTooLow => "profit_too_low",
            Self::VolumeTooLow => "volume_too_low",
            Self::SpreadTooWide => "spread_too_wide",
            Self::AmountTooSmall => "amount_too_small",
            Self::Duplicate => "duplicate",
            Self::PersistenceFailed => "persistence_failed",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
pub struct DetectorStats {
    runs: AtomicU64,
    coalesced: AtomicU64,
    emitted: AtomicU64,
    not_crossed: AtomicU64,
    missing_data: AtomicU64,
    liquidity: AtomicU64,
    unprofitable: AtomicU64,
    filtered: AtomicU64,
    duplicates: AtomicU64,
    persistence_failures: AtomicU64,
}

/// Point-in-time copy of [`DetectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStatsSnapshot {
    /// Evaluations started.
    pub runs: u64,
    /// Updates folded into a pending rerun.
    pub coalesced: u64,
    pub emitted: u64,
    /// No crossing, or both sides on one exchange.
    pub not_crossed: u64,
    /// No prices, missing or stale book.
    pub missing_data: u64,
    /// Insufficient depth or slippage over the cap.
    pub liquidity: u64,
    /// Net profit under the minimum or invalid prices.
    pub unprofitable: u64,
    /// Volume, spread or size filters.
    pub filtered: u64,
    pub duplicates: u64,
    pub persistence_failures: u64,
}

impl DetectorStats {
    fn record(&self, rejection: Rejection) {
        let counter = match rejection {
            Rejection::NotCrossed | Rejection::SameExchange => &self.not_crossed,
            Rejection::NoPrices | Rejection::MissingBook | Rejection::StaleBook => {
                &self.missing_data
            }
            Rejection::InsufficientLiquidity | Rejection::SlippageTooHigh => &self.liquidity,
            Rejection::InvalidPrices | Rejection::ProfitTooLow => &self.unprofitable,
            Rejection::VolumeTooLow | Rejection::SpreadTooWide | Rejection::AmountTooSmall => {
                &self.filtered
            }
            Rejection::Duplicate => &self.duplicates,
            Rejection::PersistenceFailed => &self.persistence_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> DetectorStatsSnapshot {
        DetectorStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            not_crossed: self.not_crossed.load(Ordering::Relaxed),
            missing_data: self.missing_data.load(Ordering::Relaxed),
            liquidity: self.liquidity.load(Ordering::Relaxed),
            unprofitable: self.unprofitable.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Detector
// =============================================================================

pub struct ArbitrageDetector {
    aggregator: Arc<OrderBookAggregator>,
    calculator: ProfitCalculator,
    dedup: Arc<Deduplicator>,
    repository: Arc<dyn OpportunityRepository>,
    config: DetectorConfig,
    callback: RwLock<Option<OpportunityCallback>>,
    /// Symbols with a running evaluation; the flag requests one more pass.
    in_flight: Mutex<HashMap<Symbol, bool>>,
    permits: Semaphore,
    stats: DetectorStats,
}

impl std::fmt::Debug for ArbitrageDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbitrageDetector")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl ArbitrageDetector {
    #[must_use]
    pub fn new(
        aggregator: Arc<OrderBookAggregator>,
        fees: Arc<FeeTable>,
        dedup: Arc<Deduplicator>,
        repository: Arc<dyn OpportunityRepository>,
        config: DetectorConfig,
    ) -> Self {
        let calculator =
            ProfitCalculator::new(fees).with_reference_notional(config.reference_notional);
        let permits = Semaphore::new(config.max_concurrent_detections.max(1));
        Self {
            aggregator,
            calculator,
            dedup,
            repository,
            config,
            callback: RwLock::new(None),
            in_flight: Mutex::new(HashMap::new()),
            permits,
            stats: DetectorStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[must_use]
    pub fn calculator(&self) -> &ProfitCalculator {
        &self.calculator
    }

    #[must_use]
    pub fn stats(&self) -> DetectorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Symbols with an evaluation currently scheduled or running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Registers the opportunity listener, replacing any previous one.
    pub fn on_opportunity(&self, callback: OpportunityCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Subscribes to aggregator updates.
    pub fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.aggregator.on_update(Arc::new(move |symbol, _exchange| {
            if let Some(detector) = weak.upgrade() {
                detector.schedule(symbol);
            }
        }));
        info!(
            min_profit_percent = %self.config.min_profit_percent,
            max_concurrent = self.config.max_concurrent_detections,
            "Arbitrage detector started"
        );
    }

    /// Queues an evaluation of `symbol` without waiting for it.
    pub fn schedule(self: &Arc<Self>, symbol: &Symbol) {
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(rerun) = in_flight.get_mut(symbol) {
                *rerun = true;
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                return;
            }
            in_flight.insert(symbol.clone(), false);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Arc::clone(self).run(symbol.clone()));
            }
            Err(e) => {
                self.in_flight.lock().remove(symbol);
                warn!(symbol = %symbol, error = %e, "No runtime for detection");
            }
        }
    }

    async fn run(self: Arc<Self>, symbol: Symbol) {
        loop {
            {
                let Ok(_permit) = self.permits.acquire().await else {
                    self.in_flight.lock().remove(&symbol);
                    return;
                };
                self.detect(&symbol).await;
            }

            let again = {
                let mut in_flight = self.in_flight.lock();
                match in_flight.get_mut(&symbol) {
                    Some(rerun) if *rerun => {
                        *rerun = false;
                        true
                    }
                    _ => {
                        in_flight.remove(&symbol);
                        false
                    }
                }
            };
            if !again {
                break;
            }
        }
    }

    /// Runs the full pipeline for `symbol` and emits at most one opportunity.
    pub async fn detect(&self, symbol: &Symbol) -> Option<ArbitrageOpportunity> {
        self.stats.runs.fetch_add(1, Ordering::Relaxed);

        let opportunity = match self.evaluate(symbol, Utc::now()) {
            Ok(opportunity) => opportunity,
            Err(rejection) => {
                self.stats.record(rejection);
                trace!(symbol = %symbol, reason = %rejection, "Candidate rejected");
                return None;
            }
        };

        if let Err(e) = self.repository.create(&opportunity).await {
            self.stats.record(Rejection::PersistenceFailed);
            warn!(
                id = %opportunity.external_id,
                symbol = %symbol,
                error = %e,
                "Failed to persist opportunity"
            );
            return None;
        }
        self.dedup.add(&opportunity.external_id);
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);

        let calc = &opportunity.calculation;
        info!(
            id = %opportunity.external_id,
            symbol = %symbol,
            buy_exchange = %calc.buy_exchange,
            buy_price = %calc.buy_price,
            sell_exchange = %calc.sell_exchange,
            sell_price = %calc.sell_price,
            net_profit_percent = %calc.net_profit_percent,
            recommended_amount = %calc.recommended_amount,
            "Arbitrage opportunity detected"
        );

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            let delivered = opportunity.clone();
            tokio::task::spawn_blocking(move || callback(delivered));
        }
        Some(opportunity)
    }

    /// Pipeline steps up to and including the duplicate check.
    ///
    /// # Errors
    /// Returns the first [`Rejection`] the candidate hits.
    pub fn evaluate(
        &self,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Result<ArbitrageOpportunity, Rejection> {
        let best = self
            .aggregator
            .get_best_prices(symbol)
            .ok_or(Rejection::NoPrices)?;
        if !best.is_crossed() {
            return Err(Rejection::NotCrossed);
        }
        if best.same_exchange() {
            return Err(Rejection::SameExchange);
        }

        let buy_exchange = best.best_ask.exchange;
        let sell_exchange = best.best_bid.exchange;
        let buy_book = self
            .aggregator
            .get_order_book(buy_exchange, symbol)
            .ok_or(Rejection::MissingBook)?;
        let sell_book = self
            .aggregator
            .get_order_book(sell_exchange, symbol)
            .ok_or(Rejection::MissingBook)?;
        let max_age = self.aggregator.max_book_age();
        if buy_book.is_stale(max_age) || sell_book.is_stale(max_age) {
            return Err(Rejection::StaleBook);
        }

        let notional = self.config.reference_notional;
        let buy_slippage = buy_book
            .calculate_slippage(Side::Buy, notional)
            .map_err(|_| Rejection::InsufficientLiquidity)?;
        let sell_slippage = sell_book
            .calculate_slippage(Side::Sell, notional)
            .map_err(|_| Rejection::InsufficientLiquidity)?;

        let max_slippage = self.config.max_slippage_percent;
        if buy_slippage.slippage_percent.abs() > max_slippage
            || sell_slippage.slippage_percent.abs() > max_slippage
        {
            return Err(Rejection::SlippageTooHigh);
        }

        let volume_24h = self
            .aggregator
            .volume_24h(symbol, &[buy_exchange, sell_exchange])
            .unwrap_or(Decimal::ZERO);
        let calculation = self
            .calculator
            .calculate_with_slippage(
                symbol,
                buy_exchange,
                best.best_ask.price,
                sell_exchange,
                best.best_bid.price,
                volume_24h,
                buy_slippage.slippage_percent,
                sell_slippage.slippage_percent,
            )
            .map_err(|_| Rejection::InvalidPrices)?;
        if calculation.net_profit_percent < self.config.min_profit_percent {
            return Err(Rejection::ProfitTooLow);
        }

        if volume_24h < self.config.min_volume_24h {
            return Err(Rejection::VolumeTooLow);
        }
        if calculation.spread_percent > self.config.max_spread_percent {
            debug!(
                symbol = %symbol,
                spread_percent = %calculation.spread_percent,
                "Spread implausibly wide"
            );
            return Err(Rejection::SpreadTooWide);
        }
        if calculation.recommended_amount < self.config.min_recommended_amount {
            return Err(Rejection::AmountTooSmall);
        }

        let external_id = self
            .dedup
            .generate_id(symbol, buy_exchange, sell_exchange, now);
        if self.dedup.is_duplicate(&external_id) {
            return Err(Rejection::Duplicate);
        }

        let ttl = chrono::Duration::from_std(self.config.opportunity_ttl())
            .unwrap_or_else(|_| chrono::Duration::minutes(3));
        Ok(ArbitrageOpportunity::new(
            external_id,
            calculation,
            buy_slippage.slippage_percent,
            sell_slippage.slippage_percent,
            now,
            ttl,
        ))
    }
}
