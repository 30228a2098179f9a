//! Cross-exchange crypto arbitrage detection.
//!
//! This crate merges the order books streamed by the exchange feeds, prices
//! every buy-low/sell-high route after fees and slippage, and emits each
//! opportunity once.
//!
//! # Overview
//!
//! When one exchange's ask sits below another exchange's bid, buying on the
//! first and selling on the second captures the difference minus costs:
//!
//! ```text
//! Binance: ask 100.00 × 10 BTC
//! Bybit:   bid 101.00 × 10 BTC
//!
//!   Gross:            1.000%
//!   Trading fees:    -0.200%   (0.1% per leg)
//!   Withdrawal fee:  -0.002%   (0.0002 BTC on $1000)
//!   Slippage:        -0.000%   ($1000 fits the top level)
//!   Net:              0.798%
//! ```
//!
//! # Modules
//!
//! - [`aggregator`]: Cross-exchange book registry and best-price queries
//! - [`fees`]: Trading and withdrawal fee table
//! - [`calculator`]: Gross/net profit and trade sizing
//! - [`dedup`]: Time-bucketed duplicate suppression
//! - [`detector`]: Update-driven detection pipeline
//! - [`repository`]: Persistence contract and in-memory store
//! - [`notifier`]: Bounded notification channel
//!
//! # Example
//!
//! ```ignore
//! use cryptoarb_arbitrage::{
//!     ArbitrageDetector, ChannelNotifier, Deduplicator, FeeTable,
//!     InMemoryOpportunityRepository, OrderBookAggregator,
//! };
//!
//! let aggregator = Arc::new(OrderBookAggregator::from_config(&config.aggregator));
//! aggregator.register(Arc::new(cryptoarb_binance::feed(config.exchanges.binance.clone())));
//! aggregator.register(Arc::new(cryptoarb_okx::feed(config.exchanges.okx.clone())));
//!
//! let detector = Arc::new(ArbitrageDetector::new(
//!     aggregator.clone(),
//!     Arc::new(FeeTable::with_overrides(&config.fees)),
//!     Arc::new(Deduplicator::from_config(&config.dedup)),
//!     Arc::new(InMemoryOpportunityRepository::new()),
//!     config.detector.clone(),
//! ));
//!
//! let (notifier, mut opportunities) = ChannelNotifier::new(256);
//! detector.on_opportunity(notifier.callback());
//! detector.start();
//!
//! aggregator.connect_all(&config.symbols).await;
//! while let Some(opp) = opportunities.recv().await {
//!     println!("{opp}");
//! }
//! ```

pub mod aggregator;
pub mod calculator;
pub mod dedup;
pub mod detector;
pub mod fees;
pub mod notifier;
pub mod repository;
pub mod types;

pub use aggregator::{OrderBookAggregator, UpdateListener, DEFAULT_MAX_BOOK_AGE};
pub use calculator::{recommended_amount, CalculationError, ProfitCalculator};
pub use dedup::Deduplicator;
pub use detector::{
    ArbitrageDetector, DetectorStats, DetectorStatsSnapshot, OpportunityCallback, Rejection,
};
pub use fees::{FeeQuote, FeeTable};
pub use notifier::ChannelNotifier;
pub use repository::{InMemoryOpportunityRepository, OpportunityRepository, RepositoryError};
pub use types::{ArbitrageCalculation, ArbitrageOpportunity};
