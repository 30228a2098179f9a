//! Core building blocks for cross-exchange crypto arbitrage.
//!
//! - [`types`]: exchange ids, price levels, best prices, tickers
//! - [`symbol`]: canonical `BASE/QUOTE` symbols and exchange wire forms
//! - [`orderbook`]: L2 book with delta application, staleness and slippage walks
//! - [`feed`]: the contract every exchange feed implements
//! - [`config`], [`config_loader`], [`config_watcher`]: layered configuration with hot reload

pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod feed;
#[cfg(any(test, feature = "test-util"))]
pub mod manual_feed;
pub mod orderbook;
pub mod symbol;
pub mod types;

pub use config::{
    AggregatorConfig, AppConfig, DedupConfig, DetectorConfig, ExchangesConfig, FeeOverrides,
    FeedConfig, NotificationConfig, WithdrawalFeeOverride, MIN_FEED_INTERVAL,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH, ENV_PREFIX};
pub use config_watcher::ConfigWatcher;
pub use feed::{
    BookUpdateCallback, FeedAdapter, FeedError, FeedState, FeedStats, FeedStatsSnapshot,
    TickerCallback,
};
#[cfg(any(test, feature = "test-util"))]
pub use manual_feed::ManualFeed;
pub use orderbook::{LiquidityError, OrderBook, SharedOrderBook, SlippageEstimate};
pub use symbol::{Symbol, SymbolError, WireFormat, KNOWN_QUOTES};
pub use types::{BestPrices, ExchangeId, ExchangePrice, PriceLevel, Side, Ticker};
