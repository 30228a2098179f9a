//! Binance spot market data.
//!
//! Books stream from the partial-depth channel (`depth20@100ms` by default)
//! and 24h volume from the rolling ticker, both on one combined-stream
//! connection kept alive with WebSocket ping frames.

pub mod protocol;

use cryptoarb_core::FeedConfig;
use cryptoarb_exchange_ws::WsFeed;

pub use protocol::{BinanceProtocol, BINANCE_WS_URL};

/// Binance feed adapter.
pub type BinanceFeed = WsFeed<BinanceProtocol>;

/// Builds a stopped Binance feed from its configuration section.
#[must_use]
pub fn feed(config: FeedConfig) -> BinanceFeed {
    WsFeed::new(BinanceProtocol::from_config(&config), config)
}
