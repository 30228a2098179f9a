//! Bybit v5 spot market data.
//!
//! Books stream from `orderbook.<depth>.<SYMBOL>` (snapshot then deltas) and
//! 24h volume from `tickers.<SYMBOL>`. Bybit drops connections that send
//! nothing for a while, so the feed pings with `{"op": "ping"}` every
//! `ping_interval_ms` (20s by default).

pub mod protocol;

use cryptoarb_core::FeedConfig;
use cryptoarb_exchange_ws::WsFeed;

pub use protocol::{BybitProtocol, BYBIT_SPOT_WS_URL};

/// Bybit feed adapter.
pub type BybitFeed = WsFeed<BybitProtocol>;

/// Builds a stopped Bybit feed from its configuration section.
#[must_use]
pub fn feed(config: FeedConfig) -> BybitFeed {
    WsFeed::new(BybitProtocol::from_config(&config), config)
}
