//! OKX v5 spot market data.
//!
//! Books stream from `books` (sequence-checked snapshot + updates) or
//! `books5` when a depth of five or less is configured; 24h volume comes from
//! `tickers`. OKX closes idle connections after 30s, so the feed sends the
//! text `ping` every `ping_interval_ms`.

pub mod protocol;

use cryptoarb_core::FeedConfig;
use cryptoarb_exchange_ws::WsFeed;

pub use protocol::{BookChannel, OkxProtocol, OKX_WS_URL};

/// OKX feed adapter.
pub type OkxFeed = WsFeed<OkxProtocol>;

/// Builds a stopped OKX feed from its configuration section.
#[must_use]
pub fn feed(config: FeedConfig) -> OkxFeed {
    WsFeed::new(OkxProtocol::from_config(&config), config)
}
