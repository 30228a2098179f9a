//! Shared market-data types.
//!
//! These are the exchange-agnostic values that flow from the feed adapters
//! into the aggregator and the detector.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::symbol::Symbol;

// =============================================================================
// Exchange Identifiers
// =============================================================================

/// Identifies a supported exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    /// Binance spot.
    Binance,
    /// Bybit v5 spot.
    Bybit,
    /// OKX v5.
    Okx,
}

impl ExchangeId {
    /// Every supported exchange, in registration order.
    pub const ALL: [ExchangeId; 3] = [Self::Binance, Self::Bybit, Self::Okx];

    /// Returns the lowercase identifier used in configuration and ids.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "okx" | "okex" => Ok(Self::Okx),
            other => Err(format!("unknown exchange: {other}")),
        }
    }
}

// =============================================================================
// Book Side
// =============================================================================

/// Trade direction used when walking an order book.
///
/// A buy consumes asks, a sell consumes bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Take liquidity from the ask side.
    Buy,
    /// Take liquidity from the bid side.
    Sell,
}

impl Side {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Price Levels and Top-of-Book Snapshots
// =============================================================================

/// A single price level. A quantity of zero in an incremental update removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    #[must_use]
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Notional value of the level (price × quantity).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// One side's top of book on one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePrice {
    pub exchange: ExchangeId,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Best bid and best ask for a symbol across all fresh books.
///
/// The two sides are optimized independently and usually come from
/// different exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPrices {
    pub symbol: Symbol,
    pub best_bid: ExchangePrice,
    pub best_ask: ExchangePrice,
}

impl BestPrices {
    /// Returns true when the best bid is strictly above the best ask.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        self.best_bid.price > self.best_ask.price
    }

    /// Returns true when both sides come from the same exchange.
    #[must_use]
    pub fn same_exchange(&self) -> bool {
        self.best_bid.exchange == self.best_ask.exchange
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// 24h ticker snapshot emitted by a feed adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    /// Base-asset volume over the last 24 hours.
    pub volume_24h: Decimal,
    /// Quote-asset volume over the last 24 hours, when the exchange reports it.
    pub quote_volume_24h: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// 24h volume in quote units, estimated from base volume when the
    /// exchange does not report quote turnover.
    #[must_use]
    pub fn quote_volume(&self) -> Decimal {
        self.quote_volume_24h
            .unwrap_or(self.volume_24h * self.last_price)
    }
}
