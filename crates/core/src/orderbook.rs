//! Per-exchange, per-symbol L2 order book.
//!
//! Bids are kept descending and asks ascending by price, keyed by price so a
//! side can never hold two levels at the same price. A crossed book (best bid
//! at or above best ask) is accepted as raw exchange state.
//!
//! Books are shared as [`SharedOrderBook`]: the owning feed adapter is the
//! only writer, the aggregator and detector take read locks.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::symbol::Symbol;
use crate::types::{ExchangeId, PriceLevel, Side};

/// Order book handle shared between its writer and readers.
pub type SharedOrderBook = Arc<RwLock<OrderBook>>;

/// Reasons a slippage walk cannot produce an estimate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiquidityError {
    /// Notional amount was zero or negative.
    #[error("notional must be positive, got {0}")]
    InvalidNotional(Decimal),

    /// The side being walked has no levels.
    #[error("no {0} liquidity in book")]
    EmptySide(Side),

    /// The full notional could not be filled.
    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity {
        /// Notional that was requested.
        requested: Decimal,
        /// Notional the whole side can absorb.
        available: Decimal,
    },
}

/// Result of walking a book side for a notional amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlippageEstimate {
    pub side: Side,
    /// Quote notional that was filled (always the full requested amount).
    pub notional: Decimal,
    /// Top-of-book price on the walked side.
    pub best_price: Decimal,
    /// Volume-weighted average execution price.
    pub average_price: Decimal,
    /// Last price level touched.
    pub worst_price: Decimal,
    /// Positive means worse than `best_price` for this side.
    pub slippage_percent: Decimal,
    /// Base quantity acquired (buy) or delivered (sell).
    pub filled_quantity: Decimal,
    pub levels_consumed: usize,
}

/// L2 order book for one (exchange, symbol) pair.
#[derive(Debug, Clone)]
pub struct OrderBook {
    exchange: ExchangeId,
    symbol: Symbol,
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    sequence: u64,
    updated_at: Instant,
}

impl OrderBook {
    /// Creates an empty book stamped with the current time.
    #[must_use]
    pub fn new(exchange: ExchangeId, symbol: Symbol) -> Self {
        Self {
            exchange,
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence: 0,
            updated_at: Instant::now(),
        }
    }

    /// Wraps the book for sharing between its writer and readers.
    #[must_use]
    pub fn into_shared(self) -> SharedOrderBook {
        Arc::new(RwLock::new(self))
    }

    #[must_use]
    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Sequence number of the last applied snapshot or delta.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    // -------------------------------------------------------------------------
    // Top of book
    // -------------------------------------------------------------------------

    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next()
            .map(|(price, qty)| PriceLevel::new(price.0, *qty))
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    /// Midpoint of best bid and best ask, zero when either side is empty.
    #[must_use]
    pub fn mid_price(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid.price + ask.price) / Decimal::TWO,
            _ => Decimal::ZERO,
        }
    }

    /// Best ask minus best bid, zero when either side is empty.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price - bid.price,
            _ => Decimal::ZERO,
        }
    }

    /// Spread as a percentage of the mid price, zero when either side is empty.
    #[must_use]
    pub fn spread_percent(&self) -> Decimal {
        let mid = self.mid_price();
        if mid.is_zero() {
            return Decimal::ZERO;
        }
        self.spread() / mid * Decimal::ONE_HUNDRED
    }

    // -------------------------------------------------------------------------
    // Levels
    // -------------------------------------------------------------------------

    /// Bid levels, best first.
    pub fn bids(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.bids
            .iter()
            .map(|(price, qty)| PriceLevel::new(price.0, *qty))
    }

    /// Ask levels, best first.
    pub fn asks(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.asks
            .iter()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    #[must_use]
    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    #[must_use]
    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    #[must_use]
    pub fn has_liquidity(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }

    /// Sum of price × quantity over the first `max_levels` levels of the side a
    /// trade in `side` direction would consume.
    #[must_use]
    pub fn depth(&self, side: Side, max_levels: usize) -> Decimal {
        match side {
            Side::Buy => self.asks().take(max_levels).map(|l| l.notional()).sum(),
            Side::Sell => self.bids().take(max_levels).map(|l| l.notional()).sum(),
        }
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Replaces both sides with a full snapshot.
    ///
    /// Zero-quantity levels are skipped; a repeated price keeps the last quantity.
    pub fn replace(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], sequence: u64) {
        self.bids.clear();
        self.asks.clear();
        for level in bids.iter().filter(|l| l.quantity > Decimal::ZERO) {
            self.bids.insert(Reverse(level.price), level.quantity);
        }
        for level in asks.iter().filter(|l| l.quantity > Decimal::ZERO) {
            self.asks.insert(level.price, level.quantity);
        }
        self.touch(sequence);
    }

    /// Applies incremental updates. A zero (or negative) quantity removes the
    /// level, anything else upserts it.
    pub fn apply_delta(
        &mut self,
        bid_updates: &[PriceLevel],
        ask_updates: &[PriceLevel],
        sequence: u64,
    ) {
        for level in bid_updates {
            if level.quantity <= Decimal::ZERO {
                self.bids.remove(&Reverse(level.price));
            } else {
                self.bids.insert(Reverse(level.price), level.quantity);
            }
        }
        for level in ask_updates {
            if level.quantity <= Decimal::ZERO {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.quantity);
            }
        }
        self.touch(sequence);
    }

    fn touch(&mut self, sequence: u64) {
        self.sequence = sequence;
        self.updated_at = Instant::now();
    }

    // -------------------------------------------------------------------------
    // Freshness
    // -------------------------------------------------------------------------

    /// Time since the last snapshot or delta.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }

    /// True when the last update is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    // -------------------------------------------------------------------------
    // Slippage
    // -------------------------------------------------------------------------

    /// Walks the side consumed by a `side` trade, from best to worst, until
    /// `notional` quote units are filled.
    ///
    /// The last touched level is pro-rated by remaining notional ÷ level price.
    ///
    /// # Errors
    /// Returns [`LiquidityError::InsufficientLiquidity`] when the side cannot
    /// absorb the full notional; a partial fill is never reported as success.
    pub fn calculate_slippage(
        &self,
        side: Side,
        notional: Decimal,
    ) -> Result<SlippageEstimate, LiquidityError> {
        if notional <= Decimal::ZERO {
            return Err(LiquidityError::InvalidNotional(notional));
        }

        let levels: Vec<PriceLevel> = match side {
            Side::Buy => self.asks().collect(),
            Side::Sell => self.bids().collect(),
        };
        let best_price = levels
            .first()
            .map(|l| l.price)
            .ok_or(LiquidityError::EmptySide(side))?;

        let mut remaining = notional;
        let mut filled_quantity = Decimal::ZERO;
        let mut worst_price = best_price;
        let mut levels_consumed = 0;

        for level in &levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            if level.price <= Decimal::ZERO {
                continue;
            }
            levels_consumed += 1;
            worst_price = level.price;

            let level_notional = level.notional();
            if level_notional >= remaining {
                filled_quantity += remaining / level.price;
                remaining = Decimal::ZERO;
            } else {
                filled_quantity += level.quantity;
                remaining -= level_notional;
            }
        }

        if remaining > Decimal::ZERO || filled_quantity.is_zero() {
            return Err(LiquidityError::InsufficientLiquidity {
                requested: notional,
                available: notional - remaining,
            });
        }

        let average_price = notional / filled_quantity;
        let slippage_percent = match side {
            Side::Buy => (average_price - best_price) / best_price * Decimal::ONE_HUNDRED,
            Side::Sell => (best_price - average_price) / best_price * Decimal::ONE_HUNDRED,
        };

        Ok(SlippageEstimate {
            side,
            notional,
            best_price,
            average_price,
            worst_price,
            slippage_percent,
            filled_quantity,
            levels_consumed,
        })
    }
}
