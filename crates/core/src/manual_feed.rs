//! A feed adapter driven by direct method calls instead of a socket.
//!
//! Available under the `test-util` feature for exercising the aggregator and
//! detector without a network. It follows the same single-writer discipline
//! as the WebSocket adapters: only this adapter mutates its books, and the
//! registered callbacks fire after each mutation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::feed::{
    BookUpdateCallback, FeedAdapter, FeedError, FeedState, FeedStats, FeedStatsSnapshot,
    TickerCallback,
};
use crate::orderbook::{OrderBook, SharedOrderBook};
use crate::symbol::Symbol;
use crate::types::{ExchangeId, PriceLevel, Ticker};

pub struct ManualFeed {
    exchange: ExchangeId,
    connected: AtomicBool,
    symbols: RwLock<HashSet<Symbol>>,
    books: RwLock<HashMap<Symbol, SharedOrderBook>>,
    book_callback: RwLock<Option<BookUpdateCallback>>,
    ticker_callback: RwLock<Option<TickerCallback>>,
    stats: FeedStats,
}

impl ManualFeed {
    #[must_use]
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            connected: AtomicBool::new(false),
            symbols: RwLock::new(HashSet::new()),
            books: RwLock::new(HashMap::new()),
            book_callback: RwLock::new(None),
            ticker_callback: RwLock::new(None),
            stats: FeedStats::default(),
        }
    }

    /// Replaces the book for `symbol` wholesale, creating it if needed.
    pub fn push_snapshot(&self, symbol: &Symbol, bids: &[PriceLevel], asks: &[PriceLevel]) {
        let book = self.book_for(symbol);
        {
            let mut guard = book.write();
            let sequence = guard.sequence() + 1;
            guard.replace(bids, asks, sequence);
        }
        self.notify_book(symbol, &book);
    }

    /// Applies a delta to an existing book. Deltas for unknown symbols are dropped.
    pub fn push_delta(&self, symbol: &Symbol, bids: &[PriceLevel], asks: &[PriceLevel]) {
        let Some(book) = self.books.read().get(symbol).cloned() else {
            tracing::debug!(exchange = %self.exchange, symbol = %symbol, "Delta before snapshot dropped");
            return;
        };
        {
            let mut guard = book.write();
            let sequence = guard.sequence() + 1;
            guard.apply_delta(bids, asks, sequence);
        }
        self.notify_book(symbol, &book);
    }

    pub fn push_ticker(&self, ticker: &Ticker) {
        self.stats.record_ticker();
        let callback = self.ticker_callback.read().clone();
        if let Some(callback) = callback {
            callback(ticker);
        }
    }

    /// Symbols currently subscribed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.symbols.read().iter().cloned().collect();
        symbols.sort();
        symbols
    }

    fn book_for(&self, symbol: &Symbol) -> SharedOrderBook {
        if let Some(book) = self.books.read().get(symbol) {
            return book.clone();
        }
        self.books
            .write()
            .entry(symbol.clone())
            .or_insert_with(|| OrderBook::new(self.exchange, symbol.clone()).into_shared())
            .clone()
    }

    fn notify_book(&self, symbol: &Symbol, book: &SharedOrderBook) {
        self.stats.record_message();
        self.stats.record_book_update();
        // Clone out of the lock so a callback may re-register listeners.
        let callback = self.book_callback.read().clone();
        if let Some(callback) = callback {
            callback(self.exchange, symbol, book);
        }
    }
}

#[async_trait]
impl FeedAdapter for ManualFeed {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), FeedError> {
        self.symbols.write().extend(symbols.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), FeedError> {
        let mut subscribed = self.symbols.write();
        for symbol in symbols {
            subscribed.remove(symbol);
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FeedError> {
        if !self.is_connected() {
            return Err(FeedError::NotConnected);
        }
        self.stats.record_reconnect();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> FeedState {
        if self.is_connected() {
            FeedState::Connected
        } else {
            FeedState::Disconnected
        }
    }

    fn get_order_book(&self, symbol: &Symbol) -> Option<SharedOrderBook> {
        self.books.read().get(symbol).cloned()
    }

    fn on_order_book_update(&self, callback: BookUpdateCallback) {
        *self.book_callback.write() = Some(callback);
    }

    fn on_ticker(&self, callback: TickerCallback) {
        *self.ticker_callback.write() = Some(callback);
    }

    fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn btc() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    #[test]
    fn test_snapshot_creates_book_and_fires_callback() {
        let feed = ManualFeed::new(ExchangeId::Bybit);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        feed.on_order_book_update(Arc::new(move |exchange, symbol, book| {
            assert_eq!(exchange, ExchangeId::Bybit);
            assert_eq!(symbol, &Symbol::new("BTC", "USDT"));
            assert!(book.read().best_bid().is_some());
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        feed.push_snapshot(
            &btc(),
            &[PriceLevel::new(dec!(100), dec!(1))],
            &[PriceLevel::new(dec!(101), dec!(1))],
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let book = feed.get_order_book(&btc()).unwrap();
        assert_eq!(book.read().sequence(), 1);
        assert_eq!(feed.stats().book_updates, 1);
    }

    #[test]
    fn test_delta_without_snapshot_is_dropped() {
        let feed = ManualFeed::new(ExchangeId::Okx);
        feed.push_delta(&btc(), &[PriceLevel::new(dec!(100), dec!(1))], &[]);
        assert!(feed.get_order_book(&btc()).is_none());
    }

    #[tokio::test]
    async fn test_subscription_set() {
        let feed = ManualFeed::new(ExchangeId::Binance);
        feed.subscribe(&[btc(), Symbol::new("ETH", "USDT")])
            .await
            .unwrap();
        feed.unsubscribe(&[btc()]).await.unwrap();
        assert_eq!(feed.subscriptions(), vec![Symbol::new("ETH", "USDT")]);

        assert!(matches!(feed.reconnect().await, Err(FeedError::NotConnected)));
        feed.connect().await.unwrap();
        assert_eq!(feed.state(), FeedState::Connected);
        feed.reconnect().await.unwrap();
        assert_eq!(feed.stats().reconnects, 1);
    }
}
