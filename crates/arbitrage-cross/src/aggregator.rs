//! Cross-exchange view of order books and tickers.
//!
//! # Architecture
//!
//! ```text
//!  BinanceFeed ─┐                                 ┌─> get_best_prices
//!  BybitFeed   ─┼─ on_order_book_update ─> registry ─┼─> get_all_order_books
//!  OkxFeed     ─┘   on_ticker  ─────────> tickers  └─> update listener (detector)
//! ```
//!
//! Adapters own and mutate their books. The aggregator keeps a handle to each
//! book, takes read locks only, and notifies one listener per update without
//! waiting on it.

use cryptoarb_core::{
    AggregatorConfig, BestPrices, ExchangeId, ExchangePrice, FeedAdapter, OrderBook,
    SharedOrderBook, Side, Symbol, Ticker,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default staleness threshold for books used in pricing.
pub const DEFAULT_MAX_BOOK_AGE: Duration = Duration::from_secs(5);

/// Listener invoked after any book for `symbol` changes on `exchange`.
pub type UpdateListener = Arc<dyn Fn(&Symbol, ExchangeId) + Send + Sync>;

pub struct OrderBookAggregator {
    adapters: RwLock<BTreeMap<ExchangeId, Arc<dyn FeedAdapter>>>,
    books: RwLock<HashMap<(ExchangeId, Symbol), SharedOrderBook>>,
    tickers: RwLock<HashMap<(ExchangeId, Symbol), Ticker>>,
    listener: RwLock<Option<UpdateListener>>,
    max_book_age: Duration,
}

impl std::fmt::Debug for OrderBookAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookAggregator")
            .field("exchanges", &self.exchanges())
            .field("books", &self.books.read().len())
            .field("max_book_age", &self.max_book_age)
            .finish()
    }
}

impl Default for OrderBookAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BOOK_AGE)
    }
}

impl OrderBookAggregator {
    #[must_use]
    pub fn new(max_book_age: Duration) -> Self {
        Self {
            adapters: RwLock::new(BTreeMap::new()),
            books: RwLock::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
            max_book_age,
        }
    }

    #[must_use]
    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(config.max_book_age())
    }

    #[must_use]
    pub fn max_book_age(&self) -> Duration {
        self.max_book_age
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers an adapter and wires its book and ticker callbacks into the
    /// aggregator. Re-registering an exchange replaces the previous adapter.
    pub fn register(self: &Arc<Self>, adapter: Arc<dyn FeedAdapter>) {
        let exchange = adapter.exchange();

        let weak: Weak<Self> = Arc::downgrade(self);
        adapter.on_order_book_update(Arc::new(move |exchange, symbol, book| {
            if let Some(aggregator) = weak.upgrade() {
                aggregator.handle_book_update(exchange, symbol, book);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        adapter.on_ticker(Arc::new(move |ticker| {
            if let Some(aggregator) = weak.upgrade() {
                aggregator.handle_ticker(ticker);
            }
        }));

        if self.adapters.write().insert(exchange, adapter).is_some() {
            warn!(exchange = %exchange, "Adapter replaced");
        } else {
            info!(exchange = %exchange, "Adapter registered");
        }
    }

    /// Registered exchanges in stable order.
    #[must_use]
    pub fn exchanges(&self) -> Vec<ExchangeId> {
        self.adapters.read().keys().copied().collect()
    }

    #[must_use]
    pub fn adapter(&self, exchange: ExchangeId) -> Option<Arc<dyn FeedAdapter>> {
        self.adapters.read().get(&exchange).cloned()
    }

    #[must_use]
    pub fn adapters(&self) -> Vec<Arc<dyn FeedAdapter>> {
        self.adapters.read().values().cloned().collect()
    }

    /// Registers the update listener, replacing any previous one.
    pub fn on_update(&self, listener: UpdateListener) {
        *self.listener.write() = Some(listener);
    }

    /// Subscribes every adapter to `symbols` and connects it. A failing
    /// exchange is logged and skipped; returns the exchanges that connected.
    pub async fn connect_all(&self, symbols: &[Symbol]) -> Vec<ExchangeId> {
        let mut connected = Vec::new();
        for adapter in self.adapters() {
            let exchange = adapter.exchange();
            if let Err(e) = adapter.subscribe(symbols).await {
                warn!(exchange = %exchange, error = %e, "Subscribe failed");
                continue;
            }
            match adapter.connect().await {
                Ok(()) => connected.push(exchange),
                Err(e) => warn!(exchange = %exchange, error = %e, "Connect failed"),
            }
        }
        connected
    }

    pub async fn disconnect_all(&self) {
        for adapter in self.adapters() {
            adapter.disconnect().await;
        }
    }

    // =========================================================================
    // Update Handling
    // =========================================================================

    fn handle_book_update(&self, exchange: ExchangeId, symbol: &Symbol, book: &SharedOrderBook) {
        let key = (exchange, symbol.clone());
        let known = self
            .books
            .read()
            .get(&key)
            .is_some_and(|existing| Arc::ptr_eq(existing, book));
        if !known {
            debug!(exchange = %exchange, symbol = %symbol, "Tracking order book");
            self.books.write().insert(key, Arc::clone(book));
        }

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(symbol, exchange);
        }
    }

    fn handle_ticker(&self, ticker: &Ticker) {
        self.tickers
            .write()
            .insert((ticker.exchange, ticker.symbol.clone()), ticker.clone());
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn shared_book(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<SharedOrderBook> {
        if let Some(book) = self.books.read().get(&(exchange, symbol.clone())) {
            return Some(Arc::clone(book));
        }
        self.adapter(exchange)?.get_order_book(symbol)
    }

    /// Fresh books for `symbol`, one per exchange in exchange order.
    fn fresh_books(&self, symbol: &Symbol) -> Vec<(ExchangeId, SharedOrderBook)> {
        ExchangeId::ALL
            .into_iter()
            .filter_map(|exchange| {
                let book = self.shared_book(exchange, symbol)?;
                let fresh = !book.read().is_stale(self.max_book_age);
                fresh.then_some((exchange, book))
            })
            .collect()
    }

    /// Copy of one exchange's book regardless of staleness.
    #[must_use]
    pub fn get_order_book(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<OrderBook> {
        self.shared_book(exchange, symbol)
            .map(|book| book.read().clone())
    }

    /// Copies of every fresh book for `symbol`.
    #[must_use]
    pub fn get_all_order_books(&self, symbol: &Symbol) -> Vec<OrderBook> {
        self.fresh_books(symbol)
            .into_iter()
            .map(|(_, book)| book.read().clone())
            .collect()
    }

    /// Highest bid and lowest ask across fresh books, chosen independently.
    ///
    /// Ties keep the earlier exchange in [`ExchangeId::ALL`] order. Returns
    /// `None` unless both sides have at least one level somewhere.
    #[must_use]
    pub fn get_best_prices(&self, symbol: &Symbol) -> Option<BestPrices> {
        let mut best_bid: Option<ExchangePrice> = None;
        let mut best_ask: Option<ExchangePrice> = None;

        for (exchange, book) in self.fresh_books(symbol) {
            let (bid, ask) = {
                let guard = book.read();
                (guard.best_bid(), guard.best_ask())
            };

            if let Some(bid) = bid {
                if best_bid.as_ref().map_or(true, |best| bid.price > best.price) {
                    best_bid = Some(ExchangePrice {
                        exchange,
                        price: bid.price,
                        quantity: bid.quantity,
                    });
                }
            }
            if let Some(ask) = ask {
                if best_ask.as_ref().map_or(true, |best| ask.price < best.price) {
                    best_ask = Some(ExchangePrice {
                        exchange,
                        price: ask.price,
                        quantity: ask.quantity,
                    });
                }
            }
        }

        Some(BestPrices {
            symbol: symbol.clone(),
            best_bid: best_bid?,
            best_ask: best_ask?,
        })
    }

    /// Quote-unit notional within the top `max_levels` of the side a `side`
    /// trade consumes, per fresh exchange.
    #[must_use]
    pub fn get_liquidity(
        &self,
        symbol: &Symbol,
        side: Side,
        max_levels: usize,
    ) -> BTreeMap<ExchangeId, Decimal> {
        self.fresh_books(symbol)
            .into_iter()
            .map(|(exchange, book)| (exchange, book.read().depth(side, max_levels)))
            .collect()
    }

    #[must_use]
    pub fn get_ticker(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Ticker> {
        self.tickers.read().get(&(exchange, symbol.clone())).cloned()
    }

    /// Smallest 24h quote volume among `exchanges`, or `None` when any of
    /// them has not reported a ticker.
    #[must_use]
    pub fn volume_24h(&self, symbol: &Symbol, exchanges: &[ExchangeId]) -> Option<Decimal> {
        let tickers = self.tickers.read();
        exchanges
            .iter()
            .map(|exchange| {
                tickers
                    .get(&(*exchange, symbol.clone()))
                    .map(Ticker::quote_volume)
            })
            .try_fold(None::<Decimal>, |min, volume| {
                let volume = volume?;
                Some(Some(min.map_or(volume, |m| m.min(volume))))
            })
            .flatten()
    }

    /// Symbols with at least one tracked book.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .books
            .read()
            .keys()
            .map(|(_, symbol)| symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cryptoarb_core::{ManualFeed, PriceLevel};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn btc() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    fn level(price: Decimal, quantity: Decimal) -> PriceLevel {
        PriceLevel::new(price, quantity)
    }

    fn setup() -> (Arc<OrderBookAggregator>, Arc<ManualFeed>, Arc<ManualFeed>) {
        let aggregator = Arc::new(OrderBookAggregator::default());
        let binance = Arc::new(ManualFeed::new(ExchangeId::Binance));
        let bybit = Arc::new(ManualFeed::new(ExchangeId::Bybit));
        aggregator.register(binance.clone());
        aggregator.register(bybit.clone());
        (aggregator, binance, bybit)
    }

    fn ticker(exchange: ExchangeId, quote_volume: Decimal) -> Ticker {
        Ticker {
            exchange,
            symbol: btc(),
            last_price: dec!(100),
            best_bid: None,
            best_ask: None,
            volume_24h: dec!(1),
            quote_volume_24h: Some(quote_volume),
            timestamp: Utc::now(),
        }
    }

    // ==================== Best Price Tests ====================

    #[tokio::test]
    async fn test_best_prices_optimize_each_side() {
        let (aggregator, binance, bybit) = setup();
        binance.push_snapshot(&btc(), &[level(dec!(100), dec!(1))], &[level(dec!(102), dec!(1))]);
        bybit.push_snapshot(&btc(), &[level(dec!(105), dec!(2))], &[level(dec!(107), dec!(2))]);

        let best = aggregator.get_best_prices(&btc()).unwrap();
        assert_eq!(best.best_bid.exchange, ExchangeId::Bybit);
        assert_eq!(best.best_bid.price, dec!(105));
        assert_eq!(best.best_ask.exchange, ExchangeId::Binance);
        assert_eq!(best.best_ask.price, dec!(102));
        assert!(best.is_crossed());
    }

    #[tokio::test]
    async fn test_best_prices_need_both_sides() {
        let (aggregator, binance, _) = setup();
        assert!(aggregator.get_best_prices(&btc()).is_none());

        binance.push_snapshot(&btc(), &[level(dec!(100), dec!(1))], &[]);
        assert!(aggregator.get_best_prices(&btc()).is_none());
    }

    // ==================== Staleness Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_stale_books_excluded_but_queryable() {
        let (aggregator, binance, bybit) = setup();
        binance.push_snapshot(&btc(), &[level(dec!(100), dec!(1))], &[level(dec!(102), dec!(1))]);
        tokio::time::advance(Duration::from_secs(4)).await;
        bybit.push_snapshot(&btc(), &[level(dec!(105), dec!(2))], &[level(dec!(107), dec!(2))]);
        tokio::time::advance(Duration::from_secs(2)).await;

        // binance is 6s old, bybit 2s
        let books = aggregator.get_all_order_books(&btc());
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].exchange(), ExchangeId::Bybit);

        let best = aggregator.get_best_prices(&btc()).unwrap();
        assert_eq!(best.best_ask.exchange, ExchangeId::Bybit);
        assert!(best.same_exchange());

        assert!(aggregator.get_order_book(ExchangeId::Binance, &btc()).is_some());
    }

    // ==================== Listener Tests ====================

    #[tokio::test]
    async fn test_listener_fires_per_update() {
        let (aggregator, binance, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        aggregator.on_update(Arc::new(move |symbol, exchange| {
            assert_eq!(symbol, &Symbol::new("BTC", "USDT"));
            assert_eq!(exchange, ExchangeId::Binance);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        binance.push_snapshot(&btc(), &[level(dec!(100), dec!(1))], &[level(dec!(101), dec!(1))]);
        binance.push_delta(&btc(), &[level(dec!(100), dec!(0))], &[]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(aggregator.symbols(), vec![btc()]);
    }

    // ==================== Liquidity and Volume Tests ====================

    #[tokio::test]
    async fn test_liquidity_per_exchange() {
        let (aggregator, binance, bybit) = setup();
        binance.push_snapshot(
            &btc(),
            &[level(dec!(100), dec!(1))],
            &[level(dec!(101), dec!(1)), level(dec!(102), dec!(2))],
        );
        bybit.push_snapshot(&btc(), &[level(dec!(99), dec!(3))], &[level(dec!(103), dec!(1))]);

        let buy = aggregator.get_liquidity(&btc(), Side::Buy, 10);
        assert_eq!(buy[&ExchangeId::Binance], dec!(305));
        assert_eq!(buy[&ExchangeId::Bybit], dec!(103));

        let sell = aggregator.get_liquidity(&btc(), Side::Sell, 1);
        assert_eq!(sell[&ExchangeId::Bybit], dec!(297));
    }

    #[tokio::test]
    async fn test_volume_is_min_across_legs() {
        let (aggregator, binance, bybit) = setup();
        binance.push_ticker(&ticker(ExchangeId::Binance, dec!(5000000)));
        assert_eq!(
            aggregator.volume_24h(&btc(), &[ExchangeId::Binance, ExchangeId::Bybit]),
            None
        );

        bybit.push_ticker(&ticker(ExchangeId::Bybit, dec!(800000)));
        assert_eq!(
            aggregator.volume_24h(&btc(), &[ExchangeId::Binance, ExchangeId::Bybit]),
            Some(dec!(800000))
        );
        assert_eq!(
            aggregator.get_ticker(ExchangeId::Binance, &btc()).unwrap().quote_volume(),
            dec!(5000000)
        );
    }

    #[tokio::test]
    async fn test_connect_all_subscribes() {
        let (aggregator, binance, bybit) = setup();
        let connected = aggregator.connect_all(&[btc()]).await;
        assert_eq!(connected, vec![ExchangeId::Binance, ExchangeId::Bybit]);
        assert!(binance.is_connected());
        assert_eq!(bybit.subscriptions(), vec![btc()]);

        aggregator.disconnect_all().await;
        assert!(!binance.is_connected());
    }
}
