//! Trading and withdrawal fee table.
//!
//! Trading fees are percentages of notional (`0.1` means 0.1%). Withdrawal
//! fees are absolute amounts of the withdrawn currency. The table is shared
//! by reference with the profit calculator and updated at runtime by
//! configuration reloads; readers always see a whole snapshot taken under a
//! single lock acquisition.

use cryptoarb_core::{ExchangeId, FeeOverrides};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

// =============================================================================
// Fee Constants
// =============================================================================

/// Default spot taker fee on every supported exchange (0.1%).
pub const DEFAULT_TRADING_FEE_PERCENT: Decimal = dec!(0.1);

/// Trading fee assumed for an exchange missing from the table (0.2%).
pub const UNKNOWN_EXCHANGE_FEE_PERCENT: Decimal = dec!(0.2);

/// Built-in withdrawal fees: (exchange, currency, amount).
const DEFAULT_WITHDRAWAL_FEES: &[(ExchangeId, &str, Decimal)] = &[
    (ExchangeId::Binance, "BTC", dec!(0.0002)),
    (ExchangeId::Binance, "ETH", dec!(0.0015)),
    (ExchangeId::Binance, "USDT", dec!(1)),
    (ExchangeId::Binance, "SOL", dec!(0.01)),
    (ExchangeId::Binance, "XRP", dec!(0.25)),
    (ExchangeId::Binance, "BNB", dec!(0.0005)),
    (ExchangeId::Bybit, "BTC", dec!(0.0002)),
    (ExchangeId::Bybit, "ETH", dec!(0.0015)),
    (ExchangeId::Bybit, "USDT", dec!(1)),
    (ExchangeId::Bybit, "SOL", dec!(0.01)),
    (ExchangeId::Bybit, "XRP", dec!(0.2)),
    (ExchangeId::Okx, "BTC", dec!(0.0001)),
    (ExchangeId::Okx, "ETH", dec!(0.0012)),
    (ExchangeId::Okx, "USDT", dec!(1)),
    (ExchangeId::Okx, "SOL", dec!(0.008)),
    (ExchangeId::Okx, "XRP", dec!(0.2)),
];

// =============================================================================
// Fee Table
// =============================================================================

#[derive(Debug, Clone, Default)]
struct FeeSchedule {
    trading: HashMap<ExchangeId, Decimal>,
    withdrawal: HashMap<(ExchangeId, String), Decimal>,
}

/// Fees for one buy/sell pair, read atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub buy_fee_percent: Decimal,
    pub sell_fee_percent: Decimal,
    /// Withdrawal fee on the buy exchange in units of the base currency;
    /// zero when unknown.
    pub withdrawal_fee: Decimal,
}

/// Shared-read, exclusive-write fee table.
#[derive(Debug, Default)]
pub struct FeeTable {
    schedule: RwLock<FeeSchedule>,
}

impl FeeTable {
    /// Creates a table with the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        let mut schedule = FeeSchedule::default();
        for exchange in ExchangeId::ALL {
            schedule
                .trading
                .insert(exchange, DEFAULT_TRADING_FEE_PERCENT);
        }
        for (exchange, currency, fee) in DEFAULT_WITHDRAWAL_FEES {
            schedule
                .withdrawal
                .insert((*exchange, (*currency).to_string()), *fee);
        }
        Self {
            schedule: RwLock::new(schedule),
        }
    }

    /// Creates a table with no entries; every lookup falls back.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a default table with configuration overrides applied.
    #[must_use]
    pub fn with_overrides(overrides: &FeeOverrides) -> Self {
        let table = Self::new();
        table.apply_overrides(overrides);
        table
    }

    /// Trading fee percent for `exchange`.
    #[must_use]
    pub fn trading_fee(&self, exchange: ExchangeId) -> Decimal {
        self.schedule
            .read()
            .trading
            .get(&exchange)
            .copied()
            .unwrap_or(UNKNOWN_EXCHANGE_FEE_PERCENT)
    }

    /// Withdrawal fee for `currency` on `exchange`, if known.
    #[must_use]
    pub fn withdrawal_fee(&self, exchange: ExchangeId, currency: &str) -> Option<Decimal> {
        self.schedule
            .read()
            .withdrawal
            .get(&(exchange, currency.to_ascii_uppercase()))
            .copied()
    }

    /// Reads both trading fees and the buy-side withdrawal fee under one lock.
    #[must_use]
    pub fn quote(&self, buy: ExchangeId, sell: ExchangeId, base_currency: &str) -> FeeQuote {
        let schedule = self.schedule.read();
        let trading = |exchange| {
            schedule
                .trading
                .get(&exchange)
                .copied()
                .unwrap_or(UNKNOWN_EXCHANGE_FEE_PERCENT)
        };
        FeeQuote {
            buy_fee_percent: trading(buy),
            sell_fee_percent: trading(sell),
            withdrawal_fee: schedule
                .withdrawal
                .get(&(buy, base_currency.to_ascii_uppercase()))
                .copied()
                .unwrap_or(Decimal::ZERO),
        }
    }

    pub fn update_trading_fee(&self, exchange: ExchangeId, fee_percent: Decimal) {
        self.schedule.write().trading.insert(exchange, fee_percent);
        info!(exchange = %exchange, fee_percent = %fee_percent, "Trading fee updated");
    }

    pub fn update_withdrawal_fee(&self, exchange: ExchangeId, currency: &str, fee: Decimal) {
        let currency = currency.to_ascii_uppercase();
        info!(exchange = %exchange, currency = %currency, fee = %fee, "Withdrawal fee updated");
        self.schedule
            .write()
            .withdrawal
            .insert((exchange, currency), fee);
    }

    /// Applies every override in one write so readers never see half of a reload.
    pub fn apply_overrides(&self, overrides: &FeeOverrides) {
        let trading = overrides.trading_fees();
        let mut schedule = self.schedule.write();
        for (exchange, fee) in &trading {
            schedule.trading.insert(*exchange, *fee);
        }
        for entry in &overrides.withdrawal {
            schedule
                .withdrawal
                .insert((entry.exchange, entry.currency.to_ascii_uppercase()), entry.fee);
        }
        drop(schedule);
        info!(
            trading = trading.len(),
            withdrawal = overrides.withdrawal.len(),
            "Fee overrides applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptoarb_core::WithdrawalFeeOverride;
    use std::sync::Arc;

    // ==================== Lookup Tests ====================

    #[test]
    fn test_defaults() {
        let table = FeeTable::new();
        for exchange in ExchangeId::ALL {
            assert_eq!(table.trading_fee(exchange), dec!(0.1));
        }
        assert_eq!(
            table.withdrawal_fee(ExchangeId::Binance, "btc"),
            Some(dec!(0.0002))
        );
        assert_eq!(table.withdrawal_fee(ExchangeId::Okx, "PEPE"), None);
    }

    #[test]
    fn test_unknown_exchange_fallback() {
        let table = FeeTable::empty();
        assert_eq!(table.trading_fee(ExchangeId::Bybit), dec!(0.2));
        let quote = table.quote(ExchangeId::Bybit, ExchangeId::Okx, "BTC");
        assert_eq!(quote.buy_fee_percent, dec!(0.2));
        assert_eq!(quote.withdrawal_fee, Decimal::ZERO);
    }

    // ==================== Update Tests ====================

    #[test]
    fn test_updates() {
        let table = FeeTable::new();
        table.update_trading_fee(ExchangeId::Okx, dec!(0.08));
        table.update_withdrawal_fee(ExchangeId::Okx, "eth", dec!(0.001));

        let quote = table.quote(ExchangeId::Okx, ExchangeId::Binance, "ETH");
        assert_eq!(quote.buy_fee_percent, dec!(0.08));
        assert_eq!(quote.sell_fee_percent, dec!(0.1));
        assert_eq!(quote.withdrawal_fee, dec!(0.001));
    }

    #[test]
    fn test_apply_overrides() {
        let mut overrides = FeeOverrides::default();
        overrides.trading.insert("bybit".to_string(), dec!(0.055));
        overrides.withdrawal.push(WithdrawalFeeOverride {
            exchange: ExchangeId::Binance,
            currency: "sol".to_string(),
            fee: dec!(0.02),
        });

        let table = FeeTable::with_overrides(&overrides);
        assert_eq!(table.trading_fee(ExchangeId::Bybit), dec!(0.055));
        assert_eq!(table.trading_fee(ExchangeId::Binance), dec!(0.1));
        assert_eq!(
            table.withdrawal_fee(ExchangeId::Binance, "SOL"),
            Some(dec!(0.02))
        );
    }

    #[test]
    fn test_quotes_never_torn_under_concurrent_updates() {
        // The writer always sets both exchanges to the same value in one
        // override batch, so a consistent reader sees equal buy and sell fees.
        let table = Arc::new(FeeTable::new());
        let writer = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for i in 0..2_000u32 {
                    let fee = Decimal::from(i % 7) / dec!(100);
                    let mut overrides = FeeOverrides::default();
                    overrides.trading.insert("binance".to_string(), fee);
                    overrides.trading.insert("okx".to_string(), fee);
                    table.apply_overrides(&overrides);
                }
            })
        };

        for _ in 0..2_000 {
            let quote = table.quote(ExchangeId::Binance, ExchangeId::Okx, "BTC");
            assert_eq!(quote.buy_fee_percent, quote.sell_fee_percent);
        }
        writer.join().unwrap();
    }
}
