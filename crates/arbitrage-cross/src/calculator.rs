//! Gross and net profit of a two-leg cross-exchange trade.
//!
//! # Formula
//!
//! ```text
//! gross%       = (sell − buy) / buy × 100
//! withdrawal%  = withdrawal_fee × buy / reference_notional × 100
//! net%         = gross% − (buy_fee% + sell_fee% + withdrawal%) − |buy_slip%| − |sell_slip%|
//! ```
//!
//! The withdrawal fee is expressed against a fixed reference notional
//! ($1000 by default) rather than the recommended size, so it is an
//! approximation whenever the recommended size differs from the reference.
//!
//! # Sizing
//!
//! The recommended amount is capped by liquidity (0.1% of 24h quote
//! volume, at most $5000) and by confidence tier:
//!
//! | Net profit   | Cap     |
//! |--------------|---------|
//! | ≥ 2%         | $5000   |
//! | 1% – 2%      | $2000   |
//! | 0.5% – 1%    | $1000   |
//! | < 0.5%       | $500    |
//!
//! A liquidity cap below $100, or a non-positive net profit, yields zero.

use cryptoarb_core::{ExchangeId, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use thiserror::Error;

use crate::fees::FeeTable;
use crate::types::ArbitrageCalculation;

// =============================================================================
// Sizing Constants
// =============================================================================

/// Notional the withdrawal fee is expressed against.
pub const DEFAULT_REFERENCE_NOTIONAL: Decimal = dec!(1000);

/// Largest recommended trade in quote units.
pub const MAX_TRADE_AMOUNT: Decimal = dec!(5000);

/// Smallest trade worth recommending.
pub const MIN_TRADE_AMOUNT: Decimal = dec!(100);

/// Share of 24h volume a single trade may take (0.1%).
pub const VOLUME_SHARE: Decimal = dec!(0.001);

const HUNDRED: Decimal = dec!(100);

/// Errors from profit calculation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("price must be positive: buy {buy}, sell {sell}")]
    NonPositivePrice { buy: Decimal, sell: Decimal },

    #[error("no arbitrage: buy {buy} >= sell {sell}")]
    NoSpread { buy: Decimal, sell: Decimal },
}

/// Stateless calculator over an injected fee table.
#[derive(Debug, Clone)]
pub struct ProfitCalculator {
    fees: Arc<FeeTable>,
    reference_notional: Decimal,
}

impl ProfitCalculator {
    #[must_use]
    pub fn new(fees: Arc<FeeTable>) -> Self {
        Self {
            fees,
            reference_notional: DEFAULT_REFERENCE_NOTIONAL,
        }
    }

    /// Overrides the notional the withdrawal fee is expressed against.
    #[must_use]
    pub fn with_reference_notional(mut self, notional: Decimal) -> Self {
        if notional > Decimal::ZERO {
            self.reference_notional = notional;
        }
        self
    }

    #[must_use]
    pub fn fees(&self) -> &Arc<FeeTable> {
        &self.fees
    }

    #[must_use]
    pub fn reference_notional(&self) -> Decimal {
        self.reference_notional
    }

    /// Computes profitability before slippage.
    ///
    /// # Errors
    /// Fails when either price is non-positive or `buy_price >= sell_price`.
    pub fn calculate(
        &self,
        pair: &Symbol,
        buy_exchange: ExchangeId,
        buy_price: Decimal,
        sell_exchange: ExchangeId,
        sell_price: Decimal,
        volume_24h: Decimal,
    ) -> Result<ArbitrageCalculation, CalculationError> {
        if buy_price <= Decimal::ZERO || sell_price <= Decimal::ZERO {
            return Err(CalculationError::NonPositivePrice {
                buy: buy_price,
                sell: sell_price,
            });
        }
        if buy_price >= sell_price {
            return Err(CalculationError::NoSpread {
                buy: buy_price,
                sell: sell_price,
            });
        }

        let quote = self.fees.quote(buy_exchange, sell_exchange, pair.base());

        let gross_profit_percent = (sell_price - buy_price) / buy_price * HUNDRED;
        let withdrawal_fee_percent =
            quote.withdrawal_fee * buy_price / self.reference_notional * HUNDRED;
        let total_fees_percent =
            quote.buy_fee_percent + quote.sell_fee_percent + withdrawal_fee_percent;
        let net_profit_percent = gross_profit_percent - total_fees_percent;

        let mid = (buy_price + sell_price) / dec!(2);
        let spread_percent = (sell_price - buy_price) / mid * HUNDRED;

        let recommended_amount = recommended_amount(net_profit_percent, volume_24h);

        Ok(ArbitrageCalculation {
            pair: pair.clone(),
            buy_exchange,
            sell_exchange,
            buy_price,
            sell_price,
            volume_24h,
            gross_profit_percent,
            buy_fee_percent: quote.buy_fee_percent,
            sell_fee_percent: quote.sell_fee_percent,
            withdrawal_fee_percent,
            total_fees_percent,
            slippage_percent: Decimal::ZERO,
            net_profit_percent,
            recommended_amount,
            net_profit_usd: recommended_amount * net_profit_percent / HUNDRED,
            spread_percent,
        })
    }

    /// Computes profitability net of both legs' estimated slippage.
    ///
    /// # Errors
    /// Same as [`Self::calculate`].
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_with_slippage(
        &self,
        pair: &Symbol,
        buy_exchange: ExchangeId,
        buy_price: Decimal,
        sell_exchange: ExchangeId,
        sell_price: Decimal,
        volume_24h: Decimal,
        buy_slippage_percent: Decimal,
        sell_slippage_percent: Decimal,
    ) -> Result<ArbitrageCalculation, CalculationError> {
        let mut calc = self.calculate(
            pair,
            buy_exchange,
            buy_price,
            sell_exchange,
            sell_price,
            volume_24h,
        )?;

        let slippage = buy_slippage_percent.abs() + sell_slippage_percent.abs();
        calc.slippage_percent = slippage;
        calc.net_profit_percent -= slippage;
        calc.recommended_amount = recommended_amount(calc.net_profit_percent, volume_24h);
        calc.net_profit_usd = calc.recommended_amount * calc.net_profit_percent / HUNDRED;
        Ok(calc)
    }
}

/// Trade size for a given net profit and 24h quote volume.
#[must_use]
pub fn recommended_amount(net_profit_percent: Decimal, volume_24h: Decimal) -> Decimal {
    if net_profit_percent <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let ceiling = (volume_24h * VOLUME_SHARE).min(MAX_TRADE_AMOUNT);
    if ceiling < MIN_TRADE_AMOUNT {
        return Decimal::ZERO;
    }

    let tier_cap = if net_profit_percent >= dec!(2) {
        MAX_TRADE_AMOUNT
    } else if net_profit_percent >= dec!(1) {
        dec!(2000)
    } else if net_profit_percent >= dec!(0.5) {
        dec!(1000)
    } else {
        dec!(500)
    };

    ceiling.min(tier_cap)
}
