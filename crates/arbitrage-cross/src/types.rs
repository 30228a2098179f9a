//! Value types produced by the profit calculator and the detector.

use chrono::{DateTime, Duration, Utc};
use cryptoarb_core::{ExchangeId, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Arbitrage Calculation
// =============================================================================

/// Profitability of buying on one exchange and selling on another.
///
/// All percentages are expressed in percent units (`0.5` means 0.5%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrageCalculation {
    pub pair: Symbol,
    pub buy_exchange: ExchangeId,
    pub sell_exchange: ExchangeId,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    /// 24h quote volume the trade size was derived from.
    pub volume_24h: Decimal,
    /// (sell − buy) / buy × 100.
    pub gross_profit_percent: Decimal,
    pub buy_fee_percent: Decimal,
    pub sell_fee_percent: Decimal,
    /// Buy-side withdrawal fee as a percent of the reference notional.
    pub withdrawal_fee_percent: Decimal,
    pub total_fees_percent: Decimal,
    /// Combined absolute slippage of both legs; zero when not estimated.
    pub slippage_percent: Decimal,
    pub net_profit_percent: Decimal,
    /// Suggested size in quote units; zero means do not trade.
    pub recommended_amount: Decimal,
    /// Expected profit on `recommended_amount`.
    pub net_profit_usd: Decimal,
    /// (sell − buy) relative to the midpoint of the two prices.
    pub spread_percent: Decimal,
}

impl ArbitrageCalculation {
    #[must_use]
    pub fn is_profitable(&self) -> bool {
        self.net_profit_percent > Decimal::ZERO
    }
}

// =============================================================================
// Arbitrage Opportunity
// =============================================================================

/// An accepted, deduplicated opportunity handed to persistence and notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    /// Content hash of pair, exchanges and detection bucket.
    pub external_id: String,
    #[serde(flatten)]
    pub calculation: ArbitrageCalculation,
    pub buy_slippage_percent: Decimal,
    pub sell_slippage_percent: Decimal,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub notified: bool,
}

impl ArbitrageOpportunity {
    #[must_use]
    pub fn new(
        external_id: String,
        calculation: ArbitrageCalculation,
        buy_slippage_percent: Decimal,
        sell_slippage_percent: Decimal,
        detected_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            external_id,
            calculation,
            buy_slippage_percent,
            sell_slippage_percent,
            detected_at,
            expires_at: detected_at + ttl,
            notified: false,
        }
    }

    #[must_use]
    pub fn pair(&self) -> &Symbol {
        &self.calculation.pair
    }

    #[must_use]
    pub fn net_profit_percent(&self) -> Decimal {
        self.calculation.net_profit_percent
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn mark_notified(&mut self) {
        self.notified = true;
    }
}

impl std::fmt::Display for ArbitrageOpportunity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.calculation;
        write!(
            f,
            "{} buy {}@{} sell {}@{} net {:.3}% size ${}",
            c.pair,
            c.buy_exchange,
            c.buy_price,
            c.sell_exchange,
            c.sell_price,
            c.net_profit_percent,
            c.recommended_amount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_calculation() -> ArbitrageCalculation {
        ArbitrageCalculation {
            pair: Symbol::new("BTC", "USDT"),
            buy_exchange: ExchangeId::Binance,
            sell_exchange: ExchangeId::Okx,
            buy_price: dec!(100),
            sell_price: dec!(101),
            volume_24h: dec!(1000000),
            gross_profit_percent: dec!(1),
            buy_fee_percent: dec!(0.1),
            sell_fee_percent: dec!(0.1),
            withdrawal_fee_percent: dec!(0.002),
            total_fees_percent: dec!(0.202),
            slippage_percent: Decimal::ZERO,
            net_profit_percent: dec!(0.798),
            recommended_amount: dec!(1000),
            net_profit_usd: dec!(7.98),
            spread_percent: dec!(0.995),
        }
    }

    #[test]
    fn test_opportunity_lifecycle() {
        let detected_at = Utc::now();
        let mut opportunity = ArbitrageOpportunity::new(
            "abc".to_string(),
            sample_calculation(),
            Decimal::ZERO,
            Decimal::ZERO,
            detected_at,
            Duration::minutes(3),
        );

        assert!(!opportunity.notified);
        assert!(!opportunity.is_expired(detected_at + Duration::minutes(2)));
        assert!(opportunity.is_expired(detected_at + Duration::minutes(3)));

        opportunity.mark_notified();
        assert!(opportunity.notified);
        assert!(opportunity.calculation.is_profitable());
    }

    #[test]
    fn test_opportunity_serializes_flat() {
        let opportunity = ArbitrageOpportunity::new(
            "abc".to_string(),
            sample_calculation(),
            Decimal::ZERO,
            Decimal::ZERO,
            Utc::now(),
            Duration::minutes(3),
        );
        let json = serde_json::to_value(&opportunity).unwrap();
        assert_eq!(json["external_id"], "abc");
        assert_eq!(json["buy_exchange"], "binance");
        assert!(json.get("calculation").is_none());
    }
}
