use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::symbol::Symbol;
use crate::types::ExchangeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Canonical `BASE/QUOTE` pairs to stream on every enabled exchange.
    pub symbols: Vec<Symbol>,
    pub exchanges: ExchangesConfig,
    pub aggregator: AggregatorConfig,
    pub detector: DetectorConfig,
    pub dedup: DedupConfig,
    pub fees: FeeOverrides,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangesConfig {
    pub binance: FeedConfig,
    pub bybit: FeedConfig,
    pub okx: FeedConfig,
}

/// Connection settings for one exchange feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    /// Overrides the exchange's public endpoint.
    pub url: Option<String>,
    /// Overrides the protocol's book depth.
    pub depth: Option<u32>,
    pub ping_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub health_stale_threshold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Books older than this are excluded from best-price queries.
    pub max_book_age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_profit_percent: Decimal,
    /// Minimum 24h quote volume on both legs.
    pub min_volume_24h: Decimal,
    /// Larger spreads are treated as bad data.
    pub max_spread_percent: Decimal,
    pub max_slippage_percent: Decimal,
    /// Notional walked through both books when estimating slippage.
    pub reference_notional: Decimal,
    pub min_recommended_amount: Decimal,
    pub opportunity_ttl_secs: u64,
    pub max_concurrent_detections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_secs: u64,
    pub bucket_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Fee overrides layered over the built-in fee table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeOverrides {
    /// Trading fee percent keyed by exchange name.
    pub trading: BTreeMap<String, Decimal>,
    pub withdrawal: Vec<WithdrawalFeeOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalFeeOverride {
    pub exchange: ExchangeId,
    pub currency: String,
    /// Absolute amount in units of `currency`.
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Capacity of the opportunity channel; the newest item is dropped when full.
    pub buffer_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                Symbol::new("BTC", "USDT"),
                Symbol::new("ETH", "USDT"),
                Symbol::new("SOL", "USDT"),
            ],
            exchanges: ExchangesConfig::default(),
            aggregator: AggregatorConfig::default(),
            detector: DetectorConfig::default(),
            dedup: DedupConfig::default(),
            fees: FeeOverrides::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        Self {
            binance: FeedConfig::default(),
            bybit: FeedConfig::default(),
            okx: FeedConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            depth: None,
            ping_interval_ms: 20_000,
            reconnect_backoff_ms: 5_000,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 60_000,
            write_timeout_ms: 5_000,
            health_check_interval_ms: 30_000,
            health_stale_threshold_ms: 60_000,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_book_age_ms: 5_000,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_profit_percent: dec!(0.3),
            min_volume_24h: dec!(100000),
            max_spread_percent: dec!(5),
            max_slippage_percent: dec!(0.5),
            reference_notional: dec!(1000),
            min_recommended_amount: dec!(100),
            opportunity_ttl_secs: 180,
            max_concurrent_detections: 32,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            bucket_secs: 180,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

impl ExchangesConfig {
    #[must_use]
    pub fn get(&self, exchange: ExchangeId) -> &FeedConfig {
        match exchange {
            ExchangeId::Binance => &self.binance,
            ExchangeId::Bybit => &self.bybit,
            ExchangeId::Okx => &self.okx,
        }
    }

    /// Exchanges with `enabled = true`.
    #[must_use]
    pub fn enabled(&self) -> Vec<ExchangeId> {
        ExchangeId::ALL
            .into_iter()
            .filter(|exchange| self.get(*exchange).enabled)
            .collect()
    }
}

/// Floor applied to every feed interval and timeout; tokio intervals panic on zero.
pub const MIN_FEED_INTERVAL: Duration = Duration::from_millis(100);

fn at_least_min(ms: u64) -> Duration {
    Duration::from_millis(ms).max(MIN_FEED_INTERVAL)
}

impl FeedConfig {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        at_least_min(self.ping_interval_ms)
    }

    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        at_least_min(self.reconnect_backoff_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        at_least_min(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        at_least_min(self.read_timeout_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        at_least_min(self.write_timeout_ms)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        at_least_min(self.health_check_interval_ms)
    }

    #[must_use]
    pub fn health_stale_threshold(&self) -> Duration {
        at_least_min(self.health_stale_threshold_ms)
    }
}

impl AggregatorConfig {
    #[must_use]
    pub fn max_book_age(&self) -> Duration {
        Duration::from_millis(self.max_book_age_ms)
    }
}

impl DetectorConfig {
    /// Higher profit and volume bars, tighter slippage.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            min_profit_percent: dec!(0.5),
            min_volume_24h: dec!(1000000),
            max_spread_percent: dec!(3),
            max_slippage_percent: dec!(0.3),
            ..Self::default()
        }
    }

    /// Lower bars for surfacing more candidates.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            min_profit_percent: dec!(0.1),
            min_volume_24h: dec!(50000),
            max_spread_percent: dec!(8),
            max_slippage_percent: dec!(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_min_profit_percent(mut self, percent: Decimal) -> Self {
        self.min_profit_percent = percent;
        self
    }

    #[must_use]
    pub fn with_min_volume_24h(mut self, volume: Decimal) -> Self {
        self.min_volume_24h = volume;
        self
    }

    #[must_use]
    pub fn with_max_slippage_percent(mut self, percent: Decimal) -> Self {
        self.max_slippage_percent = percent;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_detections(mut self, limit: usize) -> Self {
        self.max_concurrent_detections = limit;
        self
    }

    #[must_use]
    pub fn opportunity_ttl(&self) -> Duration {
        Duration::from_secs(self.opportunity_ttl_secs)
    }
}

impl DedupConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub fn bucket(&self) -> Duration {
        Duration::from_secs(self.bucket_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl FeeOverrides {
    /// Trading overrides with recognized exchange names; unknown names are
    /// logged and skipped.
    #[must_use]
    pub fn trading_fees(&self) -> Vec<(ExchangeId, Decimal)> {
        self.trading
            .iter()
            .filter_map(|(name, fee)| match name.parse::<ExchangeId>() {
                Ok(exchange) => Some((exchange, *fee)),
                Err(e) => {
                    tracing::warn!(exchange = %name, error = %e, "Ignoring trading fee override");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_all_exchanges() {
        let config = AppConfig::default();
        assert_eq!(config.exchanges.enabled(), ExchangeId::ALL.to_vec());
        assert_eq!(config.aggregator.max_book_age(), Duration::from_secs(5));
        assert_eq!(config.dedup.bucket(), Duration::from_secs(180));
        assert_eq!(config.detector.reference_notional, dec!(1000));
    }

    #[test]
    fn test_zero_feed_intervals_are_floored() {
        let config = FeedConfig {
            ping_interval_ms: 0,
            reconnect_backoff_ms: 0,
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            health_check_interval_ms: 0,
            health_stale_threshold_ms: 0,
            ..FeedConfig::default()
        };
        for duration in [
            config.ping_interval(),
            config.reconnect_backoff(),
            config.connect_timeout(),
            config.read_timeout(),
            config.write_timeout(),
            config.health_check_interval(),
            config.health_stale_threshold(),
        ] {
            assert_eq!(duration, MIN_FEED_INTERVAL);
        }
        assert_eq!(FeedConfig::default().ping_interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_disabled_exchange_is_skipped() {
        let mut config = AppConfig::default();
        config.exchanges.bybit.enabled = false;
        assert_eq!(
            config.exchanges.enabled(),
            vec![ExchangeId::Binance, ExchangeId::Okx]
        );
    }

    #[test]
    fn test_trading_fee_overrides_skip_unknown() {
        let mut overrides = FeeOverrides::default();
        overrides.trading.insert("okx".to_string(), dec!(0.08));
        overrides.trading.insert("kraken".to_string(), dec!(0.26));
        assert_eq!(overrides.trading_fees(), vec![(ExchangeId::Okx, dec!(0.08))]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"symbols": ["btc/usdt"], "detector": {"min_profit_percent": "1.5"}}"#)
                .unwrap();
        assert_eq!(config.symbols, vec![Symbol::new("BTC", "USDT")]);
        assert_eq!(config.detector.min_profit_percent, dec!(1.5));
        assert_eq!(config.detector.max_slippage_percent, dec!(0.5));
        assert!(config.exchanges.okx.enabled);
    }

    #[test]
    fn test_detector_presets_and_builders() {
        let conservative = DetectorConfig::conservative();
        let aggressive = DetectorConfig::aggressive();
        assert!(conservative.min_profit_percent > aggressive.min_profit_percent);
        assert!(conservative.max_slippage_percent < aggressive.max_slippage_percent);
        assert_eq!(conservative.reference_notional, dec!(1000));

        let custom = DetectorConfig::default()
            .with_min_profit_percent(dec!(0.2))
            .with_max_concurrent_detections(4);
        assert_eq!(custom.min_profit_percent, dec!(0.2));
        assert_eq!(custom.max_concurrent_detections, 4);
    }
}
