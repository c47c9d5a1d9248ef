//! Universe screening
//!
//! Removes instruments that should never reach the decision gate as new
//! entries: pegged assets, pump-and-dump volatility, thin liquidity and
//! overbought charts.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::features::rsi_wilders;
use crate::types::InstrumentSnapshot;

const DEFAULT_STABLECOINS: &[&str] = &[
    "usdt", "usdc", "dai", "busd", "tusd", "usdp", "gusd", "frax", "usdd", "lusd", "susd", "eurs",
    "usdx", "usds", "fdusd", "pyusd", "eurc", "usd1", "usde", "usdy", "usdtb", "cusd", "usdr",
    "usdj", "ustb", "usdf", "usd0", "usda", "ylds", "ust", "flexusd",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub enabled: bool,
    /// Symbols excluded outright (case-insensitive)
    pub stablecoins: Vec<String>,
    /// Absolute 24h change (percent) above which an instrument is excluded
    pub max_abs_change_24h: f64,
    /// Minimum volume / market cap
    pub min_volume_ratio: f64,
    /// RSI above which an instrument is treated as overbought
    pub max_rsi: f64,
    pub rsi_period: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stablecoins: DEFAULT_STABLECOINS.iter().map(|s| s.to_string()).collect(),
            max_abs_change_24h: 50.0,
            min_volume_ratio: 0.01,
            max_rsi: 70.0,
            rsi_period: 14,
        }
    }
}

/// Why an instrument was screened out
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScreenReason {
    Stablecoin,
    ExtremeVolatility { change_24h_pct: f64 },
    LowLiquidity { volume_ratio: f64 },
    Overbought { rsi: f64 },
}

impl fmt::Display for ScreenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenReason::Stablecoin => write!(f, "stablecoin"),
            ScreenReason::ExtremeVolatility { change_24h_pct } => {
                write!(f, "extreme volatility ({:+.1}% 24h)", change_24h_pct)
            }
            ScreenReason::LowLiquidity { volume_ratio } => {
                write!(f, "low liquidity (V/MC {:.4})", volume_ratio)
            }
            ScreenReason::Overbought { rsi } => write!(f, "overbought (RSI {:.1})", rsi),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Screener {
    config: ScreeningConfig,
    stablecoins: HashSet<String>,
}

impl Screener {
    pub fn new(config: ScreeningConfig) -> Self {
        let stablecoins = config.stablecoins.iter().map(|s| s.to_lowercase()).collect();
        Self {
            config,
            stablecoins,
        }
    }

    /// First failing screen, or None when the instrument may be considered for entry
    pub fn screen(&self, snapshot: &InstrumentSnapshot) -> Option<ScreenReason> {
        if !self.config.enabled {
            return None;
        }

        if self
            .stablecoins
            .contains(&snapshot.instrument.as_str().to_lowercase())
        {
            return Some(ScreenReason::Stablecoin);
        }

        if snapshot.change_24h_pct.abs() > self.config.max_abs_change_24h {
            return Some(ScreenReason::ExtremeVolatility {
                change_24h_pct: snapshot.change_24h_pct,
            });
        }

        // Without a market cap the ratio is unknown; the fundamental scorer handles it
        if let Some(cap) = snapshot.market_cap {
            let volume_ratio = snapshot.volume_24h / cap;
            if volume_ratio < self.config.min_volume_ratio {
                return Some(ScreenReason::LowLiquidity { volume_ratio });
            }
        }

        if let Some(rsi) = rsi_wilders(&snapshot.prices, self.config.rsi_period) {
            if rsi > self.config.max_rsi {
                return Some(ScreenReason::Overbought { rsi });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstrumentId, SentimentReading};
    use chrono::Utc;

    fn snapshot(symbol: &str, prices: Vec<f64>) -> InstrumentSnapshot {
        InstrumentSnapshot {
            instrument: InstrumentId::new(symbol),
            timestamp: Utc::now(),
            latest_price: *prices.last().unwrap(),
            prices,
            volume_24h: 2_000_000.0,
            market_cap: Some(20_000_000.0),
            market_cap_rank: Some(80),
            change_24h_pct: 3.0,
            change_7d_pct: 5.0,
            events: vec![],
            sentiment: SentimentReading {
                value: 50.0,
                observed_at: Utc::now(),
                stale: false,
            },
        }
    }

    fn choppy() -> Vec<f64> {
        (0..30)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect()
    }

    #[test]
    fn test_passes_ordinary_instrument() {
        let screener = Screener::new(ScreeningConfig::default());
        assert_eq!(screener.screen(&snapshot("SOL", choppy())), None);
    }

    #[test]
    fn test_stablecoins_excluded_case_insensitively() {
        let screener = Screener::new(ScreeningConfig::default());
        assert_eq!(
            screener.screen(&snapshot("usdc", choppy())),
            Some(ScreenReason::Stablecoin)
        );
    }

    #[test]
    fn test_extreme_volatility_and_liquidity() {
        let screener = Screener::new(ScreeningConfig::default());

        let mut snap = snapshot("PEPE", choppy());
        snap.change_24h_pct = -62.0;
        assert!(matches!(
            screener.screen(&snap),
            Some(ScreenReason::ExtremeVolatility { .. })
        ));

        let mut snap = snapshot("DUST", choppy());
        snap.volume_24h = 1_000.0;
        assert!(matches!(
            screener.screen(&snap),
            Some(ScreenReason::LowLiquidity { .. })
        ));

        snap.market_cap = None;
        assert_eq!(screener.screen(&snap), None);
    }

    #[test]
    fn test_overbought_rsi() {
        let screener = Screener::new(ScreeningConfig::default());
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(matches!(
            screener.screen(&snapshot("SOL", rising)),
            Some(ScreenReason::Overbought { .. })
        ));
    }

    #[test]
    fn test_disabled_screener_passes_everything() {
        let screener = Screener::new(ScreeningConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(screener.screen(&snapshot("USDT", choppy())), None);
    }
}
