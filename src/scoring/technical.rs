//! Technical dimension (max 60)

use serde::{Deserialize, Serialize};

use super::{factor, Band, BandTable};
use crate::error::{EngineError, EngineResult};
use crate::features::{FeatureConfig, FeatureEngine, Indicators};
use crate::types::{Dimension, InstrumentSnapshot, SubScore};

/// Floor for return volatility when normalising trend strength
const MIN_VOLATILITY: f64 = 1e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    pub features: FeatureConfig,
    pub trend_weight: f64,
    pub macd_weight: f64,
    pub rsi_weight: f64,
    pub range_weight: f64,
    /// Volatility-adjusted EMA spread that maps to tanh(1)
    pub trend_scale: f64,
    /// MACD histogram (percent of price) that maps to tanh(1)
    pub macd_scale: f64,
    pub rsi_bands: BandTable,
    pub range_bands: BandTable,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            trend_weight: 20.0,
            macd_weight: 15.0,
            rsi_weight: 10.0,
            range_weight: 15.0,
            trend_scale: 2.0,
            macd_scale: 1.0,
            rsi_bands: BandTable {
                bands: vec![
                    Band::new(20.0, 0.25, "extremely oversold"),
                    Band::new(30.0, 0.9, "oversold"),
                    Band::new(40.0, 1.0, "optimal buy zone"),
                    Band::new(60.0, 0.75, "neutral"),
                    Band::new(70.0, 0.5, "getting overbought"),
                    Band::new(80.0, 0.15, "overbought"),
                ],
                above: 0.0,
                above_label: "extremely overbought".into(),
            },
            range_bands: BandTable {
                bands: vec![
                    Band::new(0.2, 0.9, "near lower band"),
                    Band::new(0.4, 1.0, "lower third"),
                    Band::new(0.6, 0.75, "middle"),
                    Band::new(0.8, 0.5, "upper zone"),
                    Band::new(1.0, 0.25, "near upper band"),
                ],
                above: 0.15,
                above_label: "above upper band".into(),
            },
        }
    }
}

impl TechnicalConfig {
    pub fn weights(&self) -> [f64; 4] {
        [
            self.trend_weight,
            self.macd_weight,
            self.rsi_weight,
            self.range_weight,
        ]
    }

    pub(super) fn validate(&self) -> EngineResult<()> {
        if self.trend_scale <= 0.0 || self.macd_scale <= 0.0 {
            return Err(EngineError::Config(
                "technical trend_scale and macd_scale must be positive".into(),
            ));
        }
        let f = &self.features;
        let periods = [
            ("rsi_period", f.rsi_period),
            ("macd_fast", f.macd_fast),
            ("macd_signal", f.macd_signal),
            ("bb_period", f.bb_period),
            ("volatility_period", f.volatility_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| *period == 0) {
            return Err(EngineError::Config(format!(
                "technical.features.{} must be at least 1",
                name
            )));
        }
        if f.macd_fast >= f.macd_slow {
            return Err(EngineError::Config(
                "technical macd_fast must be below macd_slow".into(),
            ));
        }
        self.rsi_bands.validate("technical.rsi_bands")?;
        self.range_bands.validate("technical.range_bands")
    }
}

/// Technical sub-score for a snapshot; degraded when the window is too short
pub fn score(config: &TechnicalConfig, snapshot: &InstrumentSnapshot) -> EngineResult<SubScore> {
    let engine = FeatureEngine::new(config.features.clone());
    let indicators = engine.compute(&snapshot.prices).ok_or_else(|| {
        EngineError::degraded(
            Dimension::Technical,
            format!(
                "{} prices, need {}",
                snapshot.prices.len(),
                engine.min_points()
            ),
        )
    })?;
    score_indicators(config, &indicators)
}

/// Volatility-adjusted trend strength
pub fn trend_strength(indicators: &Indicators) -> f64 {
    indicators.trend_spread / indicators.volatility.max(MIN_VOLATILITY)
}

/// Score precomputed indicators
pub fn score_indicators(config: &TechnicalConfig, ind: &Indicators) -> EngineResult<SubScore> {
    let mut factors = Vec::with_capacity(4);

    let strength = trend_strength(ind);
    let trend_points = config.trend_weight * unit_tanh(strength / config.trend_scale);
    factors.push(factor(
        "Trend",
        format!("strength {:+.2}", strength),
        "",
        trend_points,
    ));

    let hist_pct = if ind.latest > 0.0 {
        ind.macd_hist / ind.latest * 100.0
    } else {
        0.0
    };
    let macd_points = config.macd_weight * unit_tanh(hist_pct / config.macd_scale);
    factors.push(factor(
        "MACD",
        format!("hist {:+.3}%", hist_pct),
        if hist_pct > 0.0 { "bullish" } else { "bearish" },
        macd_points,
    ));

    let (rsi_fraction, rsi_label) = config.rsi_bands.lookup(ind.rsi);
    let rsi_points = config.rsi_weight * rsi_fraction;
    factors.push(factor(
        "RSI",
        format!("{:.1}", ind.rsi),
        rsi_label,
        rsi_points,
    ));

    let (range_fraction, range_label) = config.range_bands.lookup(ind.bb_position);
    let range_points = config.range_weight * range_fraction;
    factors.push(factor(
        "BB",
        format!("{:.2}", ind.bb_position),
        range_label,
        range_points,
    ));

    SubScore::new(
        Dimension::Technical,
        trend_points + macd_points + rsi_points + range_points,
        factors,
    )
}

/// tanh mapped onto 0..=1
fn unit_tanh(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    ((x.tanh() + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators(trend_spread: f64) -> Indicators {
        Indicators {
            latest: 100.0,
            rsi: 35.0,
            macd_line: 0.5,
            macd_signal: 0.3,
            macd_hist: 0.2,
            bb_upper: 110.0,
            bb_middle: 100.0,
            bb_lower: 90.0,
            bb_position: 0.3,
            ema_fast: 100.0 * (1.0 + trend_spread),
            ema_slow: 100.0,
            trend_spread,
            volatility: 0.02,
        }
    }

    #[test]
    fn test_monotonic_in_trend_strength() {
        let config = TechnicalConfig::default();
        let mut last = 0.0;
        for i in -20..=20 {
            let v = score_indicators(&config, &indicators(i as f64 * 0.005))
                .unwrap()
                .value();
            assert!(v >= last, "score fell from {} to {} at step {}", last, v, i);
            last = v;
        }
    }

    #[test]
    fn test_rsi_bands_follow_scanner_zones() {
        let config = TechnicalConfig::default();
        let mut ind = indicators(0.0);

        ind.rsi = 35.0;
        let optimal = score_indicators(&config, &ind).unwrap().value();
        ind.rsi = 85.0;
        let extreme = score_indicators(&config, &ind).unwrap().value();
        assert!((optimal - extreme - config.rsi_weight).abs() < 1e-9);
    }

    #[test]
    fn test_short_series_is_degraded() {
        use crate::types::{InstrumentId, SentimentReading};
        use chrono::Utc;

        let snapshot = InstrumentSnapshot {
            instrument: InstrumentId::new("SOL"),
            timestamp: Utc::now(),
            prices: vec![1.0; 10],
            latest_price: 1.0,
            volume_24h: 0.0,
            market_cap: None,
            market_cap_rank: None,
            change_24h_pct: 0.0,
            change_7d_pct: 0.0,
            events: vec![],
            sentiment: SentimentReading {
                value: 50.0,
                observed_at: Utc::now(),
                stale: true,
            },
        };
        let err = score(&TechnicalConfig::default(), &snapshot).unwrap_err();
        assert!(matches!(err, EngineError::ComputationDegraded { .. }));
        assert!(err.to_string().contains("10 prices, need 26"));
    }

    #[test]
    fn test_zero_indicator_periods_rejected() {
        assert!(TechnicalConfig::default().validate().is_ok());

        let mut config = TechnicalConfig::default();
        config.features.volatility_period = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("volatility_period"));

        let mut config = TechnicalConfig::default();
        config.features.macd_signal = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("macd_signal"));

        let mut config = TechnicalConfig::default();
        config.features.macd_fast = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_never_exceeds_max() {
        let config = TechnicalConfig::default();
        let mut ind = indicators(10.0);
        ind.macd_hist = 1e6;
        let v = score_indicators(&config, &ind).unwrap().value();
        assert!(v <= 60.0);
    }
}
