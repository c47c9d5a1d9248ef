//! Fundamental dimension (max 40)

use serde::{Deserialize, Serialize};

use super::{factor, Band, BandTable};
use crate::error::{EngineError, EngineResult};
use crate::types::{Dimension, InstrumentSnapshot, SubScore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalConfig {
    pub liquidity_weight: f64,
    pub rank_weight: f64,
    pub stability_weight: f64,
    pub momentum_weight: f64,
    /// Volume / market cap below which liquidity scores zero
    pub min_liquidity_ratio: f64,
    /// Liquidity share awarded when market cap is unknown
    pub unknown_liquidity_fraction: f64,
    /// Rank share awarded when rank is unknown
    pub unknown_rank_fraction: f64,
    pub liquidity_bands: BandTable,
    pub rank_bands: BandTable,
    /// Bands over |7d change| in percent
    pub stability_bands: BandTable,
    /// Bands over 24h change in percent
    pub momentum_bands: BandTable,
}

impl Default for FundamentalConfig {
    fn default() -> Self {
        Self {
            liquidity_weight: 15.0,
            rank_weight: 10.0,
            stability_weight: 10.0,
            momentum_weight: 5.0,
            min_liquidity_ratio: 0.01,
            unknown_liquidity_fraction: 0.3,
            unknown_rank_fraction: 0.5,
            liquidity_bands: BandTable {
                bands: vec![
                    Band::new(0.1, 0.3, "low"),
                    Band::new(0.2, 0.6, "good"),
                    Band::new(0.5, 0.8, "high"),
                ],
                above: 1.0,
                above_label: "very high".into(),
            },
            // Integer ranks: "below 51" means rank 1-50
            rank_bands: BandTable {
                bands: vec![
                    Band::new(51.0, 0.7, "large cap"),
                    Band::new(101.0, 1.0, "mid cap"),
                    Band::new(251.0, 0.8, "small cap"),
                ],
                above: 0.5,
                above_label: "micro cap".into(),
            },
            stability_bands: BandTable {
                bands: vec![Band::new(25.0, 1.0, "stable"), Band::new(50.0, 0.6, "volatile")],
                above: 0.2,
                above_label: "very volatile".into(),
            },
            momentum_bands: BandTable {
                bands: vec![
                    Band::new(-5.0, 0.35, "declining"),
                    Band::new(0.0, 0.55, "slight decline"),
                    Band::new(5.0, 0.8, "weak positive"),
                    Band::new(10.0, 1.0, "optimal"),
                    Band::new(20.0, 0.65, "strong"),
                ],
                above: 0.2,
                above_label: "too hot".into(),
            },
        }
    }
}

impl FundamentalConfig {
    pub fn weights(&self) -> [f64; 4] {
        [
            self.liquidity_weight,
            self.rank_weight,
            self.stability_weight,
            self.momentum_weight,
        ]
    }

    pub(super) fn validate(&self) -> EngineResult<()> {
        for f in [self.unknown_liquidity_fraction, self.unknown_rank_fraction] {
            if !(0.0..=1.0).contains(&f) {
                return Err(EngineError::Config(format!(
                    "fundamental unknown fraction {} outside [0, 1]",
                    f
                )));
            }
        }
        if self.min_liquidity_ratio < 0.0 {
            return Err(EngineError::Config(
                "fundamental min_liquidity_ratio must be non-negative".into(),
            ));
        }
        self.liquidity_bands.validate("fundamental.liquidity_bands")?;
        self.rank_bands.validate("fundamental.rank_bands")?;
        self.stability_bands.validate("fundamental.stability_bands")?;
        self.momentum_bands.validate("fundamental.momentum_bands")
    }
}

pub fn score(config: &FundamentalConfig, snapshot: &InstrumentSnapshot) -> EngineResult<SubScore> {
    let mut factors = Vec::with_capacity(4);

    let liquidity_points = match snapshot.market_cap {
        Some(cap) => {
            let ratio = snapshot.volume_24h / cap;
            if ratio < config.min_liquidity_ratio {
                factors.push(factor(
                    "Vol/MCap",
                    format!("{:.4}", ratio),
                    "thin liquidity",
                    0.0,
                ));
                0.0
            } else {
                let (fraction, label) = config.liquidity_bands.lookup(ratio);
                let points = config.liquidity_weight * fraction;
                factors.push(factor("Vol/MCap", format!("{:.2}", ratio), label, points));
                points
            }
        }
        None => {
            let points = config.liquidity_weight * config.unknown_liquidity_fraction;
            factors.push(factor("Vol/MCap", "n/a".into(), "market cap unknown", points));
            points
        }
    };

    let rank_points = match snapshot.market_cap_rank {
        Some(rank) => {
            let (fraction, label) = config.rank_bands.lookup(rank as f64);
            let points = config.rank_weight * fraction;
            factors.push(factor("Rank", format!("#{}", rank), label, points));
            points
        }
        None => {
            let points = config.rank_weight * config.unknown_rank_fraction;
            factors.push(factor("Rank", "n/a".into(), "unranked", points));
            points
        }
    };

    let (fraction, label) = config.stability_bands.lookup(snapshot.change_7d_pct.abs());
    let stability_points = config.stability_weight * fraction;
    factors.push(factor(
        "7d",
        format!("{:+.1}%", snapshot.change_7d_pct),
        label,
        stability_points,
    ));

    let (fraction, label) = config.momentum_bands.lookup(snapshot.change_24h_pct);
    let momentum_points = config.momentum_weight * fraction;
    factors.push(factor(
        "24h",
        format!("{:+.1}%", snapshot.change_24h_pct),
        label,
        momentum_points,
    ));

    SubScore::new(
        Dimension::Fundamental,
        liquidity_points + rank_points + stability_points + momentum_points,
        factors,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstrumentId, SentimentReading};
    use chrono::Utc;

    fn snapshot(volume: f64, cap: Option<f64>, rank: Option<u32>) -> InstrumentSnapshot {
        InstrumentSnapshot {
            instrument: InstrumentId::new("ADA"),
            timestamp: Utc::now(),
            prices: vec![1.0],
            latest_price: 1.0,
            volume_24h: volume,
            market_cap: cap,
            market_cap_rank: rank,
            change_24h_pct: 7.5,
            change_7d_pct: 10.0,
            events: vec![],
            sentiment: SentimentReading {
                value: 50.0,
                observed_at: Utc::now(),
                stale: false,
            },
        }
    }

    #[test]
    fn test_best_case_reaches_max() {
        let s = score(
            &FundamentalConfig::default(),
            &snapshot(60.0, Some(100.0), Some(80)),
        )
        .unwrap();
        assert!((s.value() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_thin_liquidity_scores_zero_liquidity() {
        let config = FundamentalConfig::default();
        let thin = score(&config, &snapshot(0.5, Some(100.0), Some(80))).unwrap();
        let deep = score(&config, &snapshot(60.0, Some(100.0), Some(80))).unwrap();
        assert!((deep.value() - thin.value() - config.liquidity_weight).abs() < 1e-9);
        assert!(thin.factors()[0].contains("thin liquidity"));
    }

    #[test]
    fn test_rank_bands() {
        let config = FundamentalConfig::default();
        let large = score(&config, &snapshot(60.0, Some(100.0), Some(50))).unwrap();
        let mid = score(&config, &snapshot(60.0, Some(100.0), Some(51))).unwrap();
        assert!((mid.value() - large.value() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_market_data_is_partial_credit() {
        let s = score(&FundamentalConfig::default(), &snapshot(10.0, None, None)).unwrap();
        assert!(s.value() > 0.0 && s.value() < 40.0);
    }
}
