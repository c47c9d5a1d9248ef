//! Scoring Engine - four bounded dimensions summed into a composite
//!
//! | Dimension   | Max | Inputs                                      |
//! |-------------|-----|---------------------------------------------|
//! | Technical   | 60  | trend strength, MACD, RSI zone, BB position |
//! | Fundamental | 40  | liquidity, rank, 7d stability, 24h momentum |
//! | Catalyst    | 40  | decayed severity of positive/negative news  |
//! | Narrative   | 20  | bullish/bearish lexicon over news titles    |
//!
//! Each dimension is computed independently. A dimension that cannot be
//! computed scores 0 with a degradation reason; the composite is still
//! produced. Out-of-bound values are engine bugs and surface as
//! `InvariantViolation`.

pub mod catalyst;
pub mod fundamental;
pub mod narrative;
pub mod technical;

pub use catalyst::{CatalystCluster, CatalystConfig, Decay};
pub use fundamental::FundamentalConfig;
pub use narrative::NarrativeConfig;
pub use technical::TechnicalConfig;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::{CompositeScore, Dimension, InstrumentSnapshot, Regime, SubScore};

/// One step of a piecewise-constant scoring table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Applies to values strictly below this bound
    pub below: f64,
    /// Share of the component weight awarded (0..=1)
    pub fraction: f64,
    #[serde(default)]
    pub label: String,
}

impl Band {
    pub fn new(below: f64, fraction: f64, label: &str) -> Self {
        Self {
            below,
            fraction,
            label: label.to_string(),
        }
    }
}

/// Ordered bands plus the fraction for values above the last bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandTable {
    pub bands: Vec<Band>,
    pub above: f64,
    #[serde(default)]
    pub above_label: String,
}

impl BandTable {
    /// Fraction and label for `value`
    pub fn lookup(&self, value: f64) -> (f64, &str) {
        self.bands
            .iter()
            .find(|b| value < b.below)
            .map(|b| (b.fraction, b.label.as_str()))
            .unwrap_or((self.above, self.above_label.as_str()))
    }

    fn validate(&self, name: &str) -> EngineResult<()> {
        let fractions = self
            .bands
            .iter()
            .map(|b| b.fraction)
            .chain(std::iter::once(self.above));
        for f in fractions {
            if !(0.0..=1.0).contains(&f) {
                return Err(EngineError::Config(format!(
                    "{}: band fraction {} outside [0, 1]",
                    name, f
                )));
            }
        }
        if self.bands.windows(2).any(|w| w[0].below >= w[1].below) {
            return Err(EngineError::Config(format!(
                "{}: band bounds must be strictly ascending",
                name
            )));
        }
        Ok(())
    }
}

/// All scoring weights and bands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub technical: TechnicalConfig,
    pub fundamental: FundamentalConfig,
    pub catalyst: CatalystConfig,
    pub narrative: NarrativeConfig,
}

impl ScoringConfig {
    /// Reject weight sets that could exceed a dimension maximum
    pub fn validate(&self) -> EngineResult<()> {
        check_weights(Dimension::Technical, &self.technical.weights())?;
        check_weights(Dimension::Fundamental, &self.fundamental.weights())?;
        check_weights(Dimension::Catalyst, &[self.catalyst.weight])?;
        check_weights(Dimension::Narrative, &[self.narrative.weight])?;

        self.technical.validate()?;
        self.fundamental.validate()?;
        self.catalyst.validate()?;
        self.narrative.validate()?;
        Ok(())
    }
}

fn check_weights(dimension: Dimension, weights: &[f64]) -> EngineResult<()> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(EngineError::Config(format!(
            "{} weights must be finite and non-negative",
            dimension
        )));
    }
    let sum: f64 = weights.iter().sum();
    if sum > dimension.max() {
        return Err(EngineError::Config(format!(
            "{} weights sum to {} which exceeds the maximum {}",
            dimension,
            sum,
            dimension.max()
        )));
    }
    Ok(())
}

/// Computes composite scores from snapshots
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Build from a validated configuration
    pub fn new(config: ScoringConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one snapshot under `regime` as of `now`
    pub fn score(
        &self,
        snapshot: &InstrumentSnapshot,
        regime: Regime,
        now: DateTime<Utc>,
    ) -> EngineResult<CompositeScore> {
        let technical = settle(
            Dimension::Technical,
            technical::score(&self.config.technical, snapshot),
        )?;
        let fundamental = settle(
            Dimension::Fundamental,
            fundamental::score(&self.config.fundamental, snapshot),
        )?;
        let catalyst = settle(
            Dimension::Catalyst,
            catalyst::score(&self.config.catalyst, &snapshot.events, now),
        )?;
        let narrative = settle(
            Dimension::Narrative,
            narrative::score(&self.config.narrative, &snapshot.events, now),
        )?;

        let composite = CompositeScore::new(
            snapshot.instrument.clone(),
            snapshot.timestamp,
            regime,
            technical,
            fundamental,
            catalyst,
            narrative,
        )?;

        debug!(
            instrument = %snapshot.instrument,
            total = composite.total(),
            technical = composite.technical().value(),
            fundamental = composite.fundamental().value(),
            catalyst = composite.catalyst().value(),
            narrative = composite.narrative().value(),
            "Scored"
        );
        Ok(composite)
    }

    /// Positive news cluster over the catalyst horizon, if any
    pub fn catalyst_cluster(
        &self,
        snapshot: &InstrumentSnapshot,
        now: DateTime<Utc>,
    ) -> Option<CatalystCluster> {
        catalyst::cluster(&self.config.catalyst, &snapshot.events, now)
    }
}

/// Turn a recoverable failure into a zero sub-score; anything else propagates
fn settle(dimension: Dimension, result: EngineResult<SubScore>) -> EngineResult<SubScore> {
    match result {
        Ok(sub) => Ok(sub),
        Err(EngineError::ComputationDegraded { reason, .. }) => {
            debug!(%dimension, reason = %reason, "Sub-score degraded");
            Ok(SubScore::degraded(dimension, reason))
        }
        Err(e) => Err(e),
    }
}

/// Factor line used in every sub-score audit trail
pub(crate) fn factor(name: &str, detail: String, label: &str, points: f64) -> String {
    if label.is_empty() {
        format!("{}: {} (+{:.1})", name, detail, points)
    } else {
        format!("{}: {} ({}: +{:.1})", name, detail, label, points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CatalystEvent, InstrumentId, SentimentReading};
    use chrono::Duration;

    fn snapshot(prices: Vec<f64>, events: Vec<CatalystEvent>) -> InstrumentSnapshot {
        InstrumentSnapshot {
            instrument: InstrumentId::new("SOL"),
            timestamp: Utc::now(),
            latest_price: *prices.last().unwrap(),
            prices,
            volume_24h: 12_000_000.0,
            market_cap: Some(60_000_000.0),
            market_cap_rank: Some(75),
            change_24h_pct: 7.0,
            change_7d_pct: 12.0,
            events,
            sentiment: SentimentReading {
                value: 55.0,
                observed_at: Utc::now(),
                stale: false,
            },
        }
    }

    #[test]
    fn test_band_lookup() {
        let table = BandTable {
            bands: vec![Band::new(10.0, 0.2, "low"), Band::new(20.0, 0.6, "mid")],
            above: 1.0,
            above_label: "high".into(),
        };
        assert_eq!(table.lookup(5.0), (0.2, "low"));
        assert_eq!(table.lookup(10.0), (0.6, "mid"));
        assert_eq!(table.lookup(25.0), (1.0, "high"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overweight_config_rejected() {
        let mut config = ScoringConfig::default();
        config.narrative.weight = 25.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let mut config = ScoringConfig::default();
        config.technical.trend_weight += 1.0;
        assert!(ScoringEngine::new(config).is_err());
    }

    #[test]
    fn test_short_series_degrades_technical_only() {
        let engine = ScoringEngine::new(ScoringConfig::default()).unwrap();
        let snap = snapshot(vec![100.0, 101.0, 102.0], vec![]);
        let score = engine.score(&snap, Regime::Neutral, Utc::now()).unwrap();

        assert_eq!(score.technical().value(), 0.0);
        assert_eq!(score.degraded_dimensions(), vec![Dimension::Technical]);
        assert!(score.fundamental().value() > 0.0);
        assert!((score.total()
            - score.sub_scores().iter().map(|s| s.value()).sum::<f64>())
        .abs()
            < 1e-12);
    }

    #[test]
    fn test_full_score_within_bounds() {
        let engine = ScoringEngine::new(ScoringConfig::default()).unwrap();
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 4.0 + i as f64 * 0.2)
            .collect();
        let now = Utc::now();
        let events = vec![CatalystEvent {
            title: "Partnership announced with major exchange".into(),
            published_at: now - Duration::hours(3),
            severity: 0.9,
            votes_positive: 12,
            votes_negative: 1,
        }];
        let score = engine
            .score(&snapshot(prices, events), Regime::Bull, now)
            .unwrap();
        assert!(score.total() > 0.0 && score.total() <= 160.0);
        assert!(score.catalyst().value() > 0.0);
        assert!(score.degraded_dimensions().is_empty());
        assert_eq!(score.regime(), Regime::Bull);
    }
}
