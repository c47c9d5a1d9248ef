//! Catalyst dimension (max 40)
//!
//! Positive news adds decayed severity, negative news subtracts it; the net
//! is normalised by `saturation` and clamped to the dimension range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::factor;
use crate::error::{EngineError, EngineResult};
use crate::types::{CatalystEvent, Dimension, NewsSentiment, SubScore};

/// How event impact fades with age
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decay {
    /// Straight line from 1 at age 0 to 0 at the horizon
    Linear,
    /// Halves every `half_life_hours`
    Exponential { half_life_hours: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalystConfig {
    pub weight: f64,
    pub decay: Decay,
    /// Events at or beyond this age contribute nothing
    pub horizon_hours: f64,
    /// Multiplier applied to negative events
    pub negative_weight: f64,
    /// Net decayed severity that earns the full weight
    pub saturation: f64,
    /// Positive items needed for a catalyst cluster alert
    pub cluster_min_positive: usize,
}

impl Default for CatalystConfig {
    fn default() -> Self {
        Self {
            weight: 40.0,
            decay: Decay::Exponential {
                half_life_hours: 12.0,
            },
            horizon_hours: 48.0,
            negative_weight: 1.0,
            saturation: 2.0,
            cluster_min_positive: 2,
        }
    }
}

impl CatalystConfig {
    pub(super) fn validate(&self) -> EngineResult<()> {
        if self.horizon_hours <= 0.0 || self.saturation <= 0.0 || self.negative_weight < 0.0 {
            return Err(EngineError::Config(
                "catalyst horizon and saturation must be positive, negative_weight non-negative"
                    .into(),
            ));
        }
        if let Decay::Exponential { half_life_hours } = self.decay {
            if half_life_hours <= 0.0 {
                return Err(EngineError::Config(
                    "catalyst half_life_hours must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Impact multiplier in 0..=1 for an event of `age_hours`
    pub fn decay_factor(&self, age_hours: f64) -> f64 {
        let age = age_hours.max(0.0);
        if age >= self.horizon_hours {
            return 0.0;
        }
        match self.decay {
            Decay::Linear => 1.0 - age / self.horizon_hours,
            Decay::Exponential { half_life_hours } => 0.5_f64.powf(age / half_life_hours),
        }
    }
}

pub fn score(
    config: &CatalystConfig,
    events: &[CatalystEvent],
    now: DateTime<Utc>,
) -> EngineResult<SubScore> {
    let mut positive = 0.0;
    let mut negative = 0.0;
    let mut live = 0usize;

    for event in events {
        let impact = event.severity.clamp(0.0, 1.0) * config.decay_factor(event.age_hours(now));
        if impact <= 0.0 {
            continue;
        }
        live += 1;
        match event.sentiment() {
            NewsSentiment::Positive => positive += impact,
            NewsSentiment::Negative => negative += impact,
            NewsSentiment::Neutral => {}
        }
    }

    let net = positive - config.negative_weight * negative;
    let fraction = (net / config.saturation).clamp(0.0, 1.0);
    let points = config.weight * fraction;

    let factors = vec![factor(
        "News",
        format!(
            "{} live items, +{:.2} / -{:.2} decayed severity",
            live, positive, negative
        ),
        "",
        points,
    )];
    SubScore::new(Dimension::Catalyst, points, factors)
}

/// Cluster of fresh news around one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystCluster {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    /// (positive - negative) / total
    pub strength: f64,
    pub headlines: Vec<String>,
}

/// Positive cluster within the horizon: at least `cluster_min_positive`
/// positive items and more positive than negative ones
pub fn cluster(
    config: &CatalystConfig,
    events: &[CatalystEvent],
    now: DateTime<Utc>,
) -> Option<CatalystCluster> {
    let fresh: Vec<&CatalystEvent> = events
        .iter()
        .filter(|e| e.age_hours(now) < config.horizon_hours)
        .collect();

    let mut positive = 0;
    let mut negative = 0;
    let mut neutral = 0;
    for event in &fresh {
        match event.sentiment() {
            NewsSentiment::Positive => positive += 1,
            NewsSentiment::Negative => negative += 1,
            NewsSentiment::Neutral => neutral += 1,
        }
    }

    if positive < config.cluster_min_positive.max(1) || positive <= negative {
        return None;
    }

    let total = positive + negative + neutral;
    Some(CatalystCluster {
        positive,
        negative,
        neutral,
        strength: (positive - negative) as f64 / total as f64,
        headlines: fresh
            .iter()
            .filter(|e| e.sentiment() == NewsSentiment::Positive)
            .take(3)
            .map(|e| e.title.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(hours_ago: i64, severity: f64, pos: u32, neg: u32) -> CatalystEvent {
        CatalystEvent {
            title: format!("event {}h", hours_ago),
            published_at: Utc::now() - Duration::hours(hours_ago),
            severity,
            votes_positive: pos,
            votes_negative: neg,
        }
    }

    #[test]
    fn test_event_beyond_horizon_scores_zero() {
        let config = CatalystConfig::default();
        let s = score(&config, &[event(49, 1.0, 10, 0)], Utc::now()).unwrap();
        assert_eq!(s.value(), 0.0);
    }

    #[test]
    fn test_decay_non_increasing() {
        for decay in [
            Decay::Linear,
            Decay::Exponential {
                half_life_hours: 6.0,
            },
        ] {
            let config = CatalystConfig {
                decay,
                ..Default::default()
            };
            let mut last = f64::INFINITY;
            for h in 0..60 {
                let d = config.decay_factor(h as f64);
                assert!(d <= last);
                last = d;
            }
            assert_eq!(config.decay_factor(48.0), 0.0);
        }
    }

    #[test]
    fn test_future_events_count_as_fresh() {
        let config = CatalystConfig::default();
        let s = score(&config, &[event(-5, 1.0, 3, 0)], Utc::now()).unwrap();
        assert!((s.value() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_news_offsets_positive() {
        let config = CatalystConfig::default();
        let now = Utc::now();
        let pos_only = score(&config, &[event(0, 1.0, 5, 0)], now).unwrap();
        let mixed = score(&config, &[event(0, 1.0, 5, 0), event(0, 1.0, 0, 5)], now).unwrap();
        assert!(pos_only.value() > 0.0);
        assert_eq!(mixed.value(), 0.0);
    }

    #[test]
    fn test_saturates_at_weight() {
        let config = CatalystConfig::default();
        let events: Vec<_> = (0..10).map(|_| event(0, 1.0, 4, 0)).collect();
        let s = score(&config, &events, Utc::now()).unwrap();
        assert_eq!(s.value(), 40.0);
    }

    #[test]
    fn test_cluster_requires_positive_majority() {
        let config = CatalystConfig::default();
        let now = Utc::now();
        let c = cluster(
            &config,
            &[event(1, 0.5, 3, 0), event(2, 0.5, 2, 1), event(3, 0.5, 1, 1)],
            now,
        )
        .unwrap();
        assert_eq!((c.positive, c.negative, c.neutral), (2, 0, 1));
        assert!((c.strength - 2.0 / 3.0).abs() < 1e-9);

        assert!(cluster(&config, &[event(1, 0.5, 3, 0), event(1, 0.5, 0, 3)], now).is_none());
        assert!(cluster(&config, &[event(100, 0.5, 3, 0), event(100, 0.5, 3, 0)], now).is_none());
    }
}
