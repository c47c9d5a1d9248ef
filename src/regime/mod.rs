//! Regime Classifier
//!
//! Maps market sentiment (fear & greed, 0-100) and a benchmark trend signal to
//! BEAR / NEUTRAL / BULL. A new regime only takes effect after the same
//! candidate has been observed `hysteresis_window` times in a row, so a
//! single noisy reading never flips the gate thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::types::{MarketPulse, Regime, RegimeState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Sentiment strictly below this (with trend <= 0) is a BEAR candidate
    pub bear_below: f64,
    /// Sentiment at or above this (with trend >= 0) is a BULL candidate
    pub bull_at_or_above: f64,
    /// Consecutive observations required to confirm a transition
    pub hysteresis_window: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            bear_below: 35.0,
            bull_at_or_above: 65.0,
            hysteresis_window: 3,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.hysteresis_window == 0 {
            return Err(EngineError::Config(
                "regime hysteresis_window must be at least 1".into(),
            ));
        }
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.bear_below)
            || !in_range(self.bull_at_or_above)
            || self.bear_below >= self.bull_at_or_above
        {
            return Err(EngineError::Config(format!(
                "regime thresholds must satisfy 0 <= bear_below ({}) < bull_at_or_above ({}) <= 100",
                self.bear_below, self.bull_at_or_above
            )));
        }
        Ok(())
    }
}

/// A confirmed regime change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: Regime,
    pub to: Regime,
    pub at: DateTime<Utc>,
    pub sentiment: f64,
    pub trend: f64,
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
    state: RegimeState,
}

impl RegimeClassifier {
    /// Fresh classifier starting in NEUTRAL
    pub fn new(config: RegimeConfig, at: DateTime<Utc>) -> EngineResult<Self> {
        Self::from_state(config, RegimeState::initial(at))
    }

    /// Resume from a persisted state
    pub fn from_state(config: RegimeConfig, state: RegimeState) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &RegimeState {
        &self.state
    }

    pub fn regime(&self) -> Regime {
        self.state.regime
    }

    /// Regime suggested by a single reading; a missing trend counts as flat
    pub fn candidate(&self, sentiment: f64, trend: Option<f64>) -> Regime {
        let trend = trend.unwrap_or(0.0);
        if sentiment < self.config.bear_below && trend <= 0.0 {
            Regime::Bear
        } else if sentiment >= self.config.bull_at_or_above && trend >= 0.0 {
            Regime::Bull
        } else {
            Regime::Neutral
        }
    }

    /// Feed one observation; returns the transition if this one confirmed it.
    /// A carried-forward (stale) sentiment is not an observation and leaves
    /// the streak untouched.
    pub fn observe(&mut self, pulse: &MarketPulse) -> Option<RegimeTransition> {
        if pulse.sentiment.stale {
            debug!(
                regime = %self.state.regime,
                streak = self.state.streak,
                "Stale sentiment, regime observation skipped"
            );
            return None;
        }

        let sentiment = pulse.sentiment.value;
        let trend = pulse.trend.unwrap_or(0.0);
        let candidate = self.candidate(sentiment, pulse.trend);

        self.state.sentiment = sentiment;
        self.state.trend = trend;

        if candidate == self.state.regime {
            if self.state.pending.is_some() {
                debug!(regime = %self.state.regime, "Regime candidate reverted, streak reset");
            }
            self.state.pending = None;
            self.state.streak = 0;
            return None;
        }

        if self.state.pending == Some(candidate) {
            self.state.streak += 1;
        } else {
            self.state.pending = Some(candidate);
            self.state.streak = 1;
        }

        debug!(
            current = %self.state.regime,
            candidate = %candidate,
            streak = self.state.streak,
            window = self.config.hysteresis_window,
            "Regime candidate observed"
        );

        if self.state.streak < self.config.hysteresis_window {
            return None;
        }

        let transition = RegimeTransition {
            from: self.state.regime,
            to: candidate,
            at: pulse.timestamp,
            sentiment,
            trend,
        };
        self.state.regime = candidate;
        self.state.last_transition = pulse.timestamp;
        self.state.pending = None;
        self.state.streak = 0;

        info!(
            from = %transition.from,
            to = %transition.to,
            sentiment,
            trend,
            "Regime transition"
        );
        Some(transition)
    }
}
