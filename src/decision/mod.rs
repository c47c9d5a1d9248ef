//! Decision Gate
//!
//! Pure function of (composite score, regime, open position, latest price)
//! to exactly one action. Rules, first match wins:
//!
//! 1. OPEN and price <= stop          -> EXIT "stop-loss"
//! 2. OPEN and score < exit threshold -> EXIT "score decay"
//! 3. no position, score >= entry     -> ENTER
//! 4. no position, score < entry      -> AVOID
//! 5. otherwise                       -> HOLD

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{Action, CompositeScore, Decision, ExitReason, Position, Regime, RegimeState};

/// Raw threshold settings as loaded from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub entry_bear: f64,
    pub entry_neutral: f64,
    pub entry_bull: f64,
    pub exit_bear: f64,
    pub exit_neutral: f64,
    pub exit_bull: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            entry_bear: 130.0,
            entry_neutral: 95.0,
            entry_bull: 90.0,
            exit_bear: 90.0,
            exit_neutral: 70.0,
            exit_bull: 60.0,
        }
    }
}

/// Regime-dependent entry/exit thresholds.
///
/// Only constructible when entry BEAR >= NEUTRAL >= BULL and every exit
/// threshold is at or below its regime's entry threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeThresholds {
    entry: [f64; 3],
    exit: [f64; 3],
}

fn slot(regime: Regime) -> usize {
    match regime {
        Regime::Bear => 0,
        Regime::Neutral => 1,
        Regime::Bull => 2,
    }
}

impl RegimeThresholds {
    pub fn new(config: &GateConfig) -> EngineResult<Self> {
        let entry = [config.entry_bear, config.entry_neutral, config.entry_bull];
        let exit = [config.exit_bear, config.exit_neutral, config.exit_bull];

        if entry.iter().chain(exit.iter()).any(|t| !t.is_finite()) {
            return Err(EngineError::Config("gate thresholds must be finite".into()));
        }
        if !(entry[0] >= entry[1] && entry[1] >= entry[2]) {
            return Err(EngineError::Config(format!(
                "entry thresholds must satisfy BEAR ({}) >= NEUTRAL ({}) >= BULL ({})",
                entry[0], entry[1], entry[2]
            )));
        }
        for regime in Regime::ALL {
            let i = slot(regime);
            if exit[i] > entry[i] {
                return Err(EngineError::Config(format!(
                    "{} exit threshold {} exceeds entry threshold {}",
                    regime, exit[i], entry[i]
                )));
            }
        }
        Ok(Self { entry, exit })
    }

    pub fn entry(&self, regime: Regime) -> f64 {
        self.entry[slot(regime)]
    }

    pub fn exit(&self, regime: Regime) -> f64 {
        self.exit[slot(regime)]
    }
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        let c = GateConfig::default();
        Self {
            entry: [c.entry_bear, c.entry_neutral, c.entry_bull],
            exit: [c.exit_bear, c.exit_neutral, c.exit_bull],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionGate {
    thresholds: RegimeThresholds,
}

impl DecisionGate {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RegimeThresholds {
        &self.thresholds
    }

    pub fn decide(
        &self,
        score: &CompositeScore,
        regime: &RegimeState,
        position: Option<&Position>,
        price: f64,
    ) -> Decision {
        let total = score.total();
        let entry = self.thresholds.entry(regime.regime);
        let exit = self.thresholds.exit(regime.regime);

        let (action, reason) = match position.filter(|p| p.is_open()) {
            Some(p) if price <= p.stop_loss => (Action::Exit, ExitReason::StopLoss.to_string()),
            Some(_) if total < exit => (Action::Exit, ExitReason::ScoreDecay.to_string()),
            Some(_) => (
                Action::Hold,
                format!(
                    "score {:.1} at or above {} exit threshold {:.0}",
                    total, regime.regime, exit
                ),
            ),
            None if total >= entry => (
                Action::Enter,
                format!(
                    "score {:.1} meets {} entry threshold {:.0}",
                    total, regime.regime, entry
                ),
            ),
            None => (
                Action::Avoid,
                format!(
                    "score {:.1} below {} entry threshold {:.0}",
                    total, regime.regime, entry
                ),
            ),
        };

        Decision {
            instrument: score.instrument().clone(),
            action,
            score: score.clone(),
            regime: regime.clone(),
            reason,
            price,
        }
    }
}

impl Decision {
    /// AVOID for an instrument removed by screening; the gate is not consulted
    pub fn avoid_screened(
        score: &CompositeScore,
        regime: &RegimeState,
        screen_reason: impl std::fmt::Display,
        price: f64,
    ) -> Self {
        Decision {
            instrument: score.instrument().clone(),
            action: Action::Avoid,
            score: score.clone(),
            regime: regime.clone(),
            reason: format!("screened: {}", screen_reason),
            price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dimension, InstrumentId, PositionStatus, SubScore};
    use chrono::Utc;

    fn score(parts: [f64; 4], regime: Regime) -> CompositeScore {
        let sub = |d: Dimension, v: f64| SubScore::new(d, v, vec![]).unwrap();
        CompositeScore::new(
            InstrumentId::new("SOL"),
            Utc::now(),
            regime,
            sub(Dimension::Technical, parts[0]),
            sub(Dimension::Fundamental, parts[1]),
            sub(Dimension::Catalyst, parts[2]),
            sub(Dimension::Narrative, parts[3]),
        )
        .unwrap()
    }

    fn state(regime: Regime) -> RegimeState {
        RegimeState {
            regime,
            ..RegimeState::initial(Utc::now())
        }
    }

    fn position(entry: f64, stop: f64) -> Position {
        Position {
            id: "p1".into(),
            instrument: InstrumentId::new("SOL"),
            entry_price: entry,
            entry_time: Utc::now(),
            size: 100.0,
            entry_score: 120.0,
            entry_regime: Regime::Bull,
            stop_loss: stop,
            target_1: entry * 1.2,
            target_2: entry * 1.4,
            last_price: entry,
            last_marked: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn test_same_score_enters_in_bull_avoids_in_bear() {
        let gate = DecisionGate::default();
        let s = score([50.0, 30.0, 20.0, 10.0], Regime::Bull);
        assert_eq!(s.total(), 110.0);

        let d = gate.decide(&s, &state(Regime::Bull), None, 10.0);
        assert_eq!(d.action, Action::Enter);

        let d = gate.decide(&s, &state(Regime::Bear), None, 10.0);
        assert_eq!(d.action, Action::Avoid);
    }

    #[test]
    fn test_stop_loss_takes_priority() {
        let gate = DecisionGate::default();
        let s = score([60.0, 40.0, 40.0, 20.0], Regime::Bull);
        let d = gate.decide(&s, &state(Regime::Bull), Some(&position(100.0, 90.0)), 85.0);
        assert_eq!(d.action, Action::Exit);
        assert_eq!(d.reason, "stop-loss");
        assert_eq!(d.exit_reason(), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_score_decay_and_hold() {
        let gate = DecisionGate::default();
        let p = position(100.0, 90.0);

        let weak = score([20.0, 20.0, 10.0, 5.0], Regime::Neutral);
        let d = gate.decide(&weak, &state(Regime::Neutral), Some(&p), 101.0);
        assert_eq!(d.action, Action::Exit);
        assert_eq!(d.reason, "score decay");

        let ok = score([40.0, 20.0, 10.0, 10.0], Regime::Neutral);
        let d = gate.decide(&ok, &state(Regime::Neutral), Some(&p), 101.0);
        assert_eq!(d.action, Action::Hold);
    }

    #[test]
    fn test_closed_position_is_ignored() {
        let gate = DecisionGate::default();
        let mut p = position(100.0, 90.0);
        p.status = PositionStatus::Closed;
        let s = score([50.0, 30.0, 20.0, 10.0], Regime::Bull);
        let d = gate.decide(&s, &state(Regime::Bull), Some(&p), 50.0);
        assert_eq!(d.action, Action::Enter);
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let bad = GateConfig {
            entry_bull: 100.0,
            ..Default::default()
        };
        assert!(RegimeThresholds::new(&bad).is_err());

        let bad_exit = GateConfig {
            exit_bull: 95.0,
            ..Default::default()
        };
        assert!(RegimeThresholds::new(&bad_exit).is_err());

        let t = RegimeThresholds::new(&GateConfig::default()).unwrap();
        assert!(t.entry(Regime::Bear) >= t.entry(Regime::Neutral));
        assert!(t.entry(Regime::Neutral) >= t.entry(Regime::Bull));
    }
}
