//! Position & Ledger Tracker
//!
//! Sole owner of the open-position set and sole writer of the ledger.
//! Implements:
//! - Position sizing from equity and free cash
//! - Fixed-percentage stop-loss and R-multiple targets
//! - Per-cycle marks with stop/target eligibility flags
//! - Realised P/L and ledger rows on exit

pub mod ledger;

pub use ledger::{Ledger, LedgerSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::{
    pnl_pct, Action, Decision, ExitReason, InstrumentId, LedgerEntry, Position, PositionStatus,
};

/// Position sizing and stop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Quote-currency capital the ledger starts from
    pub starting_capital: f64,
    /// Stop distance below entry (e.g., 0.10 = 10%)
    pub stop_loss_pct: f64,
    /// Share of equity committed per entry
    pub position_size_pct: f64,
    /// Entries smaller than this are rejected
    pub min_position_size: f64,
    pub max_open_positions: usize,
    /// Price within this fraction above the stop counts as "near"
    pub stop_near_pct: f64,
    /// T1 / T2 as multiples of the stop distance
    pub target_r_multiples: [f64; 2],
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            starting_capital: 1_000.0,
            stop_loss_pct: 0.10,    // 10% hard stop
            position_size_pct: 0.10, // 10% of equity per entry
            min_position_size: 10.0,
            max_open_positions: 5,
            stop_near_pct: 0.03,
            target_r_multiples: [1.5, 3.0], // +15% / +30% with a 10% stop
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err(EngineError::Config(format!(
                "risk stop_loss_pct {} must be in (0, 1)",
                self.stop_loss_pct
            )));
        }
        if !(self.position_size_pct > 0.0 && self.position_size_pct <= 1.0) {
            return Err(EngineError::Config(format!(
                "risk position_size_pct {} must be in (0, 1]",
                self.position_size_pct
            )));
        }
        if self.starting_capital <= 0.0 || self.min_position_size < 0.0 {
            return Err(EngineError::Config(
                "risk starting_capital must be positive and min_position_size non-negative".into(),
            ));
        }
        if self.max_open_positions == 0 {
            return Err(EngineError::Config(
                "risk max_open_positions must be at least 1".into(),
            ));
        }
        let [t1, t2] = self.target_r_multiples;
        if !(t1 > 0.0 && t2 >= t1) {
            return Err(EngineError::Config(
                "risk target_r_multiples must be positive and ascending".into(),
            ));
        }
        Ok(())
    }
}

/// Result of applying an ENTER decision
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened(Position),
    /// Execution declined for a non-fatal reason (limits, size)
    Rejected(String),
}

/// Per-cycle mark of one open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkReport {
    pub instrument: InstrumentId,
    pub price: f64,
    pub stop_loss: f64,
    pub pnl_pct: f64,
    /// Distance from price down to the stop, in percent of price
    pub stop_distance_pct: f64,
    pub stop_breached: bool,
    pub stop_near: bool,
    pub target_1_hit: bool,
    pub target_2_hit: bool,
}

pub struct Tracker {
    config: RiskConfig,
    positions: HashMap<InstrumentId, Position>,
    ledger: Ledger,
}

impl Tracker {
    pub fn new(config: RiskConfig) -> EngineResult<Self> {
        Self::restore(config, Vec::new(), Vec::new())
    }

    /// Rebuild from persisted positions and ledger rows
    pub fn restore(
        config: RiskConfig,
        positions: Vec<Position>,
        ledger: Vec<LedgerEntry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let mut open = HashMap::new();
        for position in positions.into_iter().filter(|p| p.is_open()) {
            if open.contains_key(&position.instrument) {
                return Err(EngineError::InvariantViolation(format!(
                    "restored state has two OPEN positions for {}",
                    position.instrument
                )));
            }
            open.insert(position.instrument.clone(), position);
        }
        Ok(Self {
            config,
            positions: open,
            ledger: Ledger::from_entries(ledger),
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn position(&self, instrument: &InstrumentId) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn has_position(&self, instrument: &InstrumentId) -> bool {
        self.positions.contains_key(instrument)
    }

    /// Snapshot of OPEN positions, oldest first
    pub fn open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| {
            a.entry_time
                .cmp(&b.entry_time)
                .then_with(|| a.instrument.cmp(&b.instrument))
        });
        positions
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Snapshot of ledger rows
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.ledger.entries().to_vec()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.ledger.entries().iter().map(|e| e.pnl_amount).sum()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl()).sum()
    }

    /// Cash not committed to open positions
    pub fn free_cash(&self) -> f64 {
        let committed: f64 = self.positions.values().map(|p| p.size).sum();
        self.config.starting_capital + self.realized_pnl() - committed
    }

    /// Capital plus realised and unrealised P/L
    pub fn equity(&self) -> f64 {
        self.config.starting_capital + self.realized_pnl() + self.unrealized_pnl()
    }

    /// Open a position for an ENTER decision
    pub fn enter(&mut self, decision: &Decision) -> EngineResult<EntryOutcome> {
        if decision.action != Action::Enter {
            return Err(EngineError::InvariantViolation(format!(
                "tracker.enter called with {} for {}",
                decision.action, decision.instrument
            )));
        }
        if self.positions.contains_key(&decision.instrument) {
            return Err(EngineError::InvariantViolation(format!(
                "ENTER for {} while a position is already OPEN",
                decision.instrument
            )));
        }

        let price = decision.price;
        if !(price.is_finite() && price > 0.0) {
            return Ok(self.reject(decision, format!("invalid entry price {}", price)));
        }
        if self.positions.len() >= self.config.max_open_positions {
            return Ok(self.reject(
                decision,
                format!("max open positions ({}) reached", self.config.max_open_positions),
            ));
        }

        let size = (self.equity() * self.config.position_size_pct).min(self.free_cash());
        if size < self.config.min_position_size || size <= 0.0 {
            return Ok(self.reject(
                decision,
                format!(
                    "size {:.2} below minimum {:.2}",
                    size, self.config.min_position_size
                ),
            ));
        }

        let stop_loss = price * (1.0 - self.config.stop_loss_pct);
        let risk = price - stop_loss;
        let [r1, r2] = self.config.target_r_multiples;
        let now = decision.score.timestamp();

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            instrument: decision.instrument.clone(),
            entry_price: price,
            entry_time: now,
            size,
            entry_score: decision.score.total(),
            entry_regime: decision.regime.regime,
            stop_loss,
            target_1: price + risk * r1,
            target_2: price + risk * r2,
            last_price: price,
            last_marked: now,
            status: PositionStatus::Open,
        };

        info!(
            instrument = %position.instrument,
            price,
            size,
            stop = stop_loss,
            score = position.entry_score,
            regime = %position.entry_regime,
            "Position opened"
        );
        self.positions
            .insert(position.instrument.clone(), position.clone());
        Ok(EntryOutcome::Opened(position))
    }

    fn reject(&self, decision: &Decision, reason: String) -> EntryOutcome {
        warn!(instrument = %decision.instrument, reason = %reason, "Entry rejected");
        EntryOutcome::Rejected(reason)
    }

    /// Close the OPEN position for an EXIT decision and append its ledger row
    pub fn exit(&mut self, decision: &Decision) -> EngineResult<LedgerEntry> {
        let reason = decision.exit_reason().ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "tracker.exit called with {} for {}",
                decision.action, decision.instrument
            ))
        })?;
        let mut position = self.positions.remove(&decision.instrument).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "EXIT for {} without an OPEN position",
                decision.instrument
            ))
        })?;

        let exit_price = match reason {
            ExitReason::StopLoss => position.stop_loss,
            ExitReason::ScoreDecay => decision.price,
        };
        let pnl = pnl_pct(position.entry_price, exit_price);
        let pnl_amount = position.size * pnl / 100.0;

        position.status = PositionStatus::Closed;
        position.last_price = decision.price;
        position.last_marked = decision.score.timestamp();

        let entry = LedgerEntry {
            trade_id: self.ledger.next_trade_id(),
            date: decision.score.timestamp(),
            instrument: position.instrument.clone(),
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            pnl_pct: pnl,
            pnl_amount,
            score: position.entry_score,
            regime: position.entry_regime,
            exit_reason: reason,
            notes: format!(
                "{} (exit score {:.1}, {})",
                reason,
                decision.score.total(),
                decision.regime.regime
            ),
        };
        self.ledger.append(entry.clone());

        info!(
            trade_id = %entry.trade_id,
            instrument = %entry.instrument,
            exit_price,
            pnl_pct = pnl,
            pnl = pnl_amount,
            reason = %reason,
            "Position closed"
        );
        Ok(entry)
    }

    /// Update the last price of an OPEN position and report stop/target flags.
    /// Never closes the position.
    pub fn mark(
        &mut self,
        instrument: &InstrumentId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Option<MarkReport> {
        let near_pct = self.config.stop_near_pct;
        let position = self.positions.get_mut(instrument)?;
        position.last_price = price;
        position.last_marked = at;

        let stop_distance_pct = if price > 0.0 {
            (price - position.stop_loss) / price * 100.0
        } else {
            0.0
        };
        let stop_breached = price <= position.stop_loss;

        Some(MarkReport {
            instrument: instrument.clone(),
            price,
            stop_loss: position.stop_loss,
            pnl_pct: position.unrealized_pnl_pct(),
            stop_distance_pct,
            stop_breached,
            stop_near: !stop_breached && stop_distance_pct <= near_pct * 100.0,
            target_1_hit: price >= position.target_1,
            target_2_hit: price >= position.target_2,
        })
    }

    pub fn summary(&self) -> LedgerSummary {
        self.ledger.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompositeScore, Dimension, Regime, RegimeState, SubScore};

    fn decision(symbol: &str, action: Action, price: f64, reason: &str, total: f64) -> Decision {
        let sub = |d: Dimension, v: f64| SubScore::new(d, v, vec![]).unwrap();
        let t = total.min(60.0);
        let f = (total - t).min(40.0);
        let c = (total - t - f).min(40.0);
        let n = total - t - f - c;
        let score = CompositeScore::new(
            InstrumentId::new(symbol),
            Utc::now(),
            Regime::Bull,
            sub(Dimension::Technical, t),
            sub(Dimension::Fundamental, f),
            sub(Dimension::Catalyst, c),
            sub(Dimension::Narrative, n),
        )
        .unwrap();
        Decision {
            instrument: InstrumentId::new(symbol),
            action,
            regime: RegimeState {
                regime: Regime::Bull,
                ..RegimeState::initial(Utc::now())
            },
            score,
            reason: reason.into(),
            price,
        }
    }

    fn tracker() -> Tracker {
        Tracker::new(RiskConfig::default()).unwrap()
    }

    #[test]
    fn test_enter_sizes_and_sets_stops() {
        let mut t = tracker();
        let outcome = t
            .enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        let EntryOutcome::Opened(p) = outcome else {
            panic!("expected an opened position");
        };
        assert!((p.size - 100.0).abs() < 1e-9);
        assert!((p.stop_loss - 90.0).abs() < 1e-9);
        assert!((p.target_1 - 115.0).abs() < 1e-9);
        assert!((p.target_2 - 130.0).abs() < 1e-9);
        assert!((t.free_cash() - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_enter_is_invariant_violation() {
        let mut t = tracker();
        t.enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        let err = t
            .enter(&decision("SOL", Action::Enter, 101.0, "", 110.0))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(t.open_count(), 1);
    }

    #[test]
    fn test_stop_loss_exit_books_minus_ten_percent() {
        let mut t = tracker();
        t.enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        let entry = t
            .exit(&decision("SOL", Action::Exit, 85.0, "stop-loss", 110.0))
            .unwrap();
        assert_eq!(entry.trade_id, "T00001");
        assert_eq!(entry.exit_reason, ExitReason::StopLoss);
        assert!((entry.pnl_pct + 10.0).abs() < 1e-9);
        assert!((entry.pnl_amount + 10.0).abs() < 1e-9);
        assert!(!t.has_position(&InstrumentId::new("SOL")));
        assert!((t.free_cash() - 990.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_decay_exit_fills_at_latest_price() {
        let mut t = tracker();
        t.enter(&decision("ADA", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        let entry = t
            .exit(&decision("ADA", Action::Exit, 104.0, "score decay", 50.0))
            .unwrap();
        assert_eq!(entry.exit_price, 104.0);
        assert!((entry.pnl_pct - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_exit_without_position_is_invariant_violation() {
        let mut t = tracker();
        let err = t
            .exit(&decision("SOL", Action::Exit, 85.0, "stop-loss", 110.0))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(t.ledger().is_empty());
    }

    #[test]
    fn test_limits_reject_without_error() {
        let mut t = Tracker::new(RiskConfig {
            max_open_positions: 1,
            ..Default::default()
        })
        .unwrap();
        t.enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        let outcome = t
            .enter(&decision("ADA", Action::Enter, 1.0, "", 110.0))
            .unwrap();
        assert!(matches!(outcome, EntryOutcome::Rejected(_)));

        let mut t = Tracker::new(RiskConfig {
            min_position_size: 500.0,
            ..Default::default()
        })
        .unwrap();
        let outcome = t
            .enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        assert!(matches!(outcome, EntryOutcome::Rejected(_)));
    }

    #[test]
    fn test_mark_flags_without_closing() {
        let mut t = tracker();
        t.enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap();
        let id = InstrumentId::new("SOL");

        let m = t.mark(&id, 92.0, Utc::now()).unwrap();
        assert!(m.stop_near && !m.stop_breached);

        let m = t.mark(&id, 85.0, Utc::now()).unwrap();
        assert!(m.stop_breached && !m.stop_near);
        assert!(t.has_position(&id));

        let m = t.mark(&id, 120.0, Utc::now()).unwrap();
        assert!(m.target_1_hit && !m.target_2_hit);
        assert!((t.unrealized_pnl() - 20.0).abs() < 1e-9);

        assert!(t.mark(&InstrumentId::new("DOT"), 1.0, Utc::now()).is_none());
    }

    #[test]
    fn test_restore_rejects_duplicate_open_positions() {
        let mut t = tracker();
        let EntryOutcome::Opened(p) = t
            .enter(&decision("SOL", Action::Enter, 100.0, "", 110.0))
            .unwrap()
        else {
            panic!("expected an opened position");
        };
        let err = Tracker::restore(RiskConfig::default(), vec![p.clone(), p], vec![]);
        assert!(err.is_err());
    }
}
