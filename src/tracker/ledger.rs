//! Append-only trade ledger

use serde::{Deserialize, Serialize};

use crate::types::LedgerEntry;

/// Closed-trade history. Rows are only ever appended.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

/// Aggregate figures for progress reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades closed with positive P/L
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl_pct: f64,
    pub best_trade_pct: Option<f64>,
    pub worst_trade_pct: Option<f64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self { entries }
    }

    pub(super) fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    /// Sequential trade id for the next row (T00001, T00002, ...)
    pub fn next_trade_id(&self) -> String {
        format!("T{:05}", self.entries.len() + 1)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> LedgerSummary {
        let trades = self.entries.len();
        if trades == 0 {
            return LedgerSummary::default();
        }

        let wins = self.entries.iter().filter(|e| e.pnl_amount > 0.0).count();
        let total_pnl: f64 = self.entries.iter().map(|e| e.pnl_amount).sum();
        let pct = || self.entries.iter().map(|e| e.pnl_pct);

        LedgerSummary {
            trades,
            wins,
            losses: trades - wins,
            win_rate: wins as f64 / trades as f64 * 100.0,
            total_pnl,
            avg_pnl_pct: pct().sum::<f64>() / trades as f64,
            best_trade_pct: pct().reduce(f64::max),
            worst_trade_pct: pct().reduce(f64::min),
        }
    }
}
