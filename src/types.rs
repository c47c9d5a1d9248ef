//! Core types used throughout Striker
//!
//! Snapshots, scores, regimes, positions, ledger rows and decisions. Scores
//! are built through checked constructors so the dimension bounds hold by
//! construction rather than by clamping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Upper bound of the composite score (60 + 40 + 40 + 20).
pub const COMPOSITE_MAX: f64 = 160.0;

/// Instrument identifier (upper-case ticker, e.g. "SOL")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        InstrumentId(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse market mood gating the decision thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Bear,
    Neutral,
    Bull,
}

impl Default for Regime {
    fn default() -> Self {
        Regime::Neutral
    }
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Bear, Regime::Neutral, Regime::Bull];

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BEAR" => Some(Regime::Bear),
            "NEUTRAL" => Some(Regime::Neutral),
            "BULL" => Some(Regime::Bull),
            _ => None,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Bear => write!(f, "BEAR"),
            Regime::Neutral => write!(f, "NEUTRAL"),
            Regime::Bull => write!(f, "BULL"),
        }
    }
}

/// Decision action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Enter,
    Hold,
    Exit,
    Avoid,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Enter => write!(f, "ENTER"),
            Action::Hold => write!(f, "HOLD"),
            Action::Exit => write!(f, "EXIT"),
            Action::Avoid => write!(f, "AVOID"),
        }
    }
}

/// Scoring dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Technical,
    Fundamental,
    Catalyst,
    Narrative,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Technical,
        Dimension::Fundamental,
        Dimension::Catalyst,
        Dimension::Narrative,
    ];

    /// Maximum points this dimension contributes to the composite
    pub fn max(&self) -> f64 {
        match self {
            Dimension::Technical => 60.0,
            Dimension::Fundamental => 40.0,
            Dimension::Catalyst => 40.0,
            Dimension::Narrative => 20.0,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Technical => write!(f, "Technical"),
            Dimension::Fundamental => write!(f, "Fundamental"),
            Dimension::Catalyst => write!(f, "Catalyst"),
            Dimension::Narrative => write!(f, "Narrative"),
        }
    }
}

/// Sentiment of a single news item, derived from community votes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewsSentiment {
    Positive,
    Negative,
    Neutral,
}

/// News / catalyst event attached to an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalystEvent {
    pub title: String,
    pub published_at: DateTime<Utc>,
    /// Importance in 0.0..=1.0
    pub severity: f64,
    #[serde(default)]
    pub votes_positive: u32,
    #[serde(default)]
    pub votes_negative: u32,
}

impl CatalystEvent {
    pub fn sentiment(&self) -> NewsSentiment {
        if self.votes_positive > self.votes_negative {
            NewsSentiment::Positive
        } else if self.votes_negative > self.votes_positive {
            NewsSentiment::Negative
        } else {
            NewsSentiment::Neutral
        }
    }

    /// Age in hours at `now`; future-dated events count as fresh
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.published_at).num_seconds().max(0);
        secs as f64 / 3600.0
    }
}

/// Fear & greed style sentiment reading (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    /// True when this is a carried-forward value rather than a fresh reading
    pub stale: bool,
}

/// Canonical per-instrument snapshot for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    /// Price window, oldest first
    pub prices: Vec<f64>,
    pub latest_price: f64,
    pub volume_24h: f64,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub change_24h_pct: f64,
    pub change_7d_pct: f64,
    pub events: Vec<CatalystEvent>,
    pub sentiment: SentimentReading,
}

/// Market-wide inputs for the regime classifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketPulse {
    pub timestamp: DateTime<Utc>,
    pub sentiment: SentimentReading,
    /// Benchmark trend in -1.0..=1.0, None when no benchmark series was supplied
    pub trend: Option<f64>,
}

/// One bounded dimension score with its audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    dimension: Dimension,
    value: f64,
    factors: Vec<String>,
    degraded: Option<String>,
}

impl SubScore {
    /// Checked constructor: a value outside `[0, dimension max]` is an engine bug.
    pub fn new(dimension: Dimension, value: f64, factors: Vec<String>) -> EngineResult<Self> {
        if !value.is_finite() || value < 0.0 || value > dimension.max() {
            return Err(EngineError::InvariantViolation(format!(
                "{} sub-score {} outside [0, {}]",
                dimension,
                value,
                dimension.max()
            )));
        }
        Ok(Self {
            dimension,
            value,
            factors,
            degraded: None,
        })
    }

    /// Zero score recorded in place of a failed computation
    pub fn degraded(dimension: Dimension, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            dimension,
            value: 0.0,
            factors: vec![format!("degraded: {}", reason)],
            degraded: Some(reason),
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Sum of the four sub-scores for one instrument at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    instrument: InstrumentId,
    timestamp: DateTime<Utc>,
    regime: Regime,
    technical: SubScore,
    fundamental: SubScore,
    catalyst: SubScore,
    narrative: SubScore,
    total: f64,
}

impl CompositeScore {
    pub fn new(
        instrument: InstrumentId,
        timestamp: DateTime<Utc>,
        regime: Regime,
        technical: SubScore,
        fundamental: SubScore,
        catalyst: SubScore,
        narrative: SubScore,
    ) -> EngineResult<Self> {
        let parts = [&technical, &fundamental, &catalyst, &narrative];
        for (part, expected) in parts.iter().zip(Dimension::ALL) {
            if part.dimension() != expected {
                return Err(EngineError::InvariantViolation(format!(
                    "expected {} sub-score, got {}",
                    expected,
                    part.dimension()
                )));
            }
        }

        let total = technical.value() + fundamental.value() + catalyst.value() + narrative.value();
        if !(0.0..=COMPOSITE_MAX).contains(&total) {
            return Err(EngineError::InvariantViolation(format!(
                "composite {} outside [0, {}] for {}",
                total, COMPOSITE_MAX, instrument
            )));
        }

        Ok(Self {
            instrument,
            timestamp,
            regime,
            technical,
            fundamental,
            catalyst,
            narrative,
            total,
        })
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn technical(&self) -> &SubScore {
        &self.technical
    }

    pub fn fundamental(&self) -> &SubScore {
        &self.fundamental
    }

    pub fn catalyst(&self) -> &SubScore {
        &self.catalyst
    }

    pub fn narrative(&self) -> &SubScore {
        &self.narrative
    }

    pub fn sub_scores(&self) -> [&SubScore; 4] {
        [
            &self.technical,
            &self.fundamental,
            &self.catalyst,
            &self.narrative,
        ]
    }

    pub fn degraded_dimensions(&self) -> Vec<Dimension> {
        self.sub_scores()
            .iter()
            .filter(|s| s.is_degraded())
            .map(|s| s.dimension())
            .collect()
    }
}

/// Active regime plus the hysteresis bookkeeping behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    /// Sentiment value of the latest observation
    pub sentiment: f64,
    /// Trend signal of the latest observation
    pub trend: f64,
    pub last_transition: DateTime<Utc>,
    /// Candidate waiting for confirmation, if any
    pub pending: Option<Regime>,
    /// Consecutive observations of `pending`
    pub streak: usize,
}

impl RegimeState {
    pub fn initial(at: DateTime<Utc>) -> Self {
        Self {
            regime: Regime::Neutral,
            sentiment: 50.0,
            trend: 0.0,
            last_transition: at,
            pending: None,
            streak: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    ScoreDecay,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::ScoreDecay => "score decay",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long position opened on ENTER
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: InstrumentId,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Notional in quote currency
    pub size: f64,
    pub entry_score: f64,
    pub entry_regime: Regime,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub last_price: f64,
    pub last_marked: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Unrealised P/L in percent of entry
    pub fn unrealized_pnl_pct(&self) -> f64 {
        pnl_pct(self.entry_price, self.last_price)
    }

    /// Unrealised P/L in quote currency
    pub fn unrealized_pnl(&self) -> f64 {
        self.size * self.unrealized_pnl_pct() / 100.0
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Percent change from `entry` to `exit`
pub fn pnl_pct(entry: f64, exit: f64) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    (exit - entry) / entry * 100.0
}

/// Immutable record of a closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub trade_id: String,
    pub date: DateTime<Utc>,
    pub instrument: InstrumentId,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    /// Realised P/L in percent
    pub pnl_pct: f64,
    /// Realised P/L in quote currency
    pub pnl_amount: f64,
    /// Composite score at entry
    pub score: f64,
    /// Regime at entry
    pub regime: Regime,
    pub exit_reason: ExitReason,
    pub notes: String,
}

/// Output of the decision gate for one instrument in one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub instrument: InstrumentId,
    pub action: Action,
    pub score: CompositeScore,
    pub regime: RegimeState,
    pub reason: String,
    /// Price the decision was taken against
    pub price: f64,
}

impl Decision {
    pub fn exit_reason(&self) -> Option<ExitReason> {
        if self.action != Action::Exit {
            return None;
        }
        if self.reason == ExitReason::StopLoss.as_str() {
            Some(ExitReason::StopLoss)
        } else {
            Some(ExitReason::ScoreDecay)
        }
    }
}
