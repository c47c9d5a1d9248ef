//! CSV and JSON persistence
//!
//! Append-only CSV records (ledger, score breakdowns, decisions, regime
//! transitions) for the external reporting glue, plus the JSON engine state
//! used for restart recovery and the JSON status file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info};

use crate::regime::RegimeTransition;
use crate::types::{
    CompositeScore, Decision, InstrumentId, LedgerEntry, Position, RegimeState, SentimentReading,
};

const LEDGER_FILE: &str = "ledger.csv";
const REGIME_FILE: &str = "regime_transitions.csv";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ledger row in the trade-record layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(rename = "Trade ID")]
    pub trade_id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Coin")]
    pub coin: String,
    #[serde(rename = "Entry Price")]
    pub entry_price: f64,
    #[serde(rename = "Exit Price")]
    pub exit_price: f64,
    #[serde(rename = "Size")]
    pub size: f64,
    #[serde(rename = "P/L%")]
    pub pnl_pct: f64,
    #[serde(rename = "P/L")]
    pub pnl: f64,
    #[serde(rename = "Score")]
    pub score: f64,
    #[serde(rename = "Regime")]
    pub regime: String,
    #[serde(rename = "Notes")]
    pub notes: String,
}

impl From<&LedgerEntry> for LedgerRecord {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            trade_id: entry.trade_id.clone(),
            date: entry.date.format(DATE_FORMAT).to_string(),
            coin: entry.instrument.to_string(),
            entry_price: entry.entry_price,
            exit_price: entry.exit_price,
            size: round2(entry.size),
            pnl_pct: round2(entry.pnl_pct),
            pnl: round2(entry.pnl_amount),
            score: round2(entry.score),
            regime: entry.regime.to_string(),
            notes: entry.notes.clone(),
        }
    }
}

/// Per-dimension score breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub timestamp: i64,
    pub instrument: String,
    pub regime: String,
    #[serde(rename = "technical/60")]
    pub technical: f64,
    #[serde(rename = "fundamental/40")]
    pub fundamental: f64,
    #[serde(rename = "catalyst/40")]
    pub catalyst: f64,
    #[serde(rename = "narrative/20")]
    pub narrative: f64,
    #[serde(rename = "total/160")]
    pub total: f64,
    pub degraded: String,
    pub factors: String,
}

impl From<&CompositeScore> for ScoreRecord {
    fn from(score: &CompositeScore) -> Self {
        let degraded: Vec<String> = score
            .degraded_dimensions()
            .iter()
            .map(|d| d.to_string())
            .collect();
        let factors: Vec<&str> = score
            .sub_scores()
            .iter()
            .flat_map(|s| s.factors().iter().map(String::as_str))
            .collect();
        Self {
            timestamp: score.timestamp().timestamp_millis(),
            instrument: score.instrument().to_string(),
            regime: score.regime().to_string(),
            technical: round2(score.technical().value()),
            fundamental: round2(score.fundamental().value()),
            catalyst: round2(score.catalyst().value()),
            narrative: round2(score.narrative().value()),
            total: round2(score.total()),
            degraded: degraded.join(";"),
            factors: factors.join(" | "),
        }
    }
}

/// One gate decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub cycle: u64,
    pub timestamp: i64,
    pub instrument: String,
    pub action: String,
    pub score: f64,
    pub regime: String,
    pub price: f64,
    pub reason: String,
}

impl DecisionRecord {
    pub fn new(cycle: u64, decision: &Decision) -> Self {
        Self {
            cycle,
            timestamp: decision.score.timestamp().timestamp_millis(),
            instrument: decision.instrument.to_string(),
            action: decision.action.to_string(),
            score: round2(decision.score.total()),
            regime: decision.regime.regime.to_string(),
            price: decision.price,
            reason: decision.reason.clone(),
        }
    }
}

/// One confirmed regime change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeRecord {
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub sentiment: f64,
    pub trend: f64,
}

impl From<&RegimeTransition> for RegimeRecord {
    fn from(t: &RegimeTransition) -> Self {
        Self {
            timestamp: t.at.timestamp_millis(),
            from: t.from.to_string(),
            to: t.to.to_string(),
            sentiment: t.sentiment,
            trend: t.trend,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// CSV persistence manager
pub struct CsvPersistence {
    data_dir: PathBuf,
    ledger_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    score_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    decision_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    regime_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
}

impl CsvPersistence {
    /// Create a new CSV persistence manager
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        fs::create_dir_all(data_dir.join("scores"))?;
        fs::create_dir_all(data_dir.join("decisions"))?;

        let today = Utc::now().format("%Y-%m-%d");

        let ledger_writer = Self::create_writer(&data_dir, LEDGER_FILE)?;
        let regime_writer = Self::create_writer(&data_dir, REGIME_FILE)?;
        let score_writer =
            Self::create_writer(&data_dir.join("scores"), &format!("scores_{}.csv", today))?;
        let decision_writer = Self::create_writer(
            &data_dir.join("decisions"),
            &format!("decisions_{}.csv", today),
        )?;

        debug!(dir = %data_dir.display(), "CSV persistence ready");

        Ok(Self {
            data_dir,
            ledger_writer: Arc::new(AsyncRwLock::new(ledger_writer)),
            score_writer: Arc::new(AsyncRwLock::new(score_writer)),
            decision_writer: Arc::new(AsyncRwLock::new(decision_writer)),
            regime_writer: Arc::new(AsyncRwLock::new(regime_writer)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Append a closed trade
    pub async fn save_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut writer = self.ledger_writer.write().await;
        writer
            .serialize(LedgerRecord::from(entry))
            .context("Failed to write ledger record")?;
        writer.flush().context("Failed to flush ledger writer")?;
        Ok(())
    }

    /// Append a score breakdown
    pub async fn save_score(&self, score: &CompositeScore) -> Result<()> {
        let mut writer = self.score_writer.write().await;
        writer
            .serialize(ScoreRecord::from(score))
            .context("Failed to write score record")?;
        writer.flush().context("Failed to flush score writer")?;
        Ok(())
    }

    /// Append a decision
    pub async fn save_decision(&self, cycle: u64, decision: &Decision) -> Result<()> {
        let mut writer = self.decision_writer.write().await;
        writer
            .serialize(DecisionRecord::new(cycle, decision))
            .context("Failed to write decision record")?;
        writer.flush().context("Failed to flush decision writer")?;
        Ok(())
    }

    /// Append a regime transition
    pub async fn save_regime_transition(&self, transition: &RegimeTransition) -> Result<()> {
        let mut writer = self.regime_writer.write().await;
        writer
            .serialize(RegimeRecord::from(transition))
            .context("Failed to write regime record")?;
        writer.flush().context("Failed to flush regime writer")?;
        Ok(())
    }

    /// Read back the ledger CSV
    pub fn load_ledger_records(&self) -> Result<Vec<LedgerRecord>> {
        let path = self.ledger_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&path).context("Failed to open ledger file")?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: LedgerRecord = result.context("Failed to deserialize ledger record")?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Everything needed to resume after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub saved_at: DateTime<Utc>,
    pub cycle: u64,
    pub regime: RegimeState,
    pub positions: Vec<Position>,
    pub ledger: Vec<LedgerEntry>,
    #[serde(default)]
    pub last_sentiment: Option<SentimentReading>,
    /// Instruments selected by the last full scan
    #[serde(default)]
    pub watchlist: Vec<InstrumentId>,
}

/// JSON state file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save current state to JSON file
    pub fn save(&self, state: &EngineState) -> Result<()> {
        write_json(&self.path, state)?;
        debug!(
            path = %self.path.display(),
            cycle = state.cycle,
            positions = state.positions.len(),
            "State saved"
        );
        Ok(())
    }

    /// Load state, or None when no state file exists yet
    pub fn load(&self) -> Result<Option<EngineState>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No state file found, starting fresh");
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {}", self.path.display()))?;
        let state: EngineState = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse state file {}", self.path.display()))?;
        info!(
            path = %self.path.display(),
            cycle = state.cycle,
            regime = %state.regime.regime,
            positions = state.positions.len(),
            trades = state.ledger.len(),
            "State loaded"
        );
        Ok(Some(state))
    }
}

/// Pretty-print `value` to `path`, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
