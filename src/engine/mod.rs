//! Cycle orchestration
//!
//! The engine owns every stateful component (regime classifier, tracker,
//! watchlist, per-source stale-data streaks) and runs one cycle per
//! scheduler tick:
//!
//! 1. Evaluate instruments concurrently: fetch -> normalise -> screen -> score
//! 2. Apply decisions one instrument at a time (single writer)
//! 3. Observe the regime once every instrument has finished
//! 4. Persist records, state and status

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertSink, DataSource, TargetLevel};
use crate::decision::{DecisionGate, RegimeThresholds};
use crate::error::{EngineError, EngineResult};
use crate::feed::{FeedClient, FeedLimits, MarketFeed, Normalizer};
use crate::persistence::{write_json, CsvPersistence, EngineState, StateStore};
use crate::regime::{RegimeClassifier, RegimeConfig};
use crate::scheduler::CycleKind;
use crate::scoring::{CatalystCluster, ScoringConfig, ScoringEngine};
use crate::screening::{ScreenReason, Screener, ScreeningConfig};
use crate::tracker::{EntryOutcome, MarkReport, RiskConfig, Tracker};
use crate::types::{
    Action, CompositeScore, Decision, Dimension, InstrumentId, InstrumentSnapshot, LedgerEntry,
    Position, Regime, RegimeState, SentimentReading,
};

/// Typed, validated engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tag: String,
    pub scoring: ScoringConfig,
    pub screening: ScreeningConfig,
    pub regime: RegimeConfig,
    pub thresholds: RegimeThresholds,
    pub risk: RiskConfig,
    pub normalizer: Normalizer,
    pub feed_limits: FeedLimits,
    /// Consecutive cycles a source is unavailable before alerting; 0 disables
    pub stale_after_cycles: u32,
    pub watchlist_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tag: env!("CARGO_PKG_VERSION").to_string(),
            scoring: ScoringConfig::default(),
            screening: ScreeningConfig::default(),
            regime: RegimeConfig::default(),
            thresholds: RegimeThresholds::default(),
            risk: RiskConfig::default(),
            normalizer: Normalizer::default(),
            feed_limits: FeedLimits::default(),
            stale_after_cycles: 3,
            watchlist_size: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
}

/// Process status published after every state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub tag: String,
    pub state: RunState,
    pub cycle: u64,
    pub last_cycle_kind: Option<CycleKind>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub regime: Regime,
    pub open_positions: usize,
    pub ledger_len: usize,
    pub equity: f64,
    pub realized_pnl: f64,
    pub watchlist: Vec<InstrumentId>,
    pub updated_at: DateTime<Utc>,
}

/// Instrument that produced no decision this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skipped {
    pub instrument: InstrumentId,
    pub reason: String,
}

/// Everything one cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    pub decisions: Vec<Decision>,
    pub skipped: Vec<Skipped>,
    /// Instruments scored with at least one degraded dimension
    pub degraded: Vec<(InstrumentId, Vec<Dimension>)>,
    /// ENTER decisions the tracker declined
    pub rejected: Vec<Skipped>,
    pub closed: Vec<LedgerEntry>,
    pub alerts: Vec<Alert>,
    pub regime_before: Regime,
    pub regime_after: Regime,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn decision(&self, instrument: &InstrumentId) -> Option<&Decision> {
        self.decisions.iter().find(|d| &d.instrument == instrument)
    }

    pub fn count(&self, action: Action) -> usize {
        self.decisions.iter().filter(|d| d.action == action).count()
    }
}

/// Consecutive unavailable cycles for one source
#[derive(Debug, Default, Clone, Copy)]
struct StaleStreak {
    cycles: u32,
    alerted: bool,
}

/// Output of the concurrent half of a cycle for one instrument
struct Evaluation {
    snapshot: InstrumentSnapshot,
    score: CompositeScore,
    screened: Option<ScreenReason>,
    cluster: Option<CatalystCluster>,
}

pub struct Engine {
    config: EngineConfig,
    feed: FeedClient,
    scoring: ScoringEngine,
    screener: Screener,
    gate: DecisionGate,
    classifier: RegimeClassifier,
    tracker: Tracker,
    sinks: Vec<Arc<dyn AlertSink>>,
    csv: Option<CsvPersistence>,
    state_store: Option<StateStore>,
    status_path: Option<PathBuf>,
    cycle: u64,
    last_cycle: Option<(CycleKind, DateTime<Utc>)>,
    watchlist: Vec<InstrumentId>,
    last_sentiment: Option<SentimentReading>,
    stale: HashMap<DataSource, StaleStreak>,
    /// (position id, level) pairs already alerted
    targets_alerted: HashSet<(String, TargetLevel)>,
    status_tx: watch::Sender<EngineStatus>,
}

impl Engine {
    pub fn new(config: EngineConfig, feed: Arc<dyn MarketFeed>) -> EngineResult<Self> {
        let scoring = ScoringEngine::new(config.scoring.clone())?;
        let classifier = RegimeClassifier::new(config.regime.clone(), Utc::now())?;
        let tracker = Tracker::new(config.risk.clone())?;
        let screener = Screener::new(config.screening.clone());
        let gate = DecisionGate::new(config.thresholds);
        let feed = FeedClient::new(feed, config.feed_limits.clone());

        let status = EngineStatus {
            tag: config.tag.clone(),
            state: RunState::Idle,
            cycle: 0,
            last_cycle_kind: None,
            last_cycle_at: None,
            regime: classifier.regime(),
            open_positions: 0,
            ledger_len: 0,
            equity: tracker.equity(),
            realized_pnl: 0.0,
            watchlist: Vec::new(),
            updated_at: Utc::now(),
        };
        let (status_tx, _) = watch::channel(status);

        Ok(Self {
            config,
            feed,
            scoring,
            screener,
            gate,
            classifier,
            tracker,
            sinks: Vec::new(),
            csv: None,
            state_store: None,
            status_path: None,
            cycle: 0,
            last_cycle: None,
            watchlist: Vec::new(),
            last_sentiment: None,
            stale: HashMap::new(),
            targets_alerted: HashSet::new(),
            status_tx,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_csv(mut self, csv: CsvPersistence) -> Self {
        self.csv = Some(csv);
        self
    }

    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_path = Some(path.into());
        self
    }

    /// Resume from persisted state
    pub fn restore(&mut self, state: EngineState) -> EngineResult<()> {
        self.classifier = RegimeClassifier::from_state(self.config.regime.clone(), state.regime)?;
        self.tracker = Tracker::restore(self.config.risk.clone(), state.positions, state.ledger)?;
        self.cycle = state.cycle;
        self.last_sentiment = state.last_sentiment;
        self.watchlist = state.watchlist;

        info!(
            cycle = self.cycle,
            regime = %self.classifier.regime(),
            positions = self.tracker.open_count(),
            trades = self.tracker.ledger().len(),
            watchlist = self.watchlist.len(),
            "Engine state restored"
        );
        self.publish_status(RunState::Idle);
        Ok(())
    }

    /// Load and apply the state file, if there is one
    pub fn restore_from_store(&mut self) -> anyhow::Result<bool> {
        let Some(store) = &self.state_store else {
            return Ok(false);
        };
        match store.load()? {
            Some(state) => {
                self.restore(state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn regime_state(&self) -> RegimeState {
        self.classifier.state().clone()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.tracker.open_positions()
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.tracker.ledger_entries()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn watchlist(&self) -> &[InstrumentId] {
        &self.watchlist
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        self.status_tx.borrow().clone()
    }

    /// Everything `restore` needs
    pub fn state(&self) -> EngineState {
        EngineState {
            saved_at: Utc::now(),
            cycle: self.cycle,
            regime: self.classifier.state().clone(),
            positions: self.tracker.open_positions(),
            ledger: self.tracker.ledger_entries(),
            last_sentiment: self.last_sentiment,
            watchlist: self.watchlist.clone(),
        }
    }

    /// Run one cycle. Per-instrument failures are reported, not returned;
    /// only an `InvariantViolation` aborts the cycle.
    pub async fn run_cycle(
        &mut self,
        kind: CycleKind,
        cancel: &watch::Receiver<bool>,
    ) -> EngineResult<CycleReport> {
        self.cycle += 1;
        let cycle = self.cycle;
        let started_at = Utc::now();
        self.publish_status(RunState::Running);

        let regime_before = self.classifier.regime();
        // Availability of every source this cycle touched
        let mut seen: BTreeMap<DataSource, bool> = BTreeMap::new();
        let ids = self.cycle_instruments(kind, &mut seen).await;

        debug!(cycle, %kind, instruments = ids.len(), "Cycle started");

        let last_sentiment = self.last_sentiment;
        let results = {
            let this = &*self;
            join_all(
                ids.iter()
                    .map(|id| this.evaluate(id, regime_before, started_at, last_sentiment)),
            )
            .await
        };

        let mut report = CycleReport {
            cycle,
            kind,
            started_at,
            decisions: Vec::new(),
            skipped: Vec::new(),
            degraded: Vec::new(),
            rejected: Vec::new(),
            closed: Vec::new(),
            alerts: Vec::new(),
            regime_before,
            regime_after: regime_before,
            cancelled: false,
        };
        let mut ranked: Vec<(InstrumentId, f64)> = Vec::new();

        for (id, result) in ids.iter().zip(results) {
            if *cancel.borrow() {
                report.cancelled = true;
                warn!(cycle, %kind, "Cycle cancelled");
                break;
            }

            let eval = match result {
                Ok(eval) => eval,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if matches!(e, EngineError::DataUnavailable { .. }) {
                        seen.insert(DataSource::Instrument(id.clone()), false);
                    }
                    warn!(instrument = %id, error = %e, "Instrument skipped");
                    report.skipped.push(Skipped {
                        instrument: id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            seen.insert(DataSource::Instrument(id.clone()), true);
            self.note_sentiment(eval.snapshot.sentiment);
            let degraded = eval.score.degraded_dimensions();
            if !degraded.is_empty() {
                report.degraded.push((id.clone(), degraded));
            }
            if eval.screened.is_none() {
                ranked.push((id.clone(), eval.score.total()));
            }

            self.apply(kind, eval, &mut report).await?;
        }

        if kind.observes_regime() && !report.cancelled {
            self.observe_regime(started_at, &mut seen, &mut report)
                .await;
        }
        report.regime_after = self.classifier.regime();

        if kind == CycleKind::FullScan && !report.cancelled {
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            self.watchlist = ranked
                .into_iter()
                .take(self.config.watchlist_size)
                .map(|(id, _)| id)
                .collect();
            debug!(watchlist = ?self.watchlist, "Watchlist rebuilt");
        }

        // A successful universe listing is the authority on which instruments remain
        let universe = (seen.get(&DataSource::Universe) == Some(&true)).then_some(ids.as_slice());
        self.track_staleness(seen, universe, &mut report.alerts);

        self.last_cycle = Some((kind, started_at));
        self.save_state();
        self.publish_status(RunState::Idle);

        info!(
            cycle,
            %kind,
            decisions = report.decisions.len(),
            enter = report.count(Action::Enter),
            exit = report.count(Action::Exit),
            skipped = report.skipped.len(),
            degraded = report.degraded.len(),
            alerts = report.alerts.len(),
            regime = %report.regime_after,
            open_positions = self.tracker.open_count(),
            cancelled = report.cancelled,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Instruments evaluated by a cycle of `kind`, open positions always included
    async fn cycle_instruments(
        &self,
        kind: CycleKind,
        seen: &mut BTreeMap<DataSource, bool>,
    ) -> Vec<InstrumentId> {
        let mut ids = match kind {
            CycleKind::FullScan => match self.feed.universe().await {
                Ok(ids) => {
                    seen.insert(DataSource::Universe, true);
                    ids
                }
                Err(e) => {
                    seen.insert(DataSource::Universe, false);
                    warn!(error = %e, "Universe unavailable, scanning watchlist");
                    self.watchlist.clone()
                }
            },
            CycleKind::CatalystRecheck => self.watchlist.clone(),
            CycleKind::RegimeAndPositions => Vec::new(),
        };
        for position in self.tracker.open_positions() {
            ids.push(position.instrument);
        }

        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        ids
    }

    async fn evaluate(
        &self,
        id: &InstrumentId,
        regime: Regime,
        now: DateTime<Utc>,
        last_sentiment: Option<SentimentReading>,
    ) -> EngineResult<Evaluation> {
        let raw = self.feed.instrument(id).await?;
        let snapshot = self
            .config
            .normalizer
            .normalize_instrument(&raw, last_sentiment)?;
        if &snapshot.instrument != id {
            return Err(EngineError::data_unavailable(
                id,
                format!("feed returned a payload for {}", snapshot.instrument),
            ));
        }

        let screened = self.screener.screen(&snapshot);
        let score = self.scoring.score(&snapshot, regime, now)?;
        let cluster = self.scoring.catalyst_cluster(&snapshot, now);

        Ok(Evaluation {
            snapshot,
            score,
            screened,
            cluster,
        })
    }

    /// Mark, decide and apply for one instrument
    async fn apply(
        &mut self,
        kind: CycleKind,
        eval: Evaluation,
        report: &mut CycleReport,
    ) -> EngineResult<()> {
        let Evaluation {
            snapshot,
            score,
            screened,
            cluster,
        } = eval;
        let id = &snapshot.instrument;
        let price = snapshot.latest_price;

        if let Some(csv) = &self.csv {
            if let Err(e) = csv.save_score(&score).await {
                warn!(instrument = %id, error = %e, "Failed to record score");
            }
        }

        let position_id = self.tracker.position(id).map(|p| p.id.clone());
        if let Some(position_id) = position_id {
            if let Some(mark) = self.tracker.mark(id, price, snapshot.timestamp) {
                self.mark_alerts(&position_id, &mark, &mut report.alerts);
            }
        }

        let decision = match (&screened, self.tracker.position(id)) {
            (Some(reason), None) => {
                Decision::avoid_screened(&score, self.classifier.state(), reason, price)
            }
            (_, position) => self
                .gate
                .decide(&score, self.classifier.state(), position, price),
        };

        debug!(
            instrument = %id,
            action = %decision.action,
            score = score.total(),
            reason = %decision.reason,
            "Decision"
        );

        match decision.action {
            Action::Enter => match self.tracker.enter(&decision)? {
                EntryOutcome::Opened(position) => {
                    self.raise(
                        &mut report.alerts,
                        Alert::Opportunity {
                            instrument: position.instrument.clone(),
                            score: position.entry_score,
                            regime: position.entry_regime,
                            price: position.entry_price,
                        },
                    );
                }
                EntryOutcome::Rejected(reason) => report.rejected.push(Skipped {
                    instrument: id.clone(),
                    reason,
                }),
            },
            Action::Exit => {
                let position_id = self.tracker.position(id).map(|p| p.id.clone());
                let entry = self.tracker.exit(&decision)?;
                if let Some(position_id) = position_id {
                    self.targets_alerted.retain(|(pid, _)| pid != &position_id);
                }
                if let Some(csv) = &self.csv {
                    if let Err(e) = csv.save_ledger_entry(&entry).await {
                        warn!(trade_id = %entry.trade_id, error = %e, "Failed to record ledger entry");
                    }
                }
                self.raise(
                    &mut report.alerts,
                    Alert::PositionClosed {
                        instrument: entry.instrument.clone(),
                        trade_id: entry.trade_id.clone(),
                        reason: entry.exit_reason,
                        pnl_pct: entry.pnl_pct,
                    },
                );
                report.closed.push(entry);
            }
            Action::Hold | Action::Avoid => {}
        }

        if kind != CycleKind::RegimeAndPositions && screened.is_none() {
            if let Some(cluster) = cluster {
                self.raise(
                    &mut report.alerts,
                    Alert::CatalystCluster {
                        instrument: id.clone(),
                        cluster,
                    },
                );
            }
        }

        if let Some(csv) = &self.csv {
            if let Err(e) = csv.save_decision(self.cycle, &decision).await {
                warn!(instrument = %id, error = %e, "Failed to record decision");
            }
        }

        report.decisions.push(decision);
        Ok(())
    }

    fn mark_alerts(&mut self, position_id: &str, mark: &MarkReport, alerts: &mut Vec<Alert>) {
        if mark.stop_near {
            self.raise(
                alerts,
                Alert::StopNear {
                    instrument: mark.instrument.clone(),
                    price: mark.price,
                    stop: mark.stop_loss,
                    distance_pct: mark.stop_distance_pct,
                },
            );
        }

        let hits = [
            (mark.target_1_hit, TargetLevel::T1),
            (mark.target_2_hit, TargetLevel::T2),
        ];
        for (hit, level) in hits {
            if hit && self.targets_alerted.insert((position_id.to_string(), level)) {
                self.raise(
                    alerts,
                    Alert::TargetHit {
                        instrument: mark.instrument.clone(),
                        level,
                        price: mark.price,
                        pnl_pct: mark.pnl_pct,
                    },
                );
            }
        }
    }

    async fn observe_regime(
        &mut self,
        now: DateTime<Utc>,
        seen: &mut BTreeMap<DataSource, bool>,
        report: &mut CycleReport,
    ) {
        let raw = match self.feed.market().await {
            Ok(raw) => raw,
            Err(e) => {
                seen.insert(DataSource::Market, false);
                warn!(error = %e, regime = %self.classifier.regime(), "Market data unavailable, regime unchanged");
                return;
            }
        };

        let pulse = self
            .config
            .normalizer
            .normalize_market(&raw, self.last_sentiment, now);
        seen.insert(DataSource::Market, !pulse.sentiment.stale);
        self.note_sentiment(pulse.sentiment);

        if let Some(transition) = self.classifier.observe(&pulse) {
            if let Some(csv) = &self.csv {
                if let Err(e) = csv.save_regime_transition(&transition).await {
                    warn!(error = %e, "Failed to record regime transition");
                }
            }
            self.raise(&mut report.alerts, Alert::RegimeChange(transition));
        }
    }

    /// Keep the freshest non-stale sentiment for carrying forward
    fn note_sentiment(&mut self, reading: SentimentReading) {
        if reading.stale {
            return;
        }
        let newer = self
            .last_sentiment
            .map_or(true, |last| reading.observed_at >= last.observed_at);
        if newer {
            self.last_sentiment = Some(reading);
        }
    }

    /// Advance per-source streaks. Sources not touched this cycle keep their
    /// streak; instruments that left the universe are forgotten.
    fn track_staleness(
        &mut self,
        seen: BTreeMap<DataSource, bool>,
        universe: Option<&[InstrumentId]>,
        alerts: &mut Vec<Alert>,
    ) {
        if let Some(universe) = universe {
            self.stale.retain(|source, _| match source {
                DataSource::Instrument(id) => universe.contains(id),
                _ => true,
            });
        }

        let threshold = self.config.stale_after_cycles;
        let mut raised = Vec::new();
        for (source, available) in seen {
            if available {
                if let Some(streak) = self.stale.remove(&source) {
                    if streak.alerted {
                        info!(%source, cycles = streak.cycles, "Feed data recovered");
                    }
                }
                continue;
            }

            let streak = self.stale.entry(source.clone()).or_default();
            streak.cycles += 1;
            if threshold > 0 && streak.cycles >= threshold && !streak.alerted {
                streak.alerted = true;
                raised.push(Alert::StaleData {
                    source,
                    consecutive_cycles: streak.cycles,
                });
            }
        }

        for alert in raised {
            self.raise(alerts, alert);
        }
    }

    fn raise(&self, alerts: &mut Vec<Alert>, alert: Alert) {
        for sink in &self.sinks {
            sink.emit(&alert);
        }
        alerts.push(alert);
    }

    fn save_state(&self) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.save(&self.state()) {
                warn!(error = %e, "Failed to save engine state");
            }
        }
    }

    fn publish_status(&self, state: RunState) {
        let status = EngineStatus {
            tag: self.config.tag.clone(),
            state,
            cycle: self.cycle,
            last_cycle_kind: self.last_cycle.map(|(kind, _)| kind),
            last_cycle_at: self.last_cycle.map(|(_, at)| at),
            regime: self.classifier.regime(),
            open_positions: self.tracker.open_count(),
            ledger_len: self.tracker.ledger().len(),
            equity: self.tracker.equity(),
            realized_pnl: self.tracker.realized_pnl(),
            watchlist: self.watchlist.clone(),
            updated_at: Utc::now(),
        };

        if let Some(path) = &self.status_path {
            if let Err(e) = write_json(path, &status) {
                warn!(path = %path.display(), error = %e, "Failed to write status file");
            }
        }
        self.status_tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::StaticFeed;

    #[tokio::test]
    async fn test_new_engine_is_idle_and_neutral() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(StaticFeed::new())).unwrap();
        let status = engine.status();
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.regime, Regime::Neutral);
        assert_eq!(status.cycle, 0);
        assert!((status.equity - 1_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_positions_cycle_still_observes_regime() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(StaticFeed::new()));
        let mut engine = engine.unwrap();
        let (_tx, rx) = watch::channel(false);

        let report = engine
            .run_cycle(CycleKind::RegimeAndPositions, &rx)
            .await
            .unwrap();
        assert_eq!(report.cycle, 1);
        assert!(report.decisions.is_empty());
        assert!(!report.cancelled);
        assert_eq!(engine.regime_state().streak, 0);
        assert_eq!(engine.status().last_cycle_kind, Some(CycleKind::RegimeAndPositions));
    }
}
