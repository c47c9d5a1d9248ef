//! Configuration management for Striker
//!
//! Loads built-in defaults, optional TOML files and environment variables
//! (prefix `STRIKER`, separator `__`) after reading `.env`.

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::decision::{GateConfig, RegimeThresholds};
use crate::engine::EngineConfig;
use crate::feed::{FeedLimits, Normalizer};
use crate::regime::RegimeConfig;
use crate::scheduler::Schedule;
use crate::scoring::{ScoringConfig, ScoringEngine};
use crate::screening::ScreeningConfig;
use crate::tracker::RiskConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub feed: FeedSettings,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub screening: ScreeningConfig,
    pub regime: RegimeConfig,
    pub gate: GateConfig,
    pub risk: RiskConfig,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (STRIKER__SECTION__KEY)
            .add_source(Self::environment())
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Environment source; `__` separates the prefix as well as nested keys
    fn environment() -> Environment {
        Environment::with_prefix("STRIKER").separator("__")
    }

    /// Builder holding every built-in default
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Engine defaults
            .set_default("engine.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("engine.data_dir", "./data")?
            .set_default("engine.watchlist_size", 10)?
            // Feed defaults
            .set_default("feed.snapshot_path", "./data/snapshot.json")?
            .set_default("feed.timeout_ms", 10_000)?
            .set_default("feed.max_retries", 2)?
            .set_default("feed.stale_after_cycles", 3)?
            .set_default("feed.trend_fast", 7)?
            .set_default("feed.trend_slow", 21)?
            .set_default("feed.trend_scale", 0.05)?
            // Regime defaults
            .set_default("regime.bear_below", 35.0)?
            .set_default("regime.bull_at_or_above", 65.0)?
            .set_default("regime.hysteresis_window", 3)?
            // Gate defaults
            .set_default("gate.entry_bear", 130.0)?
            .set_default("gate.entry_neutral", 95.0)?
            .set_default("gate.entry_bull", 90.0)?
            .set_default("gate.exit_bear", 90.0)?
            .set_default("gate.exit_neutral", 70.0)?
            .set_default("gate.exit_bull", 60.0)?
            // Risk defaults
            .set_default("risk.starting_capital", 1000.0)?
            .set_default("risk.stop_loss_pct", 0.10)?
            .set_default("risk.position_size_pct", 0.10)?
            .set_default("risk.min_position_size", 10.0)?
            .set_default("risk.max_open_positions", 5)?
            .set_default("risk.stop_near_pct", 0.03)?
            .set_default("risk.target_r_multiples", vec![1.5, 3.0])?
            // Scheduler defaults (00:00 UTC = 08:00 AWST)
            .set_default("scheduler.daily_scan_time", "00:00")?
            .set_default("scheduler.catalyst_interval_secs", 3600)?
            .set_default("scheduler.regime_interval_secs", 21600)?
            .set_default("scheduler.run_initial_checks", true)?
            // Logging defaults
            .set_default("logging.json", false)?
            .set_default("logging.filter", "striker=info")?
            // Persistence defaults
            .set_default("persistence.csv_enabled", true)?
            .set_default("persistence.state_file", "engine_state.json")?
            .set_default("persistence.status_file", "status.json")?;
        Ok(builder)
    }

    /// Check every invariant and produce the typed engine configuration
    pub fn validate(&self) -> Result<EngineConfig> {
        // Weight sums are checked by the scoring engine constructor
        ScoringEngine::new(self.scoring.clone()).context("Invalid scoring configuration")?;
        self.regime
            .validate()
            .context("Invalid regime configuration")?;
        self.risk.validate().context("Invalid risk configuration")?;
        let thresholds =
            RegimeThresholds::new(&self.gate).context("Invalid gate configuration")?;

        if self.feed.timeout_ms == 0 {
            anyhow::bail!("feed.timeout_ms must be positive");
        }
        if self.feed.trend_fast == 0 || self.feed.trend_fast >= self.feed.trend_slow {
            anyhow::bail!(
                "feed trend periods must satisfy 0 < trend_fast ({}) < trend_slow ({})",
                self.feed.trend_fast,
                self.feed.trend_slow
            );
        }

        Ok(EngineConfig {
            tag: self.engine.tag.clone(),
            scoring: self.scoring.clone(),
            screening: self.screening.clone(),
            regime: self.regime.clone(),
            thresholds,
            risk: self.risk.clone(),
            normalizer: Normalizer {
                trend_fast: self.feed.trend_fast,
                trend_slow: self.feed.trend_slow,
                trend_scale: self.feed.trend_scale,
            },
            feed_limits: FeedLimits {
                timeout: Duration::from_millis(self.feed.timeout_ms),
                max_retries: self.feed.max_retries,
            },
            stale_after_cycles: self.feed.stale_after_cycles,
            watchlist_size: self.engine.watchlist_size,
        })
    }

    /// Parsed scheduler cadences
    pub fn schedule(&self) -> Result<Schedule> {
        Schedule::from_settings(&self.scheduler).context("Invalid scheduler configuration")
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.engine.data_dir)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join(&self.persistence.state_file)
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir().join(&self.persistence.status_file)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} feed={} scan={} UTC window={} stop={:.0}% entry(bear/neutral/bull)={}/{}/{}",
            self.engine.tag,
            self.feed.snapshot_path,
            self.scheduler.daily_scan_time,
            self.regime.hysteresis_window,
            self.risk.stop_loss_pct * 100.0,
            self.gate.entry_bear,
            self.gate.entry_neutral,
            self.gate.entry_bull
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Regime;

    fn from_defaults() -> AppConfig {
        AppConfig::defaults()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let cfg = from_defaults();
        let engine = cfg.validate().unwrap();
        assert_eq!(engine.thresholds.entry(Regime::Bear), 130.0);
        assert_eq!(engine.thresholds.exit(Regime::Bull), 60.0);
        assert_eq!(engine.regime.hysteresis_window, 3);
        assert_eq!(engine.risk.target_r_multiples, [1.5, 3.0]);
        assert_eq!(engine.feed_limits.timeout, Duration::from_secs(10));
        assert!(cfg.screening.enabled);
        assert_eq!(cfg.status_path(), PathBuf::from("./data").join("status.json"));
    }

    #[test]
    fn test_inverted_entry_thresholds_rejected() {
        let cfg: AppConfig = AppConfig::defaults()
            .unwrap()
            .set_override("gate.entry_bear", 80.0)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_environment_overrides_use_double_underscore() {
        let vars: config::Map<String, String> = [
            ("STRIKER__GATE__ENTRY_BEAR".to_string(), "140".to_string()),
            ("STRIKER_GATE__EXIT_BEAR".to_string(), "10".to_string()),
        ]
        .into_iter()
        .collect();
        let cfg: AppConfig = AppConfig::defaults()
            .unwrap()
            .add_source(AppConfig::environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.gate.entry_bear, 140.0);
        // Single underscore after the prefix is not picked up
        assert_eq!(cfg.gate.exit_bear, 90.0);
    }

    #[test]
    fn test_overweight_scoring_rejected() {
        let mut cfg = from_defaults();
        cfg.scoring.narrative.weight = 25.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_schedule_parses_daily_time() {
        let cfg = from_defaults();
        let schedule = cfg.schedule().unwrap();
        assert_eq!(schedule.catalyst_interval, Duration::from_secs(3600));
        assert_eq!(schedule.regime_interval, Duration::from_secs(21600));

        let mut bad = cfg.clone();
        bad.scheduler.daily_scan_time = "25:99".into();
        assert!(bad.schedule().is_err());
    }
}
