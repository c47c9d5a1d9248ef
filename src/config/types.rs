//! Configuration sections that have no engine-side counterpart

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Version tag for logging and the status file
    pub tag: String,
    /// Directory for CSV records, state and status files
    pub data_dir: String,
    /// Instruments kept for hourly catalyst re-checks after a full scan
    pub watchlist_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    /// Snapshot document written by the external collector
    pub snapshot_path: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Extra attempts per call within one cycle
    pub max_retries: u32,
    /// Consecutive cycles with unavailable data before a stale-data alert
    pub stale_after_cycles: u32,
    /// Benchmark trend EMA periods
    pub trend_fast: usize,
    pub trend_slow: usize,
    /// EMA spread that maps to tanh(1)
    pub trend_scale: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// UTC time of the daily full scan, "HH:MM"
    pub daily_scan_time: String,
    pub catalyst_interval_secs: u64,
    pub regime_interval_secs: u64,
    /// Run a regime and position check right after start-up
    pub run_initial_checks: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the compact human format
    pub json: bool,
    /// Filter used when RUST_LOG is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "striker=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Enable CSV records
    pub csv_enabled: bool,
    /// Engine state file, relative to the data directory
    pub state_file: String,
    /// Status file, relative to the data directory
    pub status_file: String,
}
