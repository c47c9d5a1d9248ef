//! Cooperative scheduler
//!
//! Three independent timers issue cycle ticks: the daily full scan at a fixed
//! UTC time, the hourly catalyst re-check and the six-hourly regime and
//! position re-evaluation. Each tick runs one bounded engine cycle; nothing
//! runs in the background between ticks.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::SchedulerSettings;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Whole universe, rebuilds the watchlist, observes the regime
    FullScan,
    /// Watchlist and open positions, no regime observation
    CatalystRecheck,
    /// Open positions only, observes the regime
    RegimeAndPositions,
}

impl CycleKind {
    pub fn observes_regime(&self) -> bool {
        !matches!(self, CycleKind::CatalystRecheck)
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleKind::FullScan => write!(f, "full_scan"),
            CycleKind::CatalystRecheck => write!(f, "catalyst_recheck"),
            CycleKind::RegimeAndPositions => write!(f, "regime_and_positions"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    /// UTC time of day for the full scan
    pub daily_scan_at: NaiveTime,
    pub catalyst_interval: Duration,
    pub regime_interval: Duration,
    pub run_initial_checks: bool,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            daily_scan_at: NaiveTime::MIN,
            catalyst_interval: Duration::from_secs(3600),
            regime_interval: Duration::from_secs(6 * 3600),
            run_initial_checks: true,
        }
    }
}

impl Schedule {
    pub fn from_settings(settings: &SchedulerSettings) -> EngineResult<Self> {
        let daily_scan_at = NaiveTime::parse_from_str(&settings.daily_scan_time, "%H:%M")
            .map_err(|e| {
                EngineError::Config(format!(
                    "daily_scan_time '{}' is not HH:MM: {}",
                    settings.daily_scan_time, e
                ))
            })?;
        if settings.catalyst_interval_secs == 0 || settings.regime_interval_secs == 0 {
            return Err(EngineError::Config(
                "scheduler intervals must be positive".into(),
            ));
        }
        Ok(Self {
            daily_scan_at,
            catalyst_interval: Duration::from_secs(settings.catalyst_interval_secs),
            regime_interval: Duration::from_secs(settings.regime_interval_secs),
            run_initial_checks: settings.run_initial_checks,
        })
    }

    /// First daily scan strictly after `after`
    pub fn next_daily_scan(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let today = after.date_naive().and_time(self.daily_scan_at).and_utc();
        if today > after {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }
}

/// Drive `engine` until `shutdown` flips to true.
///
/// Non-fatal cycle failures are logged and the loop carries on; an
/// `InvariantViolation` stops the scheduler and is returned.
pub async fn run(
    engine: &mut Engine,
    schedule: &Schedule,
    mut shutdown: watch::Receiver<bool>,
) -> EngineResult<()> {
    info!(
        daily_scan = %schedule.daily_scan_at,
        catalyst_secs = schedule.catalyst_interval.as_secs(),
        regime_secs = schedule.regime_interval.as_secs(),
        "Scheduler starting"
    );

    let start = Instant::now();
    let mut catalyst_timer = interval_at(
        start + schedule.catalyst_interval,
        schedule.catalyst_interval,
    );
    catalyst_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut regime_timer = interval_at(start + schedule.regime_interval, schedule.regime_interval);
    regime_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if *shutdown.borrow() {
        return Ok(());
    }

    if schedule.run_initial_checks {
        run_tick(engine, CycleKind::RegimeAndPositions, &shutdown).await?;
    }

    let mut next_scan = schedule.next_daily_scan(Utc::now());
    info!(next_scan = %next_scan, "Next full scan scheduled");

    loop {
        let wait = (next_scan - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let kind = tokio::select! {
            _ = tokio::time::sleep(wait) => {
                next_scan = schedule.next_daily_scan(next_scan);
                CycleKind::FullScan
            }
            _ = catalyst_timer.tick() => CycleKind::CatalystRecheck,
            _ = regime_timer.tick() => CycleKind::RegimeAndPositions,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        run_tick(engine, kind, &shutdown).await?;

        if kind == CycleKind::FullScan {
            info!(next_scan = %next_scan, "Next full scan scheduled");
        }
    }

    info!("Scheduler stopped");
    Ok(())
}

async fn run_tick(
    engine: &mut Engine,
    kind: CycleKind,
    shutdown: &watch::Receiver<bool>,
) -> EngineResult<()> {
    match engine.run_cycle(kind, shutdown).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => {
            error!(%kind, error = %e, "Cycle aborted");
            Err(e)
        }
        Err(e) => {
            error!(%kind, error = %e, "Cycle failed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_next_daily_scan_later_today() {
        let schedule = Schedule {
            daily_scan_at: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            ..Default::default()
        };
        assert_eq!(schedule.next_daily_scan(at(6, 0, 0)), at(8, 30, 0));
    }

    #[test]
    fn test_next_daily_scan_rolls_to_tomorrow() {
        let schedule = Schedule::default();
        let next = schedule.next_daily_scan(at(0, 0, 0));
        assert_eq!(next, at(0, 0, 0) + chrono::Duration::days(1));

        let next = schedule.next_daily_scan(at(23, 59, 59));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_from_settings() {
        let settings = SchedulerSettings {
            daily_scan_time: "00:00".into(),
            catalyst_interval_secs: 3600,
            regime_interval_secs: 21600,
            run_initial_checks: true,
        };
        let schedule = Schedule::from_settings(&settings).unwrap();
        assert_eq!(schedule.daily_scan_at, NaiveTime::MIN);

        let zero = SchedulerSettings {
            catalyst_interval_secs: 0,
            ..settings
        };
        assert!(Schedule::from_settings(&zero).is_err());
    }

    #[test]
    fn test_only_catalyst_recheck_skips_regime() {
        assert!(CycleKind::FullScan.observes_regime());
        assert!(CycleKind::RegimeAndPositions.observes_regime());
        assert!(!CycleKind::CatalystRecheck.observes_regime());
        assert_eq!(CycleKind::CatalystRecheck.to_string(), "catalyst_recheck");
    }
}
