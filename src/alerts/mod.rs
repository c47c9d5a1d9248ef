//! Alerts raised by engine cycles
//!
//! Notification transport lives outside the engine; an `AlertSink` receives
//! each alert as it is raised. `LogSink` writes them to the tracing output and
//! `ChannelSink` forwards them to whatever notifier is listening.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::regime::RegimeTransition;
use crate::scoring::CatalystCluster;
use crate::types::{ExitReason, InstrumentId, Regime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetLevel {
    T1,
    T2,
}

impl fmt::Display for TargetLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetLevel::T1 => write!(f, "T1"),
            TargetLevel::T2 => write!(f, "T2"),
        }
    }
}

/// Feed input whose availability is tracked across cycles
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Universe,
    Market,
    Instrument(InstrumentId),
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Universe => write!(f, "universe"),
            DataSource::Market => write!(f, "market"),
            DataSource::Instrument(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    Opportunity {
        instrument: InstrumentId,
        score: f64,
        regime: Regime,
        price: f64,
    },
    CatalystCluster {
        instrument: InstrumentId,
        cluster: CatalystCluster,
    },
    StopNear {
        instrument: InstrumentId,
        price: f64,
        stop: f64,
        distance_pct: f64,
    },
    TargetHit {
        instrument: InstrumentId,
        level: TargetLevel,
        price: f64,
        pnl_pct: f64,
    },
    PositionClosed {
        instrument: InstrumentId,
        trade_id: String,
        reason: ExitReason,
        pnl_pct: f64,
    },
    RegimeChange(RegimeTransition),
    StaleData {
        source: DataSource,
        consecutive_cycles: u32,
    },
}

impl Alert {
    /// Instrument the alert concerns, if any
    pub fn instrument(&self) -> Option<&InstrumentId> {
        match self {
            Alert::Opportunity { instrument, .. }
            | Alert::CatalystCluster { instrument, .. }
            | Alert::StopNear { instrument, .. }
            | Alert::TargetHit { instrument, .. }
            | Alert::PositionClosed { instrument, .. } => Some(instrument),
            Alert::StaleData {
                source: DataSource::Instrument(instrument),
                ..
            } => Some(instrument),
            Alert::RegimeChange(_) | Alert::StaleData { .. } => None,
        }
    }

    /// Alerts that call for attention rather than information
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Alert::StopNear { .. } | Alert::StaleData { .. } | Alert::RegimeChange(_)
        )
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::Opportunity {
                instrument,
                score,
                regime,
                price,
            } => write!(
                f,
                "opportunity: {} scored {:.1}/160 in {} at {:.4}",
                instrument, score, regime, price
            ),
            Alert::CatalystCluster {
                instrument,
                cluster,
            } => write!(
                f,
                "catalyst cluster: {} +{} / -{} news, strength {:.0}%",
                instrument,
                cluster.positive,
                cluster.negative,
                cluster.strength * 100.0
            ),
            Alert::StopNear {
                instrument,
                price,
                stop,
                distance_pct,
            } => write!(
                f,
                "stop-loss warning: {} at {:.4}, stop {:.4} ({:.1}% away)",
                instrument, price, stop, distance_pct
            ),
            Alert::TargetHit {
                instrument,
                level,
                price,
                pnl_pct,
            } => write!(
                f,
                "target hit: {} reached {} at {:.4} ({:+.1}%)",
                instrument, level, price, pnl_pct
            ),
            Alert::PositionClosed {
                instrument,
                trade_id,
                reason,
                pnl_pct,
            } => write!(
                f,
                "position closed: {} {} on {} ({:+.1}%)",
                trade_id, instrument, reason, pnl_pct
            ),
            Alert::RegimeChange(t) => write!(
                f,
                "regime change: {} -> {} (sentiment {:.0}, trend {:+.2})",
                t.from, t.to, t.sentiment, t.trend
            ),
            Alert::StaleData {
                source,
                consecutive_cycles,
            } => write!(
                f,
                "stale data: {} unavailable for {} consecutive cycles",
                source, consecutive_cycles
            ),
        }
    }
}

/// Receiver of engine alerts
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert);
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn emit(&self, alert: &Alert) {
        let instrument = alert.instrument().map(|i| i.as_str()).unwrap_or("-");
        if alert.is_warning() {
            warn!(instrument, alert = %alert, "ALERT");
        } else {
            info!(instrument, alert = %alert, "ALERT");
        }
    }
}

/// Forwards alerts over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn emit(&self, alert: &Alert) {
        if self.tx.send(alert.clone()).is_err() {
            warn!("Alert receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_classification() {
        let alert = Alert::StopNear {
            instrument: InstrumentId::new("SOL"),
            price: 92.0,
            stop: 90.0,
            distance_pct: 2.17,
        };
        assert!(alert.is_warning());
        assert_eq!(alert.instrument(), Some(&InstrumentId::new("SOL")));
        assert!(alert.to_string().starts_with("stop-loss warning: SOL"));

        let stale = Alert::StaleData {
            source: DataSource::Market,
            consecutive_cycles: 3,
        };
        assert!(stale.instrument().is_none());
        assert_eq!(
            stale.to_string(),
            "stale data: market unavailable for 3 consecutive cycles"
        );

        let stale = Alert::StaleData {
            source: DataSource::Instrument(InstrumentId::new("DOT")),
            consecutive_cycles: 2,
        };
        assert_eq!(stale.instrument(), Some(&InstrumentId::new("DOT")));
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(&Alert::StaleData {
            source: DataSource::Universe,
            consecutive_cycles: 4,
        });
        let got = rx.recv().await.unwrap();
        assert!(matches!(got, Alert::StaleData { consecutive_cycles: 4, .. }));
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let alert = Alert::TargetHit {
            instrument: InstrumentId::new("ada"),
            level: TargetLevel::T1,
            price: 1.15,
            pnl_pct: 15.0,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "target_hit");
        assert_eq!(json["instrument"], "ADA");
    }
}
