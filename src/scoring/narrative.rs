//! Narrative dimension (max 20)
//!
//! Tags news titles against bullish and bearish lexicons. With no tagged
//! coverage the score sits at `baseline`; as tagged mentions accumulate it
//! moves toward the bullish share.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::factor;
use crate::error::{EngineError, EngineResult};
use crate::types::{CatalystEvent, Dimension, SubScore};

const BULLISH_TERMS: &[&str] = &[
    "partnership", "launch", "mainnet", "upgrade", "listing", "adoption", "integration",
    "etf", "approval", "staking", "airdrop", "record", "surge", "rally", "breakout", "ai",
    "rwa", "layer 2", "institutional", "bullish",
];

const BEARISH_TERMS: &[&str] = &[
    "hack", "exploit", "lawsuit", "sec", "delist", "outage", "rug", "scam", "ban", "crash",
    "dump", "unlock", "investigation", "bankruptcy", "bearish", "selloff",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub weight: f64,
    /// Share of the weight awarded with no tagged coverage
    pub baseline: f64,
    /// Tagged mentions needed for full coverage
    pub full_coverage_mentions: usize,
    /// Only titles newer than this are read
    pub lookback_hours: f64,
    pub bullish_terms: Vec<String>,
    pub bearish_terms: Vec<String>,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            weight: 20.0,
            baseline: 0.5,
            full_coverage_mentions: 4,
            lookback_hours: 168.0,
            bullish_terms: BULLISH_TERMS.iter().map(|s| s.to_string()).collect(),
            bearish_terms: BEARISH_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NarrativeConfig {
    pub(super) fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.baseline) {
            return Err(EngineError::Config(format!(
                "narrative baseline {} outside [0, 1]",
                self.baseline
            )));
        }
        if self.full_coverage_mentions == 0 {
            return Err(EngineError::Config(
                "narrative full_coverage_mentions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Whole-word (or whole-phrase) match on a lower-cased title
fn mentions(title: &str, term: &str) -> bool {
    let term = term.to_lowercase();
    let needle: Vec<&str> = term.split_whitespace().collect();
    if needle.is_empty() {
        return false;
    }
    let words: Vec<&str> = title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    words.windows(needle.len()).any(|w| w == needle.as_slice())
}

pub fn score(
    config: &NarrativeConfig,
    events: &[CatalystEvent],
    now: DateTime<Utc>,
) -> EngineResult<SubScore> {
    let mut bullish = 0usize;
    let mut bearish = 0usize;

    for event in events
        .iter()
        .filter(|e| e.age_hours(now) < config.lookback_hours)
    {
        let title = event.title.to_lowercase();
        bullish += config
            .bullish_terms
            .iter()
            .filter(|t| mentions(&title, t))
            .count();
        bearish += config
            .bearish_terms
            .iter()
            .filter(|t| mentions(&title, t))
            .count();
    }

    let tagged = bullish + bearish;
    let (fraction, detail) = if tagged == 0 {
        (config.baseline, "no tagged coverage".to_string())
    } else {
        let share = bullish as f64 / tagged as f64;
        let coverage = (tagged as f64 / config.full_coverage_mentions as f64).min(1.0);
        (
            config.baseline * (1.0 - coverage) + share * coverage,
            format!("{} bullish / {} bearish mentions", bullish, bearish),
        )
    };

    let points = config.weight * fraction.clamp(0.0, 1.0);
    SubScore::new(
        Dimension::Narrative,
        points,
        vec![factor("Narrative", detail, "", points)],
    )
}
