//! Engine error taxonomy
//!
//! Per-instrument failures (`DataUnavailable`, `ComputationDegraded`) are
//! isolated and logged; `InvariantViolation` aborts the cycle and is surfaced
//! to the process. Application plumbing wraps these with `anyhow::Context`.

use thiserror::Error;

use crate::types::{Dimension, InstrumentId};

#[derive(Error, Debug)]
pub enum EngineError {
    // -- Data ---------------------------------------------------------------
    #[error("data unavailable for {instrument}: {reason}")]
    DataUnavailable {
        instrument: InstrumentId,
        reason: String,
    },

    // -- Scoring ------------------------------------------------------------
    #[error("{dimension} score degraded: {reason}")]
    ComputationDegraded { dimension: Dimension, reason: String },

    // -- Engine state -------------------------------------------------------
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn data_unavailable(instrument: &InstrumentId, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            instrument: instrument.clone(),
            reason: reason.into(),
        }
    }

    pub fn degraded(dimension: Dimension, reason: impl Into<String>) -> Self {
        EngineError::ComputationDegraded {
            dimension,
            reason: reason.into(),
        }
    }

    /// Only invariant violations escalate past a single cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvariantViolation(_))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invariant_violations_are_fatal() {
        let id = InstrumentId::new("sol");
        assert!(!EngineError::data_unavailable(&id, "timeout").is_fatal());
        assert!(!EngineError::degraded(Dimension::Technical, "short series").is_fatal());
        assert!(EngineError::InvariantViolation("two open positions".into()).is_fatal());
    }

    #[test]
    fn messages_name_the_instrument_and_dimension() {
        let id = InstrumentId::new("sol");
        let msg = EngineError::data_unavailable(&id, "timeout").to_string();
        assert_eq!(msg, "data unavailable for SOL: timeout");

        let msg = EngineError::degraded(Dimension::Catalyst, "bad timestamp").to_string();
        assert_eq!(msg, "Catalyst score degraded: bad timestamp");
    }
}
