//! Striker Library
//!
//! Regime-gated opportunity scoring and position monitoring for crypto
//! instruments.

pub mod alerts;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod features;
pub mod feed;
pub mod logging;
pub mod persistence;
pub mod regime;
pub mod scheduler;
pub mod scoring;
pub mod screening;
pub mod tracker;
pub mod types;

pub use engine::{CycleReport, Engine, EngineConfig, EngineStatus};
pub use error::{EngineError, EngineResult};
