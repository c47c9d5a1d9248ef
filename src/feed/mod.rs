//! Market feed contract
//!
//! An external collector supplies raw price/news payloads; this module defines
//! the `MarketFeed` trait those collectors implement, the raw payload shapes,
//! the bounded timeout/retry wrapper the engine calls through, and two
//! adapters (a JSON snapshot file and an in-memory feed).

mod json_file;
pub mod normalizer;

pub use json_file::{FeedDocument, JsonFileFeed};
pub use normalizer::Normalizer;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::InstrumentId;

/// Pseudo-instrument used when the market-wide fetch fails
pub const MARKET_ID: &str = "MARKET";

/// Raw news item as delivered by the collector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNewsItem {
    pub title: String,
    /// RFC 3339 timestamp; items that fail to parse are dropped
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub severity: Option<f64>,
    #[serde(default)]
    pub votes_positive: u32,
    #[serde(default)]
    pub votes_negative: u32,
}

/// Raw per-instrument payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInstrumentPayload {
    pub symbol: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Close prices, oldest first; nulls are dropped
    #[serde(default)]
    pub prices: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_7d: Option<f64>,
    #[serde(default)]
    pub news: Option<Vec<RawNewsItem>>,
    /// Fear & greed reading (0-100)
    #[serde(default)]
    pub sentiment: Option<f64>,
}

/// Raw market-wide payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMarketPayload {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fear_greed: Option<f64>,
    /// Benchmark (e.g. BTC) close prices, oldest first
    #[serde(default)]
    pub benchmark_prices: Option<Vec<Option<f64>>>,
}

/// Source of raw market data
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Get the feed name
    fn name(&self) -> &str;

    /// Instruments to evaluate in a full scan
    async fn universe(&self) -> Result<Vec<InstrumentId>>;

    /// Latest payload for one instrument
    async fn fetch_instrument(&self, id: &InstrumentId) -> Result<RawInstrumentPayload>;

    /// Latest market-wide payload
    async fn fetch_market(&self) -> Result<RawMarketPayload>;
}

/// Feed call limits
#[derive(Debug, Clone)]
pub struct FeedLimits {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for FeedLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
        }
    }
}

/// Wraps a `MarketFeed` with per-call timeouts and bounded retries
#[derive(Clone)]
pub struct FeedClient {
    feed: Arc<dyn MarketFeed>,
    limits: FeedLimits,
}

impl FeedClient {
    pub fn new(feed: Arc<dyn MarketFeed>, limits: FeedLimits) -> Self {
        Self { feed, limits }
    }

    pub fn name(&self) -> &str {
        self.feed.name()
    }

    pub async fn universe(&self) -> EngineResult<Vec<InstrumentId>> {
        let feed = self.feed.as_ref();
        self.with_retries(&InstrumentId::new(MARKET_ID), || feed.universe())
            .await
    }

    pub async fn instrument(&self, id: &InstrumentId) -> EngineResult<RawInstrumentPayload> {
        let feed = self.feed.as_ref();
        self.with_retries(id, || feed.fetch_instrument(id)).await
    }

    pub async fn market(&self) -> EngineResult<RawMarketPayload> {
        let feed = self.feed.as_ref();
        self.with_retries(&InstrumentId::new(MARKET_ID), || feed.fetch_market())
            .await
    }

    async fn with_retries<T, F, Fut>(&self, id: &InstrumentId, mut call: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.limits.max_retries + 1;
        let mut last_error = anyhow!("no attempt made");

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.limits.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    debug!(instrument = %id, attempt, error = %e, "Feed call failed");
                    last_error = e;
                }
                Err(_) => {
                    debug!(instrument = %id, attempt, "Feed call timed out");
                    last_error = anyhow!("timed out after {}ms", self.limits.timeout.as_millis());
                }
            }
        }

        warn!(
            instrument = %id,
            feed = self.feed.name(),
            attempts,
            error = %last_error,
            "Feed data unavailable"
        );
        Err(EngineError::data_unavailable(id, format!("{:#}", last_error)))
    }
}

/// In-memory feed, used by tests and for replaying captured payloads
#[derive(Default)]
pub struct StaticFeed {
    universe: RwLock<Vec<InstrumentId>>,
    instruments: RwLock<HashMap<InstrumentId, RawInstrumentPayload>>,
    market: RwLock<RawMarketPayload>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a payload; new instruments join the universe
    pub async fn set_instrument(&self, payload: RawInstrumentPayload) {
        let id = InstrumentId::new(&payload.symbol);
        let mut universe = self.universe.write().await;
        if !universe.contains(&id) {
            universe.push(id.clone());
        }
        self.instruments.write().await.insert(id, payload);
    }

    /// Drop the payload but keep the instrument in the universe
    pub async fn clear_instrument(&self, id: &InstrumentId) {
        self.instruments.write().await.remove(id);
    }

    pub async fn set_market(&self, payload: RawMarketPayload) {
        *self.market.write().await = payload;
    }
}

#[async_trait]
impl MarketFeed for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn universe(&self) -> Result<Vec<InstrumentId>> {
        Ok(self.universe.read().await.clone())
    }

    async fn fetch_instrument(&self, id: &InstrumentId) -> Result<RawInstrumentPayload> {
        self.instruments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("no payload for {}", id))
    }

    async fn fetch_market(&self) -> Result<RawMarketPayload> {
        Ok(self.market.read().await.clone())
    }
}
