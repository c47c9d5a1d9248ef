//! Snapshot-file feed
//!
//! Reads a JSON document that an external collector rewrites on its own
//! schedule. The file is re-read on every call so the engine always sees the
//! collector's latest write.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{MarketFeed, RawInstrumentPayload, RawMarketPayload};
use crate::types::InstrumentId;

/// On-disk layout written by the collector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedDocument {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub market: RawMarketPayload,
    #[serde(default)]
    pub instruments: Vec<RawInstrumentPayload>,
}

pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<FeedDocument> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read feed file {}", self.path.display()))?;
        let doc: FeedDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse feed file {}", self.path.display()))?;
        Ok(doc)
    }
}

#[async_trait]
impl MarketFeed for JsonFileFeed {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn universe(&self) -> Result<Vec<InstrumentId>> {
        let doc = self.read().await?;
        let mut ids: Vec<InstrumentId> = Vec::with_capacity(doc.instruments.len());
        for payload in &doc.instruments {
            let id = InstrumentId::new(&payload.symbol);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn fetch_instrument(&self, id: &InstrumentId) -> Result<RawInstrumentPayload> {
        let doc = self.read().await?;
        doc.instruments
            .into_iter()
            .find(|p| InstrumentId::new(&p.symbol) == *id)
            .ok_or_else(|| anyhow!("{} not present in {}", id, self.path.display()))
    }

    async fn fetch_market(&self) -> Result<RawMarketPayload> {
        let doc = self.read().await?;
        let mut market = doc.market;
        if market.timestamp.is_none() {
            market.timestamp = doc.generated_at;
        }
        Ok(market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("striker_feed_{}_{}.json", test_name, uuid::Uuid::new_v4()))
    }

    const DOC: &str = r#"{
        "generated_at": "2024-03-01T00:00:00Z",
        "market": { "fear_greed": 41 },
        "instruments": [
            { "symbol": "sol", "timestamp": "2024-03-01T00:00:00Z", "prices": [1.0, 2.0, null] },
            { "symbol": "ADA", "timestamp": "2024-03-01T00:00:00Z" }
        ]
    }"#;

    #[tokio::test]
    async fn test_reads_collector_document() {
        let path = temp_file("reads");
        tokio::fs::write(&path, DOC).await.unwrap();
        let feed = JsonFileFeed::new(&path);

        let universe = feed.universe().await.unwrap();
        assert_eq!(universe, vec![InstrumentId::new("SOL"), InstrumentId::new("ADA")]);

        let sol = feed.fetch_instrument(&InstrumentId::new("SOL")).await.unwrap();
        assert_eq!(sol.prices.unwrap().len(), 3);
        assert!(feed.fetch_instrument(&InstrumentId::new("DOT")).await.is_err());

        let market = feed.fetch_market().await.unwrap();
        assert_eq!(market.fear_greed, Some(41.0));
        assert!(market.timestamp.is_some());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let feed = JsonFileFeed::new(temp_file("missing"));
        let err = feed.fetch_market().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read feed file"));
    }
}
