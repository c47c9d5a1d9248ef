//! Signal normalizer: raw payloads into canonical snapshots

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{RawInstrumentPayload, RawMarketPayload, RawNewsItem};
use crate::error::{EngineError, EngineResult};
use crate::features::{pct_change, trend_signal};
use crate::types::{CatalystEvent, InstrumentId, InstrumentSnapshot, MarketPulse, SentimentReading};

/// Neutral sentiment used when no reading has ever been seen
const NEUTRAL_SENTIMENT: f64 = 50.0;
const DEFAULT_SEVERITY: f64 = 0.5;

/// Benchmark trend parameters
#[derive(Debug, Clone)]
pub struct Normalizer {
    pub trend_fast: usize,
    pub trend_slow: usize,
    /// EMA spread that maps to tanh(1)
    pub trend_scale: f64,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            trend_fast: 7,
            trend_slow: 21,
            trend_scale: 0.05,
        }
    }
}

impl Normalizer {
    /// Build an `InstrumentSnapshot`, or `DataUnavailable` when the price
    /// series or timestamp is missing.
    pub fn normalize_instrument(
        &self,
        raw: &RawInstrumentPayload,
        last_sentiment: Option<SentimentReading>,
    ) -> EngineResult<InstrumentSnapshot> {
        let instrument = InstrumentId::new(&raw.symbol);

        let timestamp = raw
            .timestamp
            .ok_or_else(|| EngineError::data_unavailable(&instrument, "missing timestamp"))?;

        let prices = clean_series(raw.prices.as_deref())
            .ok_or_else(|| EngineError::data_unavailable(&instrument, "missing price series"))?;

        let latest_price = raw
            .current_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .or_else(|| prices.last().copied())
            .ok_or_else(|| EngineError::data_unavailable(&instrument, "no usable price"))?;

        let change_24h_pct = raw
            .price_change_percentage_24h
            .filter(|c| c.is_finite())
            .or_else(|| pct_change(&prices, 1))
            .unwrap_or(0.0);
        let change_7d_pct = raw
            .price_change_percentage_7d
            .filter(|c| c.is_finite())
            .or_else(|| pct_change(&prices, 7))
            .unwrap_or(0.0);

        let events = raw
            .news
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|item| parse_event(&instrument, item))
            .collect();

        Ok(InstrumentSnapshot {
            instrument,
            timestamp,
            prices,
            latest_price,
            volume_24h: raw
                .total_volume
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(0.0),
            market_cap: raw.market_cap.filter(|m| m.is_finite() && *m > 0.0),
            market_cap_rank: raw.market_cap_rank,
            change_24h_pct,
            change_7d_pct,
            events,
            sentiment: sentiment_reading(raw.sentiment, timestamp, last_sentiment),
        })
    }

    /// Build the market pulse for the regime classifier. Never fails: missing
    /// inputs degrade to stale sentiment and an unavailable trend.
    pub fn normalize_market(
        &self,
        raw: &RawMarketPayload,
        last_sentiment: Option<SentimentReading>,
        now: DateTime<Utc>,
    ) -> MarketPulse {
        let timestamp = raw.timestamp.unwrap_or(now);
        let trend = clean_series(raw.benchmark_prices.as_deref()).and_then(|prices| {
            trend_signal(&prices, self.trend_fast, self.trend_slow, self.trend_scale)
        });

        MarketPulse {
            timestamp,
            sentiment: sentiment_reading(raw.fear_greed, timestamp, last_sentiment),
            trend,
        }
    }
}

/// Drop nulls and non-positive/non-finite points; None when nothing usable remains
fn clean_series(raw: Option<&[Option<f64>]>) -> Option<Vec<f64>> {
    let prices: Vec<f64> = raw?
        .iter()
        .flatten()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    if prices.is_empty() {
        None
    } else {
        Some(prices)
    }
}

fn sentiment_reading(
    value: Option<f64>,
    at: DateTime<Utc>,
    last: Option<SentimentReading>,
) -> SentimentReading {
    match value.filter(|v| v.is_finite()) {
        Some(v) => SentimentReading {
            value: v.clamp(0.0, 100.0),
            observed_at: at,
            stale: false,
        },
        None => match last {
            Some(prev) => SentimentReading {
                stale: true,
                ..prev
            },
            None => SentimentReading {
                value: NEUTRAL_SENTIMENT,
                observed_at: at,
                stale: true,
            },
        },
    }
}

fn parse_event(instrument: &InstrumentId, item: &RawNewsItem) -> Option<CatalystEvent> {
    let title = item.title.trim();
    if title.is_empty() {
        return None;
    }
    let published_at = match item
        .published_at
        .as_deref()
        .map(DateTime::parse_from_rfc3339)
    {
        Some(Ok(ts)) => ts.with_timezone(&Utc),
        _ => {
            debug!(instrument = %instrument, title, "Dropping news item without valid timestamp");
            return None;
        }
    };

    Some(CatalystEvent {
        title: title.to_string(),
        published_at,
        severity: item
            .severity
            .filter(|s| s.is_finite())
            .unwrap_or(DEFAULT_SEVERITY)
            .clamp(0.0, 1.0),
        votes_positive: item.votes_positive,
        votes_negative: item.votes_negative,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn payload() -> RawInstrumentPayload {
        RawInstrumentPayload {
            symbol: "sol".into(),
            timestamp: Some(ts()),
            prices: Some((0..10).map(|i| Some(100.0 + i as f64)).collect()),
            total_volume: Some(5_000_000.0),
            market_cap: Some(50_000_000.0),
            market_cap_rank: Some(12),
            sentiment: Some(62.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_series_is_data_unavailable() {
        let mut raw = payload();
        raw.prices = None;
        let err = Normalizer::default().normalize_instrument(&raw, None).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));

        raw.prices = Some(vec![None, Some(f64::NAN)]);
        assert!(Normalizer::default().normalize_instrument(&raw, None).is_err());
    }

    #[test]
    fn test_missing_timestamp_is_data_unavailable() {
        let mut raw = payload();
        raw.timestamp = None;
        let err = Normalizer::default().normalize_instrument(&raw, None).unwrap_err();
        assert!(err.to_string().contains("missing timestamp"));
    }

    #[test]
    fn test_empty_news_and_derived_changes() {
        let snap = Normalizer::default().normalize_instrument(&payload(), None).unwrap();
        assert_eq!(snap.instrument.as_str(), "SOL");
        assert!(snap.events.is_empty());
        assert_eq!(snap.latest_price, 109.0);
        assert!((snap.change_24h_pct - (109.0 - 108.0) / 108.0 * 100.0).abs() < 1e-9);
        assert!((snap.change_7d_pct - (109.0 - 102.0) / 102.0 * 100.0).abs() < 1e-9);
        assert!(!snap.sentiment.stale);
    }

    #[test]
    fn test_sentiment_falls_back_to_last_known() {
        let mut raw = payload();
        raw.sentiment = None;
        let last = SentimentReading {
            value: 22.0,
            observed_at: ts() - chrono::Duration::hours(6),
            stale: false,
        };

        let snap = Normalizer::default().normalize_instrument(&raw, Some(last)).unwrap();
        assert_eq!(snap.sentiment.value, 22.0);
        assert!(snap.sentiment.stale);

        let snap = Normalizer::default().normalize_instrument(&raw, None).unwrap();
        assert_eq!(snap.sentiment.value, 50.0);
        assert!(snap.sentiment.stale);
    }

    #[test]
    fn test_news_items_are_parsed_and_bad_ones_dropped() {
        let mut raw = payload();
        raw.news = Some(vec![
            RawNewsItem {
                title: "Mainnet upgrade goes live".into(),
                published_at: Some("2024-02-29T12:00:00Z".into()),
                severity: Some(3.0),
                votes_positive: 4,
                votes_negative: 0,
            },
            RawNewsItem {
                title: "No date".into(),
                published_at: Some("yesterday".into()),
                ..Default::default()
            },
        ]);
        let snap = Normalizer::default().normalize_instrument(&raw, None).unwrap();
        assert_eq!(snap.events.len(), 1);
        assert_eq!(snap.events[0].severity, 1.0);
    }

    #[test]
    fn test_market_pulse_trend() {
        let raw = RawMarketPayload {
            timestamp: None,
            fear_greed: Some(70.0),
            benchmark_prices: Some((0..30).map(|i| Some(100.0 + i as f64)).collect()),
        };
        let pulse = Normalizer::default().normalize_market(&raw, None, ts());
        assert_eq!(pulse.timestamp, ts());
        assert_eq!(pulse.sentiment.value, 70.0);
        assert!(pulse.trend.unwrap() > 0.0);

        let pulse = Normalizer::default().normalize_market(&RawMarketPayload::default(), None, ts());
        assert!(pulse.trend.is_none());
        assert!(pulse.sentiment.stale);
    }
}
