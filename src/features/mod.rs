//! Feature Engine - Technical indicators over a price window
//!
//! Computes the indicators the technical scorer consumes:
//! - RSI (Wilder's smoothing)
//! - MACD (EMA-based signal line)
//! - Bollinger Bands and position within the band
//! - Fast/slow EMA trend spread
//! - Return volatility
//!
//! Everything is computed from a close-price series, oldest first. The engine
//! is stateless: the same window always yields the same indicators.

use serde::{Deserialize, Serialize};

/// Indicator periods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub volatility_period: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_multiplier: 2.0,
            volatility_period: 14,
        }
    }
}

/// Indicator values at the end of the window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub latest: f64,
    pub rsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    /// 0 = lower band, 0.5 = middle, 1 = upper band (may leave 0..1 outside the bands)
    pub bb_position: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    /// (ema_fast - ema_slow) / ema_slow
    pub trend_spread: f64,
    /// Std dev of simple returns over `volatility_period`
    pub volatility: f64,
}

/// Feature engine for computing technical indicators
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Minimum window length needed for every indicator
    pub fn min_points(&self) -> usize {
        self.config
            .macd_slow
            .max(self.config.rsi_period + 1)
            .max(self.config.bb_period)
            .max(self.config.volatility_period + 1)
    }

    /// Compute all indicators, or None when the window is too short
    pub fn compute(&self, prices: &[f64]) -> Option<Indicators> {
        if prices.len() < self.min_points() {
            tracing::debug!(
                points = prices.len(),
                required = self.min_points(),
                "Indicators: not enough prices"
            );
            return None;
        }

        let latest = *prices.last()?;
        let rsi = rsi_wilders(prices, self.config.rsi_period)?;
        let (macd_line, macd_signal, macd_hist) = macd(
            prices,
            self.config.macd_fast,
            self.config.macd_slow,
            self.config.macd_signal,
        )?;
        let (bb_upper, bb_middle, bb_lower) =
            bollinger(prices, self.config.bb_period, self.config.bb_multiplier)?;
        let bb_position = if bb_upper - bb_lower > 0.0 {
            (latest - bb_lower) / (bb_upper - bb_lower)
        } else {
            0.5
        };
        let ema_fast = ema(prices, self.config.macd_fast)?;
        let ema_slow = ema(prices, self.config.macd_slow)?;
        let trend_spread = if ema_slow > 0.0 {
            (ema_fast - ema_slow) / ema_slow
        } else {
            0.0
        };
        let volatility = volatility(prices, self.config.volatility_period)?;

        Some(Indicators {
            latest,
            rsi,
            macd_line,
            macd_signal,
            macd_hist,
            bb_upper,
            bb_middle,
            bb_lower,
            bb_position,
            ema_fast,
            ema_slow,
            trend_spread,
            volatility,
        })
    }
}

/// EMA series seeded with the first price
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() || period == 0 {
        return Vec::new();
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut ema = prices[0];
    out.push(ema);
    for p in prices.iter().skip(1) {
        ema = (p - ema) * multiplier + ema;
        out.push(ema);
    }
    out
}

/// Latest EMA value
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }
    ema_series(prices, period).last().copied()
}

/// RSI using Wilder's smoothing over the whole window
pub fn rsi_wilders(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }
    let p = period as f64;
    let mut avg_gain = gains / p;
    let mut avg_loss = losses / p;

    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { change.abs() } else { 0.0 };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    if avg_loss < 1e-12 && avg_gain < 1e-12 {
        return Some(50.0); // No movement = neutral
    }
    if avg_loss < 1e-12 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// MACD line, signal line and histogram
pub fn macd(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<(f64, f64, f64)> {
    if prices.len() < slow || fast >= slow {
        return None;
    }
    let fast_series = ema_series(prices, fast);
    let slow_series = ema_series(prices, slow);
    let macd_series: Vec<f64> = fast_series
        .iter()
        .zip(slow_series.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal = *ema_series(&macd_series, signal_period).last()?;
    let line = *macd_series.last()?;
    Some((line, signal, line - signal))
}

/// Bollinger Bands (upper, middle, lower) over the last `period` prices
pub fn bollinger(prices: &[f64], period: usize, multiplier: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let recent = &prices[prices.len() - period..];
    let sma = recent.iter().sum::<f64>() / period as f64;
    let variance: f64 = recent.iter().map(|p| (p - sma).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();

    Some((sma + multiplier * std, sma, sma - multiplier * std))
}

/// Volatility (std dev of simple returns)
pub fn volatility(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let start = prices.len() - period;
    let returns: Vec<f64> = (start..prices.len())
        .filter(|&i| prices[i - 1] > 0.0)
        .map(|i| (prices[i] - prices[i - 1]) / prices[i - 1])
        .collect();
    if returns.is_empty() {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance: f64 =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    Some(variance.sqrt())
}

/// Percent change over the last `lookback` points
pub fn pct_change(prices: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || prices.len() <= lookback {
        return None;
    }
    let last = *prices.last()?;
    let base = prices[prices.len() - 1 - lookback];
    if base <= 0.0 {
        return None;
    }
    Some((last - base) / base * 100.0)
}

/// Benchmark trend in -1..=1: tanh of the fast/slow EMA spread divided by `scale`
pub fn trend_signal(prices: &[f64], fast: usize, slow: usize, scale: f64) -> Option<f64> {
    let fast_ema = ema(prices, fast)?;
    let slow_ema = ema(prices, slow)?;
    if slow_ema <= 0.0 || scale <= 0.0 {
        return None;
    }
    Some(((fast_ema - slow_ema) / slow_ema / scale).tanh())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uptrend(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    fn downtrend(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 - i as f64).collect()
    }

    #[test]
    fn test_rsi_direction() {
        let up = rsi_wilders(&uptrend(30), 14).unwrap();
        let down = rsi_wilders(&downtrend(30), 14).unwrap();
        assert_eq!(up, 100.0);
        assert!(down < 1.0);

        let flat = vec![100.0; 30];
        assert_eq!(rsi_wilders(&flat, 14), Some(50.0));
    }

    #[test]
    fn test_rsi_mixed_series_is_bounded() {
        let prices: Vec<f64> = (0..40)
            .map(|i| 100.0 + if i % 2 == 0 { 2.0 } else { -1.0 } * i as f64 * 0.1)
            .collect();
        let rsi = rsi_wilders(&prices, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0, "rsi = {}", rsi);
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let (line, _, _) = macd(&uptrend(40), 12, 26, 9).unwrap();
        assert!(line > 0.0);
        let (line, _, _) = macd(&downtrend(40), 12, 26, 9).unwrap();
        assert!(line < 0.0);
    }

    #[test]
    fn test_bollinger_symmetry() {
        let prices = vec![10.0, 12.0, 10.0, 12.0];
        let (upper, middle, lower) = bollinger(&prices, 4, 2.0).unwrap();
        assert!((middle - 11.0).abs() < 1e-9);
        assert!((upper - middle - (middle - lower)).abs() < 1e-9);
    }

    #[test]
    fn test_engine_requires_min_points() {
        let engine = FeatureEngine::default();
        assert_eq!(engine.min_points(), 26);
        assert!(engine.compute(&uptrend(25)).is_none());
        let ind = engine.compute(&uptrend(26)).unwrap();
        assert!(ind.trend_spread > 0.0);
        assert!(ind.bb_position > 0.5);
        assert_eq!(ind.latest, 125.0);
    }

    #[test]
    fn test_pct_change_and_trend_signal() {
        let prices = uptrend(30);
        let change = pct_change(&prices, 1).unwrap();
        assert!((change - (129.0 - 128.0) / 128.0 * 100.0).abs() < 1e-9);
        assert!(pct_change(&prices, 30).is_none());

        let up = trend_signal(&prices, 12, 26, 0.05).unwrap();
        let down = trend_signal(&downtrend(30), 12, 26, 0.05).unwrap();
        assert!(up > 0.0 && up <= 1.0);
        assert!(down < 0.0 && down >= -1.0);
    }

    #[test]
    fn test_volatility_zero_for_constant_returns() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let vol = volatility(&prices, 14).unwrap();
        assert!(vol < 1e-9);
    }
}
