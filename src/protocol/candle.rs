//! Candle (OHLC bar) models and validation.

use serde::{Deserialize, Serialize};

/// Payload of a `candles` response: `{"candles": [...]}`.
#[derive(Debug, Deserialize)]
pub struct CandlesPayload {
    pub candles: Vec<RawCandle>,
}

/// A bar as the broker sends it. Older endpoints use `min`/`max`,
/// newer ones `low`/`high`; both are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandle {
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
    pub open: f64,
    pub close: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
}

impl RawCandle {
    /// Normalizes into a validated [`Candle`], or `None` when the bar is
    /// missing its range or violates the OHLC invariant.
    #[must_use]
    pub fn validate(&self) -> Option<Candle> {
        let high = self.high.or(self.max)?;
        let low = self.low.or(self.min)?;
        let candle = Candle {
            from: self.from,
            open: self.open,
            high,
            low,
            close: self.close,
        };
        candle.is_well_formed().then_some(candle)
    }
}

/// A validated OHLC bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    /// Start of the bar's time window (unix seconds).
    pub from: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// A bar is well formed when `high >= max(open, close)` and
    /// `low <= min(open, close)` and every field is finite.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite());
        finite && self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }

    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    #[must_use]
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// High-low span of the bar.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size.
    #[must_use]
    pub fn body(&self) -> f64 {
        (self.open - self.close).abs()
    }

    /// Body as a fraction of the bar's range; zero-range bars yield 0.
    #[must_use]
    pub fn body_ratio(&self) -> f64 {
        let range = self.range();
        if range > 0.0 { self.body() / range } else { 0.0 }
    }

    /// Wick above the body.
    #[must_use]
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Wick below the body.
    #[must_use]
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }
}

/// Filters a raw candle sequence down to the validated bars, in order.
#[must_use]
pub fn validate_candles(raw: &[RawCandle]) -> Vec<Candle> {
    raw.iter().filter_map(RawCandle::validate).collect()
}

/// A live bar from the `candle-generated` stream.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveCandle {
    pub active_id: u32,
    /// Bar interval in seconds.
    pub size: u32,
    pub from: i64,
    #[serde(default)]
    pub to: i64,
    pub open: f64,
    pub close: f64,
    pub min: f64,
    pub max: f64,
}

impl LiveCandle {
    /// Converts into a validated [`Candle`], or `None` for malformed bars.
    #[must_use]
    pub fn validate(&self) -> Option<Candle> {
        let candle = Candle {
            from: self.from,
            open: self.open,
            high: self.max,
            low: self.min,
            close: self.close,
        };
        candle.is_well_formed().then_some(candle)
    }
}

/// Candle stream intervals supported by the broker, in seconds.
pub const CANDLE_SIZES: [u32; 19] = [
    1, 5, 10, 15, 30, 60, 120, 300, 600, 900, 1800, 3600, 7200, 14400, 28800, 43200, 86400,
    604_800, 2_592_000,
];
