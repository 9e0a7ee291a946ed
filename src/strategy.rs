//! Candlestick strategy evaluators.
//!
//! Pure functions over a candle sequence: no clocks, no I/O, no client
//! state. Each strategy inspects the most recent bars against the
//! short-term SMA slope and answers with a direction or nothing. The
//! execution loop decides what to do with the answer.

use crate::protocol::candle::Candle;
use crate::protocol::option::Direction;

/// Tunables shared by the strategies and market filters.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    /// SMA period for the short-term trend slope.
    pub ma_period: usize,
    /// How many fractal levels to keep per side.
    pub max_levels: usize,
    /// Pullback proximity to a level, in points.
    pub proximity: f64,
    /// Point size of the instrument.
    pub point: f64,
    pub consolidation_lookback: usize,
    pub consolidation_threshold: f64,
    /// Bars with a body below this ratio count as indecision.
    pub exhaustion_doji_ratio: f64,
    pub rejection_wick_min_ratio: f64,
    pub rejection_body_max_ratio: f64,
    pub rejection_opposite_wick_max_ratio: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            ma_period: 14,
            max_levels: 5,
            proximity: 2.0,
            point: 1e-5,
            consolidation_lookback: 10,
            consolidation_threshold: 5e-4,
            exhaustion_doji_ratio: 0.2,
            rejection_wick_min_ratio: 0.6,
            rejection_body_max_ratio: 0.3,
            rejection_opposite_wick_max_ratio: 0.15,
        }
    }
}

/// The catalogable strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Flow,
    Patterns,
    Pullback,
    Rejection,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        Self::Flow,
        Self::Patterns,
        Self::Pullback,
        Self::Rejection,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Patterns => "patterns",
            Self::Pullback => "pullback",
            Self::Rejection => "rejection",
        }
    }

    /// Evaluates this strategy over the sequence.
    #[must_use]
    pub fn evaluate(self, candles: &[Candle], params: &StrategyParams) -> Option<Direction> {
        match self {
            Self::Flow => flow(candles, params),
            Self::Patterns => patterns(candles, params),
            Self::Pullback => pullback(candles, params),
            Self::Rejection => rejection(candles, params),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or(())
    }
}

/// Whether the short SMA is rising: compares the averages of the two most
/// recent `period`-wide windows. `None` when the sequence is too short or
/// the averages tie.
#[must_use]
pub fn sma_slope(closes: &[f64], period: usize) -> Option<bool> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let older: f64 = closes[closes.len() - period - 1..closes.len() - 1]
        .iter()
        .sum::<f64>()
        / period as f64;
    let newer: f64 = closes[closes.len() - period..].iter().sum::<f64>() / period as f64;
    if older == newer {
        return None;
    }
    Some(newer > older)
}

/// Five-bar fractal levels: resistance highs and support lows, each
/// sorted highest-first and truncated to `max_levels`.
#[must_use]
pub fn detect_fractals(candles: &[Candle], max_levels: usize) -> (Vec<f64>, Vec<f64>) {
    let mut resistance = Vec::new();
    let mut support = Vec::new();

    for i in 2..candles.len().saturating_sub(2) {
        let high = candles[i].high;
        if high > candles[i - 1].high
            && high > candles[i - 2].high
            && high > candles[i + 1].high
            && high > candles[i + 2].high
        {
            resistance.push(high);
        }
        let low = candles[i].low;
        if low < candles[i - 1].low
            && low < candles[i - 2].low
            && low < candles[i + 1].low
            && low < candles[i + 2].low
        {
            support.push(low);
        }
    }

    resistance.sort_by(|a, b| b.total_cmp(a));
    resistance.truncate(max_levels);
    support.sort_by(|a, b| b.total_cmp(a));
    support.truncate(max_levels);
    (resistance, support)
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Three consecutive bars in the trend direction.
#[must_use]
pub fn flow(candles: &[Candle], params: &StrategyParams) -> Option<Direction> {
    if candles.len() < params.ma_period + 3 {
        return None;
    }
    let rising = sma_slope(&closes(candles), params.ma_period)?;
    let last_three = &candles[candles.len() - 3..];

    if rising && last_three.iter().all(Candle::is_bullish) {
        return Some(Direction::Call);
    }
    if !rising && last_three.iter().all(Candle::is_bearish) {
        return Some(Direction::Put);
    }
    None
}

/// Two-bar reversal patterns (engulfing and inside-bar) in the trend
/// direction.
#[must_use]
pub fn patterns(candles: &[Candle], params: &StrategyParams) -> Option<Direction> {
    if candles.len() < params.ma_period + 2 {
        return None;
    }
    let rising = sma_slope(&closes(candles), params.ma_period)?;
    let penultimate = candles[candles.len() - 2];
    let last = candles[candles.len() - 1];

    if rising && penultimate.is_bearish() && last.is_bullish() {
        let engulfing = last.open < penultimate.close && last.close > penultimate.open;
        let inside = last.open > penultimate.close && last.close < penultimate.open;
        if engulfing || inside {
            return Some(Direction::Call);
        }
    }
    if !rising && penultimate.is_bullish() && last.is_bearish() {
        let engulfing = last.open > penultimate.close && last.close < penultimate.open;
        let inside = last.open < penultimate.close && last.close > penultimate.open;
        if engulfing || inside {
            return Some(Direction::Put);
        }
    }
    None
}

/// Retest of the nearest fractal level in the trend direction.
#[must_use]
pub fn pullback(candles: &[Candle], params: &StrategyParams) -> Option<Direction> {
    if candles.len() < params.ma_period + 2 {
        return None;
    }
    let rising = sma_slope(&closes(candles), params.ma_period)?;
    let (resistance, support) = detect_fractals(candles, params.max_levels);
    let last = candles[candles.len() - 1];

    if rising
        && let Some(&level) = support.first()
        && last.is_bullish()
    {
        let target = level + params.proximity * params.point;
        if last.low <= target && last.close >= level {
            return Some(Direction::Call);
        }
    }
    if !rising
        && let Some(&level) = resistance.first()
        && last.is_bearish()
    {
        let target = level - params.proximity * params.point;
        if last.high >= target && last.close <= level {
            return Some(Direction::Put);
        }
    }
    None
}

/// A wick-rejection bar against the trend on the previous candle.
#[must_use]
pub fn rejection(candles: &[Candle], params: &StrategyParams) -> Option<Direction> {
    if candles.len() < params.ma_period + 2 {
        return None;
    }
    let rising = sma_slope(&closes(candles), params.ma_period)?;
    let previous = candles[candles.len() - 2];
    let range = previous.range();
    if range <= 0.0 {
        return None;
    }

    let body = previous.body() / range;
    let upper = previous.upper_wick() / range;
    let lower = previous.lower_wick() / range;

    if rising
        && lower >= params.rejection_wick_min_ratio
        && body <= params.rejection_body_max_ratio
        && upper <= params.rejection_opposite_wick_max_ratio
    {
        return Some(Direction::Call);
    }
    if !rising
        && upper >= params.rejection_wick_min_ratio
        && body <= params.rejection_body_max_ratio
        && lower <= params.rejection_opposite_wick_max_ratio
    {
        return Some(Direction::Put);
    }
    None
}

/// Whether the recent closes sit inside a band too narrow to trade.
#[must_use]
pub fn is_consolidating(candles: &[Candle], params: &StrategyParams) -> bool {
    if candles.len() < params.consolidation_lookback {
        return false;
    }
    let window = &candles[candles.len() - params.consolidation_lookback..];
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for candle in window {
        min = min.min(candle.close);
        max = max.max(candle.close);
    }
    (max - min) < params.consolidation_threshold
}

/// Two doji-like bars in a row signal exhaustion; the entry is skipped.
#[must_use]
pub fn is_exhausted(candles: &[Candle], params: &StrategyParams) -> bool {
    if candles.len() < 3 {
        return false;
    }
    let c1 = candles[candles.len() - 2];
    let c2 = candles[candles.len() - 3];
    c1.body_ratio() < params.exhaustion_doji_ratio
        && c2.body_ratio() < params.exhaustion_doji_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            from: 0,
            open,
            high,
            low,
            close,
        }
    }

    /// A gently rising sequence of bullish bars.
    fn rising_sequence(len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let base = 1.0 + i as f64 * 0.001;
                bar(base, base + 0.0015, base - 0.0005, base + 0.001)
            })
            .collect()
    }

    fn falling_sequence(len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let base = 2.0 - i as f64 * 0.001;
                bar(base, base + 0.0005, base - 0.0015, base - 0.001)
            })
            .collect()
    }

    #[test]
    fn sma_slope_detects_direction() {
        let rising: Vec<f64> = (0..20).map(|i| 1.0 + f64::from(i) * 0.01).collect();
        assert_eq!(sma_slope(&rising, 5), Some(true));

        let falling: Vec<f64> = (0..20).map(|i| 2.0 - f64::from(i) * 0.01).collect();
        assert_eq!(sma_slope(&falling, 5), Some(false));

        let flat = vec![1.0; 20];
        assert_eq!(sma_slope(&flat, 5), None);
        assert_eq!(sma_slope(&rising[..3], 5), None);
    }

    #[test]
    fn fractals_find_local_extremes() {
        let mut candles = rising_sequence(11);
        // Plant a clear local high at index 5.
        candles[5] = bar(1.005, 1.2, 1.004, 1.006);
        let (resistance, _) = detect_fractals(&candles, 5);
        assert!(resistance.contains(&1.2));
    }

    #[test]
    fn flow_signals_with_the_trend() {
        let params = StrategyParams {
            ma_period: 5,
            ..StrategyParams::default()
        };
        assert_eq!(flow(&rising_sequence(20), &params), Some(Direction::Call));
        assert_eq!(flow(&falling_sequence(20), &params), Some(Direction::Put));
    }

    #[test]
    fn flow_needs_enough_history() {
        let params = StrategyParams::default();
        assert_eq!(flow(&rising_sequence(5), &params), None);
    }

    #[test]
    fn patterns_signals_on_bullish_engulfing() {
        let params = StrategyParams {
            ma_period: 5,
            ..StrategyParams::default()
        };
        let mut candles = rising_sequence(20);
        let n = candles.len();
        // Bearish bar fully engulfed by the next bullish bar.
        candles[n - 2] = bar(1.020, 1.021, 1.017, 1.018);
        candles[n - 1] = bar(1.0175, 1.024, 1.017, 1.023);
        assert_eq!(patterns(&candles, &params), Some(Direction::Call));
    }

    #[test]
    fn patterns_quiet_without_reversal_shape() {
        let params = StrategyParams {
            ma_period: 5,
            ..StrategyParams::default()
        };
        assert_eq!(patterns(&rising_sequence(20), &params), None);
    }

    #[test]
    fn rejection_signals_on_long_lower_wick_in_uptrend() {
        let params = StrategyParams {
            ma_period: 5,
            ..StrategyParams::default()
        };
        let mut candles = rising_sequence(20);
        let n = candles.len();
        // Hammer: long lower wick, small body near the top.
        candles[n - 2] = bar(1.0190, 1.0192, 1.0100, 1.0188);
        assert_eq!(rejection(&candles, &params), Some(Direction::Call));
    }

    #[test]
    fn consolidation_filter_triggers_on_flat_closes() {
        let params = StrategyParams::default();
        let flat: Vec<Candle> = (0..12).map(|_| bar(1.0, 1.0002, 0.9999, 1.0001)).collect();
        assert!(is_consolidating(&flat, &params));
        assert!(!is_consolidating(&rising_sequence(12), &params));
    }

    #[test]
    fn exhaustion_filter_triggers_on_back_to_back_dojis() {
        let params = StrategyParams::default();
        let mut candles = rising_sequence(10);
        let n = candles.len();
        candles[n - 2] = bar(1.0, 1.005, 0.995, 1.0001);
        candles[n - 3] = bar(1.0, 1.005, 0.995, 0.9999);
        assert!(is_exhausted(&candles, &params));
        assert!(!is_exhausted(&rising_sequence(10), &params));
    }

    #[test]
    fn strategy_kind_round_trips_names() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.name().parse::<StrategyKind>(), Ok(kind));
        }
        assert!("momentum".parse::<StrategyKind>().is_err());
    }
}
