//! Indicator Engine - Technical indicators derived from a bar sequence
//!
//! Computes per-bar frames of:
//! - Moving averages (fast/slow, arithmetic mean of closes)
//! - RSI (window-mean gains vs. losses)
//! - MACD (EMA fast - EMA slow, with EMA signal line and histogram)
//! - ATR (rolling mean of true range)
//!
//! Frames align 1:1 with the input bars. Each indicator is `None` until its
//! own window has filled; callers gate entry evaluation on
//! `IndicatorConfig::min_lookback`. No computation here may panic or return
//! an error: anomalies degrade to `None` for the affected bar only.

use crate::config::IndicatorConfig;
use crate::types::Bar;

/// Denominator floor for RSI when the window holds no losses. Substituting
/// epsilon instead of failing drives RSI toward 100 in the all-gain limit,
/// an approximation of the unbounded relative strength.
const RSI_EPSILON: f64 = 1e-10;

/// Per-bar derived indicator values, aligned 1:1 with the bar sequence
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndicatorFrame {
    pub ma_fast: Option<f64>,
    pub ma_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub atr: Option<f64>,
}

/// Stateless indicator computer. All methods are pure functions of the bar
/// slice passed in; rolling state lives in the windows themselves.
pub struct IndicatorEngine {
    cfg: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(cfg: IndicatorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.cfg
    }

    /// Compute one frame per input bar
    pub fn compute(&self, bars: &[Bar]) -> Vec<IndicatorFrame> {
        if bars.is_empty() {
            return Vec::new();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let ma_fast = rolling_mean(&closes, self.cfg.ma_fast);
        let ma_slow = rolling_mean(&closes, self.cfg.ma_slow);
        let rsi = rolling_rsi(&closes, self.cfg.rsi_period);
        let (macd, macd_signal, macd_hist) = macd_series(
            &closes,
            self.cfg.macd_fast,
            self.cfg.macd_slow,
            self.cfg.macd_signal,
        );
        let atr = rolling_atr(bars, self.cfg.atr_period);

        (0..bars.len())
            .map(|i| IndicatorFrame {
                ma_fast: ma_fast[i],
                ma_slow: ma_slow[i],
                rsi: rsi[i],
                macd: macd[i],
                macd_signal: macd_signal[i],
                macd_hist: macd_hist[i],
                atr: atr[i],
            })
            .collect()
    }

    /// Frame for the most recent bar, if any
    pub fn latest(&self, bars: &[Bar]) -> Option<IndicatorFrame> {
        self.compute(bars).pop()
    }
}

/// Arithmetic mean of the trailing `window` values; None while filling
fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = Some(sum / window as f64);
    }
    out
}

/// RSI from window-mean gains and losses.
///
/// The first close has no predecessor and contributes no diff, so the first
/// defined value appears once `period` diffs exist. A window with zero
/// average loss substitutes `RSI_EPSILON` for the denominator.
fn rolling_rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    for i in period..closes.len() {
        let mut gains = 0.0;
        let mut losses = 0.0;
        for j in (i - period + 1)..=i {
            let change = closes[j] - closes[j - 1];
            if change > 0.0 {
                gains += change;
            } else {
                losses += change.abs();
            }
        }
        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;

        if avg_loss == 0.0 {
            tracing::debug!(bar = i, "RSI window has no losses, using epsilon denominator");
        }
        let rs = avg_gain / avg_loss.max(RSI_EPSILON);
        let rsi = 100.0 - (100.0 / (1.0 + rs));
        out[i] = Some(rsi.clamp(0.0, 100.0));
    }
    out
}

/// Recursively-seeded EMA over the whole series (first value seeds the
/// accumulator), one output per input
fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    let multiplier = 2.0 / (span as f64 + 1.0);
    let mut ema = values[0];
    out.push(ema);
    for v in values.iter().skip(1) {
        ema = (v - ema) * multiplier + ema;
        out.push(ema);
    }
    out
}

/// MACD line, signal line and histogram
#[allow(clippy::type_complexity)]
fn macd_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let n = closes.len();
    if n == 0 {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    let macd: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd, signal);

    let macd_out = macd.iter().map(|v| Some(*v)).collect();
    let hist_out = macd
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| Some(m - s))
        .collect();
    let signal_out = signal_line.into_iter().map(Some).collect();
    (macd_out, signal_out, hist_out)
}

/// True range per bar. The first bar has no prior close and falls back to
/// `high - low`.
fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                let prev_close = bars[i - 1].close;
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            }
        })
        .collect()
}

/// Rolling mean of true range; None while the window fills
fn rolling_atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(bars);
    rolling_mean(&tr, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, close: f64) -> Bar {
        Bar {
            ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    fn ohlc(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts,
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    fn config() -> IndicatorConfig {
        IndicatorConfig {
            ma_fast: 3,
            ma_slow: 5,
            rsi_period: 3,
            macd_fast: 3,
            macd_slow: 6,
            macd_signal: 2,
            atr_period: 3,
            max_history: 100,
        }
    }

    #[test]
    fn test_frames_align_with_bars() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0 + i as f64)).collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);
        assert_eq!(frames.len(), bars.len());
    }

    #[test]
    fn test_moving_average_warmup_and_value() {
        let bars: Vec<Bar> = (0..6).map(|i| bar(i, (i + 1) as f64)).collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);

        assert!(frames[0].ma_fast.is_none());
        assert!(frames[1].ma_fast.is_none());
        // mean of 1, 2, 3
        assert_eq!(frames[2].ma_fast, Some(2.0));
        // mean of 4, 5, 6
        assert_eq!(frames[5].ma_fast, Some(5.0));
        // slow window of 5 fills one bar earlier than the series end
        assert!(frames[3].ma_slow.is_none());
        assert_eq!(frames[4].ma_slow, Some(3.0));
    }

    #[test]
    fn test_rsi_bounds_on_mixed_series() {
        let closes = [100.0, 102.0, 99.0, 101.0, 98.0, 103.0, 104.0, 100.5];
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar(i as i64, *c))
            .collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);
        for frame in frames.iter().skip(3) {
            let rsi = frame.rsi.expect("rsi defined after warmup");
            assert!((0.0..=100.0).contains(&rsi), "rsi out of bounds: {rsi}");
        }
    }

    #[test]
    fn test_rsi_all_gains_saturates_high() {
        let bars: Vec<Bar> = (0..8).map(|i| bar(i, 100.0 + i as f64)).collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);
        let rsi = frames.last().unwrap().rsi.unwrap();
        assert!(rsi > 99.9, "epsilon denominator should drive RSI to 100, got {rsi}");
        assert!(rsi <= 100.0);
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let bars: Vec<Bar> = (0..8).map(|i| bar(i, 100.0 - i as f64)).collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);
        assert_eq!(frames.last().unwrap().rsi, Some(0.0));
    }

    #[test]
    fn test_macd_matches_hand_computed_emas() {
        let closes = [10.0, 11.0, 12.0, 11.5];
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar(i as i64, *c))
            .collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);

        // alpha_fast = 2/4, alpha_slow = 2/7; both seeded at 10.0
        let mut ema_fast = 10.0;
        let mut ema_slow = 10.0;
        for c in closes.iter().skip(1) {
            ema_fast = (c - ema_fast) * 0.5 + ema_fast;
            ema_slow = (c - ema_slow) * (2.0 / 7.0) + ema_slow;
        }
        let expected = ema_fast - ema_slow;
        let got = frames.last().unwrap().macd.unwrap();
        assert!((got - expected).abs() < 1e-12, "macd {got} != {expected}");
    }

    #[test]
    fn test_macd_histogram_is_line_minus_signal() {
        let bars: Vec<Bar> = (0..12).map(|i| bar(i, 100.0 + (i % 4) as f64)).collect();
        let frames = IndicatorEngine::new(config()).compute(&bars);
        for frame in &frames {
            let (m, s, h) = (
                frame.macd.unwrap(),
                frame.macd_signal.unwrap(),
                frame.macd_hist.unwrap(),
            );
            assert!((h - (m - s)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_atr_first_bar_fallback_and_mean() {
        let bars = vec![
            ohlc(0, 10.0, 12.0, 9.0, 11.0),  // tr = 3.0 (no prior close)
            ohlc(1, 11.0, 13.0, 10.0, 12.0), // tr = max(3, 2, 1) = 3.0
            ohlc(2, 12.0, 12.5, 8.0, 9.0),   // tr = max(4.5, 0.5, 4.0) = 4.5
        ];
        let frames = IndicatorEngine::new(config()).compute(&bars);
        assert!(frames[1].atr.is_none());
        let atr = frames[2].atr.unwrap();
        assert!((atr - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_yields_no_frames() {
        let frames = IndicatorEngine::new(config()).compute(&[]);
        assert!(frames.is_empty());
        assert!(IndicatorEngine::new(config()).latest(&[]).is_none());
    }
}
