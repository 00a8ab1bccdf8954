//! Technical indicators over a close/volume series.
//!
//! Every indicator returns one value per input point. Points where an
//! indicator is not yet defined are forward-filled from the last defined
//! value, and zero before the first one.

use crate::config::indicator_windows::*;
use crate::types::Candle;

/// Indicator columns computed for one candle series, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorFrame {
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub ma_7: Vec<f64>,
    pub ma_30: Vec<f64>,
    pub ema_12: Vec<f64>,
    pub ema_26: Vec<f64>,
    pub macd: Vec<f64>,
    pub rsi: Vec<f64>,
    pub volatility: Vec<f64>,
    pub price_change_pct: Vec<f64>,
}

impl IndicatorFrame {
    pub fn compute(candles: &[Candle]) -> Self {
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let ema_12 = ema(&close, EMA_FAST);
        let ema_26 = ema(&close, EMA_SLOW);
        let macd = ema_12.iter().zip(&ema_26).map(|(f, s)| f - s).collect();

        Self {
            ma_7: sma(&close, MA_SHORT),
            ma_30: sma(&close, MA_LONG),
            rsi: fill_forward(&rsi(&close, RSI_PERIOD)),
            volatility: fill_forward(&rolling_std(&close, VOLATILITY)),
            price_change_pct: fill_forward(&pct_change(&close)),
            ema_12,
            ema_26,
            macd,
            close,
            volume,
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

/// Simple moving average over a trailing window; the first points average
/// whatever is available.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum / (i + 1).min(window) as f64);
    }
    out
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with the
/// first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Relative strength index from rolling means of gains and losses. The first
/// point counts as a zero move, so the first value lands at `period - 1`.
/// `None` before that, and where both means are zero.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let period = period.max(1);
    let mut out = vec![None; values.len()];
    if values.len() < period {
        return out;
    }
    let deltas: Vec<f64> = std::iter::once(0.0)
        .chain(values.windows(2).map(|w| w[1] - w[0]))
        .collect();

    for i in period - 1..values.len() {
        let window = &deltas[i + 1 - period..=i];
        let gain = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss = -window.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
        out[i] = if loss == 0.0 {
            (gain > 0.0).then_some(100.0)
        } else {
            Some(100.0 - 100.0 / (1.0 + gain / loss))
        };
    }
    out
}

/// Rolling sample standard deviation; `None` while fewer than two points
/// are in the window.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            if slice.len() < 2 {
                return None;
            }
            let n = slice.len() as f64;
            let mean = slice.iter().sum::<f64>() / n;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(var.sqrt())
        })
        .collect()
}

/// Fractional change from the previous point; `None` for the first point and
/// after a zero price.
pub fn pct_change(values: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    out.push(None);
    for w in values.windows(2) {
        out.push((w[0] != 0.0).then(|| (w[1] - w[0]) / w[0]));
    }
    out.truncate(values.len());
    out
}

/// Forward-fill gaps, zero before the first defined value.
pub fn fill_forward(values: &[Option<f64>]) -> Vec<f64> {
    let mut last = 0.0;
    values
        .iter()
        .map(|v| {
            if let Some(x) = v {
                last = *x;
            }
            last
        })
        .collect()
}
