use serde::Serialize;

use crate::indicators::IndicatorFrame;

/// Guard added to min-max denominators so a flat series maps to 0.
const EPS: f64 = 1e-8;

/// Scale applied to the [0, 1] composite before it is stored or served.
pub const INDEX_SCALE: f64 = 10.0;

/// Weights of the scaled close and volume in the price/volume component.
pub const CLOSE_WEIGHT: f64 = 0.7;
pub const VOLUME_WEIGHT: f64 = 0.3;

/// Blend of the price/volume component and the trend component.
pub const PRICE_VOLUME_BLEND: f64 = 0.6;
pub const TREND_BLEND: f64 = 0.4;

/// Latest indicator values for a coin, served next to its index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub ma_7: f64,
    pub ma_30: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    pub macd: f64,
    pub rsi: f64,
    pub volatility: f64,
    pub price_change_pct: f64,
}

impl IndicatorSnapshot {
    pub fn latest(frame: &IndicatorFrame) -> Option<Self> {
        if frame.is_empty() {
            return None;
        }
        let i = frame.len() - 1;
        Some(Self {
            close: frame.close[i],
            ma_7: frame.ma_7[i],
            ma_30: frame.ma_30[i],
            ema_12: frame.ema_12[i],
            ema_26: frame.ema_26[i],
            macd: frame.macd[i],
            rsi: frame.rsi[i],
            volatility: frame.volatility[i],
            price_change_pct: frame.price_change_pct[i],
        })
    }
}

/// Min-max normalise into [0, 1].
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    values.iter().map(|v| (v - lo) / (hi - lo + EPS)).collect()
}

/// Composite index series in [0, 1]:
/// `0.7 * close + 0.3 * volume` (both min-max scaled), blended 60/40 with
/// the scaled trend `(close - MA30) / MA30`.
pub fn composite_series(frame: &IndicatorFrame) -> Vec<f64> {
    let close = min_max(&frame.close);
    let volume = min_max(&frame.volume);
    let trend: Vec<f64> = frame
        .close
        .iter()
        .zip(&frame.ma_30)
        .map(|(c, ma)| (c - ma) / (ma + EPS))
        .collect();
    let trend = min_max(&trend);

    close
        .iter()
        .zip(&volume)
        .zip(&trend)
        .map(|((c, v), t)| {
            PRICE_VOLUME_BLEND * (CLOSE_WEIGHT * c + VOLUME_WEIGHT * v) + TREND_BLEND * t
        })
        .collect()
}

/// Latest composite value scaled to [0, INDEX_SCALE]. `None` for an empty frame.
pub fn latest_index(frame: &IndicatorFrame) -> Option<f64> {
    let last = *composite_series(frame).last()?;
    Some((last * INDEX_SCALE).clamp(0.0, INDEX_SCALE))
}

/// Confidence in a set of index values: `1 / (1 + variance)`, clipped to
/// [0, 1]. Tightly agreeing indices give confidence near 1.
pub fn confidence(indices: &[f64]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    let n = indices.len() as f64;
    let mean = indices.iter().sum::<f64>() / n;
    let variance = indices.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (1.0 / (1.0 + variance)).clamp(0.0, 1.0)
}
