//! Rolling-window indicators over n bars.
//!
//! SMA(n)[i]      = mean(C[i-n+1..=i])
//! HIGH(n)[i]     = max(H[i-n+1..=i])
//! MIDPOINT(n)[i] = (max(H[i-n+1..=i]) + min(L[i-n+1..=i])) / 2   (Ichimoku conversion/base lines)
//!
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;

fn rolling<F>(bars: &[OhlcvBar], period: usize, indicator_type: IndicatorType, f: F) -> IndicatorSeries
where
    F: Fn(&[OhlcvBar]) -> f64,
{
    let warmup = period.saturating_sub(1);
    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let valid = period > 0 && i >= warmup;
            let value = if valid { f(&bars[i + 1 - period..=i]) } else { 0.0 };
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid,
                value,
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

fn window_high(window: &[OhlcvBar]) -> f64 {
    window.iter().map(|b| b.high).fold(f64::NAN, f64::max)
}

fn window_low(window: &[OhlcvBar]) -> f64 {
    window.iter().map(|b| b.low).fold(f64::NAN, f64::min)
}

pub fn calculate_sma(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    rolling(bars, period, IndicatorType::Sma(period), |w| {
        w.iter().map(|b| b.close).sum::<f64>() / w.len() as f64
    })
}

pub fn calculate_rolling_high(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    rolling(bars, period, IndicatorType::RollingHigh(period), window_high)
}

pub fn calculate_midpoint(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    rolling(bars, period, IndicatorType::Midpoint(period), |w| {
        (window_high(w) + window_low(w)) / 2.0
    })
}
