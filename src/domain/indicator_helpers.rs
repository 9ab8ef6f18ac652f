//! Shared helper functions for indicator calculations.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;

/// Average True Range with Wilder smoothing.
///
/// Seed is the mean of the first `period` true ranges. A bar whose true range
/// cannot be computed (missing prices) carries the previous ATR forward.
pub fn calc_atr(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    if bars.len() < period || period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: bars
                .iter()
                .map(|b| IndicatorPoint {
                    timestamp: b.timestamp,
                    valid: false,
                    value: 0.0,
                })
                .collect(),
        };
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 || !bars[i - 1].close.is_finite() {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut results: Vec<IndicatorPoint> = Vec::with_capacity(bars.len());
    let mut atr = f64::NAN;

    for (i, bar) in bars.iter().enumerate() {
        if i < period - 1 {
            results.push(IndicatorPoint {
                timestamp: bar.timestamp,
                valid: false,
                value: 0.0,
            });
            continue;
        }

        if i == period - 1 {
            let seed: Vec<f64> = tr_values[0..=i]
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            if !seed.is_empty() {
                atr = seed.iter().sum::<f64>() / seed.len() as f64;
            }
        } else if tr_values[i].is_finite() {
            atr = if atr.is_finite() {
                (atr * (period - 1) as f64 + tr_values[i]) / period as f64
            } else {
                tr_values[i]
            };
        }

        results.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid: atr.is_finite(),
            value: atr,
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values: results,
    }
}
