//! Abnormal amplitude detection over the rolling candle history.

use crate::model::{CandlePeriod, CandleSeries, CheckState};
use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use std::{fmt, time::Duration};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub candle_period: CandlePeriod,
    /// Completed candles required before evaluating, and averaged over.
    pub history_candles_count: usize,
    /// Alert once the current amplitude reaches `average * magnification`.
    pub magnification: f64,
    /// Minimum spacing between evaluations of the same symbol.
    pub check_interval: Duration,
}

/// Direction of the current candle relative to the previous close.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn glyph(&self) -> &'static str {
        match self {
            Direction::Up => "📈",
            Direction::Down => "📉",
        }
    }
}

/// Abnormal amplitude detected for the in-progress candle of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub symbol: SmolStr,
    pub period: CandlePeriod,
    /// `start_time` of the candle that triggered the alert.
    pub period_start: i64,
    pub direction: Direction,
    pub amplitude: f64,
    pub avg_history_amplitude: f64,
    pub history_len: usize,
    pub volume: f64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[⚠️ Abnormal volatility] {} {} {} amplitude: {:.2}%, avg of last {} periods: {:.2}%, volume: {:.2}",
            self.symbol,
            self.period,
            self.direction.glyph(),
            self.amplitude * 100.0,
            self.history_len,
            self.avg_history_amplitude * 100.0,
            self.volume,
        )
    }
}

/// Compares each symbol's in-progress candle with its recent history.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluate `symbol` if at least `check_interval` has elapsed since its last check.
    ///
    /// Returns `Some(Alert)` at most once per symbol per candle. A wall clock stepping back
    /// behind the last check re-arms the gate rather than stalling it.
    pub fn maybe_evaluate(
        &self,
        symbol: &SmolStr,
        candles: &CandleSeries,
        checks: &mut CheckState,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let gated = checks
            .last_check_at
            .and_then(|last_check_at| (now - last_check_at).to_std().ok())
            .is_some_and(|elapsed| elapsed < self.config.check_interval);
        if gated {
            return None;
        }
        checks.last_check_at = Some(now);

        let alert = self.evaluate(symbol, candles)?;
        if checks.last_alerted_period == Some(alert.period_start) {
            return None;
        }

        checks.last_alerted_period = Some(alert.period_start);
        Some(alert)
    }

    /// Stateless check of the alert condition, ignoring throttling and deduplication.
    pub fn evaluate(&self, symbol: &SmolStr, candles: &CandleSeries) -> Option<Alert> {
        let current = candles.current.as_ref()?;

        // Warm-up
        let required = self.config.history_candles_count;
        if candles.history.len() < required {
            return None;
        }

        let Some(amplitude) = current.amplitude() else {
            debug!(%symbol, open = current.open, "skipping evaluation: degenerate open price");
            return None;
        };

        let mut sum = 0.0;
        for candle in candles.last_n(required) {
            let Some(candle_amplitude) = candle.amplitude() else {
                debug!(%symbol, start_time = candle.start_time, "skipping evaluation: degenerate history candle");
                return None;
            };
            sum += candle_amplitude;
        }
        let avg_history_amplitude = sum / required as f64;

        if amplitude < avg_history_amplitude * self.config.magnification {
            return None;
        }

        let direction = match candles.history.back() {
            Some(previous) if current.close > previous.close => Direction::Up,
            _ => Direction::Down,
        };

        Some(Alert {
            symbol: symbol.clone(),
            period: self.config.candle_period,
            period_start: current.start_time,
            direction,
            amplitude,
            avg_history_amplitude,
            history_len: required,
            volume: current.volume,
        })
    }
}
