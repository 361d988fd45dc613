//! Core data model: decoded feed tickers, candles and per-symbol state.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use smol_str::SmolStr;
use std::{collections::VecDeque, fmt, str::FromStr};

/// One entry of the all-market ticker array.
///
/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/All-Market-Tickers-Streams>
///```json
/// {
///     "e": "24hrTicker",
///     "E": 1700000000000,
///     "s": "BTCUSDT",
///     "c": "37000.10",
///     "Q": "0.005",
///     "o": "36500.00",
///     "h": "37210.00",
///     "l": "36420.30"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ticker {
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: SmolStr,

    #[serde(rename = "c", alias = "lastPrice", deserialize_with = "de_f64_or_str")]
    pub last_price: f64,

    #[serde(
        rename = "Q",
        alias = "lastQuantity",
        deserialize_with = "de_f64_or_str",
        default
    )]
    pub last_quantity: f64,
}

impl Ticker {
    pub fn new(symbol: impl Into<SmolStr>, last_price: f64, last_quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            last_quantity,
        }
    }
}

/// Deserialize a number the feed may encode either as a JSON number or a JSON string.
fn de_f64_or_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(raw) => raw.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// Fixed candle length, aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CandlePeriod {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl CandlePeriod {
    const MINUTE_MS: i64 = 60_000;

    /// Period length in milliseconds.
    pub fn as_millis(&self) -> i64 {
        match *self {
            CandlePeriod::Minutes(n) => i64::from(n) * Self::MINUTE_MS,
            CandlePeriod::Hours(n) => i64::from(n) * 60 * Self::MINUTE_MS,
            CandlePeriod::Days(n) => i64::from(n) * 24 * 60 * Self::MINUTE_MS,
        }
    }

    /// Round an epoch millisecond timestamp down to the start of its bucket.
    #[inline]
    pub fn align_down(&self, timestamp_ms: i64) -> i64 {
        let period = self.as_millis();
        timestamp_ms - timestamp_ms.rem_euclid(period)
    }
}

impl fmt::Display for CandlePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandlePeriod::Minutes(n) => write!(f, "{n}m"),
            CandlePeriod::Hours(n) => write!(f, "{n}h"),
            CandlePeriod::Days(n) => write!(f, "{n}d"),
        }
    }
}

impl FromStr for CandlePeriod {
    type Err = ConfigError;

    /// Parse `<n>m`, `<n>h` or `<n>d`, eg/ "5m", "1h".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Invalid {
            name: "CANDLE_PERIOD",
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let raw = s.trim();
        let (unit_index, _) = raw
            .char_indices()
            .last()
            .ok_or_else(|| invalid("empty period"))?;
        let (count, unit) = raw.split_at(unit_index);

        let count = count
            .parse::<u32>()
            .map_err(|_| invalid("expected <n>m, <n>h or <n>d"))?;
        if count == 0 {
            return Err(invalid("period length must be positive"));
        }

        match unit {
            "m" => Ok(CandlePeriod::Minutes(count)),
            "h" => Ok(CandlePeriod::Hours(count)),
            "d" => Ok(CandlePeriod::Days(count)),
            _ => Err(invalid("unknown unit, expected m, h or d")),
        }
    }
}

/// One fixed-length OHLCV bucket for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    /// Aligned bucket start (epoch ms).
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Open a bucket from its first observed trade.
    pub fn new(start_time: i64, price: f64, quantity: f64) -> Self {
        Self {
            start_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity,
        }
    }

    /// Fold another last-trade observation into the bucket.
    pub fn update(&mut self, price: f64, quantity: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
    }

    /// Normalised intraperiod range, `(high - low) / open`.
    ///
    /// Returns `None` when `open` is not a positive finite number.
    pub fn amplitude(&self) -> Option<f64> {
        if self.open > 0.0 && self.open.is_finite() {
            Some((self.high - self.low) / self.open)
        } else {
            None
        }
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_time)
    }
}

/// In-progress candle plus bounded FIFO of completed candles.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub current: Option<Candle>,
    pub history: VecDeque<Candle>,
}

impl CandleSeries {
    /// Get last N completed candles, oldest first.
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &Candle> {
        let start = self.history.len().saturating_sub(n);
        self.history.range(start..)
    }
}

/// Evaluation bookkeeping, written only by the [`AnomalyDetector`](crate::detector::AnomalyDetector).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckState {
    pub last_check_at: Option<DateTime<Utc>>,
    /// `start_time` of the bucket that last produced an alert.
    pub last_alerted_period: Option<i64>,
}

/// Per-symbol aggregation state, created lazily on first observation.
#[derive(Debug, Clone, Default)]
pub struct SymbolState {
    pub candles: CandleSeries,
    pub checks: CheckState,
}
