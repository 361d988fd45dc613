//! Rolling per-symbol candle aggregation from the all-market ticker feed.
//!
//! Every ticker in one batch is bucketed using the batch arrival time, so all symbols roll
//! over to a new candle together.

use crate::model::{Candle, CandlePeriod, SymbolState, Ticker};
use chrono::{DateTime, Utc};
use fnv::{FnvHashMap, FnvHashSet};
use smol_str::SmolStr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    pub candle_period: CandlePeriod,
    /// Maximum number of completed candles retained per symbol.
    pub history_candles_count: usize,
    /// Only symbols ending with this suffix are tracked, eg/ "USDT".
    pub quote_asset: SmolStr,
}

/// Owns the [`SymbolState`] of every tracked symbol.
#[derive(Debug)]
pub struct CandleAggregator {
    config: AggregatorConfig,
    symbols: FnvHashMap<SmolStr, SymbolState>,
}

impl CandleAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            symbols: FnvHashMap::default(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Fold a batch of tickers into per-symbol candles.
    ///
    /// Returns the symbols touched by this batch, in feed order and without duplicates.
    ///
    /// An arrival time aligning before the open candle (wall clock stepped back) is folded into
    /// that candle, so history never receives an older bucket after a newer one.
    pub fn ingest(&mut self, tickers: &[Ticker], arrival: DateTime<Utc>) -> Vec<SmolStr> {
        let period_start = self.config.candle_period.align_down(arrival.timestamp_millis());
        let mut touched = Vec::new();
        let mut seen = FnvHashSet::default();

        for ticker in tickers {
            if !ticker.symbol.ends_with(self.config.quote_asset.as_str()) {
                continue;
            }

            // Guard: ignore prices that would poison the running high/low
            if !(ticker.last_price.is_finite() && ticker.last_price > 0.0) {
                debug!(symbol = %ticker.symbol, price = ticker.last_price, "dropping invalid ticker price");
                continue;
            }
            let quantity = if ticker.last_quantity.is_finite() && ticker.last_quantity > 0.0 {
                ticker.last_quantity
            } else {
                0.0
            };

            let state = self.symbols.entry(ticker.symbol.clone()).or_default();
            let series = &mut state.candles;

            match series.current.as_mut() {
                None => {
                    series.current = Some(Candle::new(period_start, ticker.last_price, quantity));
                }
                Some(current) if period_start <= current.start_time => {
                    current.update(ticker.last_price, quantity);
                }
                Some(_) => {
                    let fresh = Candle::new(period_start, ticker.last_price, quantity);
                    if let Some(completed) = series.current.replace(fresh) {
                        series.history.push_back(completed);
                    }
                    while series.history.len() > self.config.history_candles_count {
                        series.history.pop_front();
                    }
                }
            }

            if seen.insert(&ticker.symbol) {
                touched.push(ticker.symbol.clone());
            }
        }

        touched
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolState> {
        self.symbols.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut SymbolState> {
        self.symbols.get_mut(symbol)
    }

    /// Number of tracked symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
