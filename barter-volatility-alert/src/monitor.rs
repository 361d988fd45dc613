//! Glue between the raw feed and the aggregation / detection engine.

use crate::{
    candle::{AggregatorConfig, CandleAggregator},
    detector::{Alert, AnomalyDetector, DetectorConfig},
    error::FeedError,
    model::Ticker,
    notifier::{AlertSink, dispatch},
    stream::MessageHandler,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Accepted feed payload shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedPayload {
    /// Raw stream, eg/ `/ws/!ticker@arr`.
    Batch(Vec<Ticker>),
    /// Combined stream wrapper, eg/ `/stream?streams=!ticker@arr`.
    Combined { data: Vec<Ticker> },
}

/// Decode one feed message into a ticker batch.
pub fn parse_batch(payload: &str) -> Result<Vec<Ticker>, FeedError> {
    let batch = match serde_json::from_str::<FeedPayload>(payload)? {
        FeedPayload::Batch(tickers) => tickers,
        FeedPayload::Combined { data } => data,
    };
    Ok(batch)
}

/// Consumes ticker batches, maintains candles and dispatches alerts.
pub struct TickerMonitor {
    aggregator: CandleAggregator,
    detector: AnomalyDetector,
    sink: Arc<dyn AlertSink>,
}

impl TickerMonitor {
    pub fn new(
        aggregator: AggregatorConfig,
        detector: DetectorConfig,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            aggregator: CandleAggregator::new(aggregator),
            detector: AnomalyDetector::new(detector),
            sink,
        }
    }

    pub fn aggregator(&self) -> &CandleAggregator {
        &self.aggregator
    }

    /// Decode and process one raw feed message received at `now`.
    ///
    /// A malformed payload is rejected as a whole, leaving all state untouched.
    pub fn handle_payload(&mut self, payload: &str, now: DateTime<Utc>) -> Result<Vec<Alert>, FeedError> {
        let batch = parse_batch(payload)?;
        Ok(self.process_batch(&batch, now))
    }

    /// Apply a batch, then evaluate every symbol it touched.
    ///
    /// Raised alerts are dispatched on detached tasks and also returned.
    pub fn process_batch(&mut self, batch: &[Ticker], now: DateTime<Utc>) -> Vec<Alert> {
        let touched = self.aggregator.ingest(batch, now);

        let mut alerts = Vec::new();
        for symbol in touched {
            let Some(state) = self.aggregator.get_mut(&symbol) else {
                continue;
            };

            if let Some(alert) =
                self.detector
                    .maybe_evaluate(&symbol, &state.candles, &mut state.checks, now)
            {
                info!(
                    symbol = %alert.symbol,
                    amplitude = alert.amplitude,
                    avg_history_amplitude = alert.avg_history_amplitude,
                    "abnormal volatility detected"
                );
                dispatch(Arc::clone(&self.sink), alert.to_string());
                alerts.push(alert);
            }
        }

        alerts
    }
}

impl MessageHandler for TickerMonitor {
    fn on_open(&mut self) {
        info!(
            tracked_symbols = self.aggregator.len(),
            "Subscribed to all tickers"
        );
    }

    fn on_message(&mut self, payload: &str) {
        match self.handle_payload(payload, Utc::now()) {
            Ok(alerts) => {
                if !alerts.is_empty() {
                    debug!(count = alerts.len(), "alerts dispatched");
                }
            }
            Err(error) => {
                let preview: String = payload.chars().take(200).collect();
                warn!(%error, %preview, "Discarding feed message");
            }
        }
    }
}
