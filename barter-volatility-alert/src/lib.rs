//! Barter Volatility Alert
//!
//! Watches the all-market ticker stream and raises an alert whenever a symbol's
//! in-progress candle ranges far wider than its recent history.
//!
//! The library includes:
//! - Supervised WebSocket client with heartbeat and fixed-delay reconnect
//! - Per-symbol rolling candle aggregation
//! - Amplitude anomaly detection with once-per-candle deduplication
//! - Best-effort Telegram alert delivery

pub mod candle;
pub mod config;
pub mod detector;
pub mod error;
pub mod model;
pub mod monitor;
pub mod notifier;
pub mod stream;

// Re-export commonly used types for convenience
pub use candle::{AggregatorConfig, CandleAggregator};
pub use config::Config;
pub use detector::{Alert, AnomalyDetector, DetectorConfig, Direction};
pub use error::{AlertError, ConfigError, FeedError, NotifyError, StreamError};
pub use model::{Candle, CandlePeriod, CandleSeries, CheckState, SymbolState, Ticker};
pub use monitor::TickerMonitor;
pub use notifier::{AlertSink, TelegramConfig, TelegramNotifier};
pub use stream::{
    ConnectionStatus, Connector, MessageHandler, StreamClient, StreamConfig, StreamHandle,
    WsConnector,
};
