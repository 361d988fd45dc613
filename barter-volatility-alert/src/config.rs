//! Process configuration, read once from environment variables at startup.

use crate::{
    candle::AggregatorConfig, detector::DetectorConfig, error::ConfigError,
    model::CandlePeriod, notifier::TelegramConfig, stream::StreamConfig,
};
use smol_str::SmolStr;
use std::{str::FromStr, time::Duration};

/// Default all-market ticker stream (USDⓈ-M futures).
pub const DEFAULT_STREAM_URL: &str = "wss://fstream.binance.com/ws/!ticker@arr";

/// Immutable configuration injected into every component at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub stream: StreamConfig,
    pub aggregator: AggregatorConfig,
    pub detector: DetectorConfig,
    pub telegram: TelegramConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let token = var("TG_API_KEY").ok_or(ConfigError::Missing("TG_API_KEY"))?;
        let chat_id = var("TG_CHAT_ID").ok_or(ConfigError::Missing("TG_CHAT_ID"))?;
        let proxy_url = var("WS_PROXY");

        let candle_period: CandlePeriod = parse_or(var("CANDLE_PERIOD"), "CANDLE_PERIOD", CandlePeriod::Hours(1))?;

        let history_candles_count: usize = parse_or(var("HISTORY_CANDLES"), "HISTORY_CANDLES", 2)?;
        if history_candles_count < 2 {
            return Err(invalid("HISTORY_CANDLES", history_candles_count, "must be at least 2"));
        }

        let magnification: f64 = parse_or(var("MAGNIFICATION"), "MAGNIFICATION", 2.0)?;
        if !(magnification.is_finite() && magnification > 1.0) {
            return Err(invalid("MAGNIFICATION", magnification, "must be greater than 1"));
        }

        let check_interval_ms: u64 = parse_or(var("CHECK_INTERVAL_MS"), "CHECK_INTERVAL_MS", 1_000)?;

        let heartbeat_secs: u64 = parse_or(var("HEARTBEAT_SECS"), "HEARTBEAT_SECS", 30)?;
        if heartbeat_secs == 0 {
            return Err(invalid("HEARTBEAT_SECS", heartbeat_secs, "must be positive"));
        }
        let reconnect_secs: u64 = parse_or(var("RECONNECT_SECS"), "RECONNECT_SECS", 5)?;
        let connect_timeout_secs: u64 =
            parse_or(var("CONNECT_TIMEOUT_SECS"), "CONNECT_TIMEOUT_SECS", heartbeat_secs)?;
        if connect_timeout_secs == 0 {
            return Err(invalid("CONNECT_TIMEOUT_SECS", connect_timeout_secs, "must be positive"));
        }

        let quote_asset = var("QUOTE_ASSET")
            .map(|asset| asset.to_uppercase())
            .unwrap_or_else(|| "USDT".to_string());

        let stream = StreamConfig::new(var("WS_URL").unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()))
            .with_heartbeat_interval(Duration::from_secs(heartbeat_secs))
            .with_reconnect_delay(Duration::from_secs(reconnect_secs))
            .with_connect_timeout(Duration::from_secs(connect_timeout_secs))
            .with_proxy_url(proxy_url.clone());

        Ok(Self {
            stream,
            aggregator: AggregatorConfig {
                candle_period,
                history_candles_count,
                quote_asset: SmolStr::new(quote_asset),
            },
            detector: DetectorConfig {
                candle_period,
                history_candles_count,
                magnification,
                check_interval: Duration::from_millis(check_interval_ms),
            },
            telegram: TelegramConfig {
                token,
                chat_id,
                proxy_url,
            },
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
            reason: "failed to parse".to_string(),
        }),
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
