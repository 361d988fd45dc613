use barter_volatility_alert::{
    AlertError, Config, StreamClient, TelegramNotifier, TickerMonitor,
};
use rustls::crypto::ring::default_provider;
use std::{process::ExitCode, sync::Arc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise INFO Tracing log subscriber
    init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "volatility-alert terminated with error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AlertError> {
    let _ = default_provider().install_default();

    let config = Config::from_env()?;
    info!(
        period = %config.aggregator.candle_period,
        history = config.aggregator.history_candles_count,
        magnification = config.detector.magnification,
        quote_asset = %config.aggregator.quote_asset,
        "Starting volatility alert"
    );

    let notifier = TelegramNotifier::new(&config.telegram)?;
    let monitor = TickerMonitor::new(config.aggregator, config.detector, Arc::new(notifier));
    let client = StreamClient::new(config.stream, monitor)?.connect();

    client
        .close_on(async {
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            Ok::<_, std::io::Error>(())
        })
        .await
        .map_err(|error| AlertError::Signal(error.to_string()))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
