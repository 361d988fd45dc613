use super::{Connector, MessageHandler, WsConnector, WsSink, WsSource};
use crate::error::StreamError;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Stream client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// WebSocket endpoint URL
    pub url: String,
    /// Optional HTTP proxy the connection is tunnelled through
    pub proxy_url: Option<String>,
    /// Ping interval; the peer is declared dead after twice this without a pong
    pub heartbeat_interval: Duration,
    /// Fixed delay before each reconnection attempt
    pub reconnect_delay: Duration,
    /// Upper bound on one connection attempt, proxy tunnel and handshake included
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: crate::config::DEFAULT_STREAM_URL.to_string(),
            proxy_url: None,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with custom URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set connection attempt timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set (or clear) the forward proxy
    pub fn with_proxy_url(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url;
        self
    }
}

/// Connection state machine of a [`StreamClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: an explicit close was requested.
    Closing,
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    HeartbeatLost,
    Closed,
    Errored,
}

/// Owns one supervised outbound connection and feeds a [`MessageHandler`].
pub struct StreamClient<C, H> {
    config: StreamConfig,
    connector: C,
    handler: H,
}

impl<H> StreamClient<WsConnector, H>
where
    H: MessageHandler,
{
    /// Create a client for the configured WebSocket endpoint.
    pub fn new(config: StreamConfig, handler: H) -> Result<Self, StreamError> {
        let connector = WsConnector::new(&config.url, config.proxy_url.as_deref())?;
        Ok(Self::with_connector(config, connector, handler))
    }
}

impl<C, H> StreamClient<C, H>
where
    C: Connector,
    H: MessageHandler,
{
    pub fn with_connector(config: StreamConfig, connector: C, handler: H) -> Self {
        Self {
            config,
            connector,
            handler,
        }
    }

    /// Spawn the supervisor task and start delivering messages to the handler.
    pub fn connect(self) -> StreamHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let task = tokio::spawn(self.run(shutdown_rx, status_tx));

        StreamHandle {
            shutdown_tx,
            status_rx,
            task,
        }
    }

    /// Main connection loop with fixed-delay reconnect.
    ///
    /// Only one of {connect attempt, live session, reconnect delay} is ever in flight, and each
    /// of them races the shutdown signal.
    async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) {
        let via_proxy = if self.config.proxy_url.is_some() { " via proxy" } else { "" };
        let connect_timeout = self.config.connect_timeout;

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            status_tx.send_replace(ConnectionStatus::Connecting);
            info!("Connecting to {}{}", self.config.url, via_proxy);

            let connected = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                connected = tokio::time::timeout(connect_timeout, self.connector.connect()) => {
                    connected.unwrap_or(Err(StreamError::Timeout(connect_timeout)))
                }
            };

            match connected {
                Ok((sink, source)) => {
                    let end = self.session(sink, source, &mut shutdown_rx, &status_tx).await;
                    if end == SessionEnd::Shutdown {
                        break;
                    }
                    debug!(?end, "Session ended");
                }
                Err(error) => {
                    error!(%error, "Failed to connect to {}", self.config.url);
                }
            }

            status_tx.send_replace(ConnectionStatus::Disconnected);
            info!("Reconnecting in {:?}...", self.config.reconnect_delay);

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        status_tx.send_replace(ConnectionStatus::Closing);
        info!("Stream client closed");
    }

    /// Drive one established connection until it dies or shutdown is requested.
    async fn session(
        &mut self,
        mut sink: WsSink,
        mut source: WsSource,
        shutdown_rx: &mut watch::Receiver<bool>,
        status_tx: &watch::Sender<ConnectionStatus>,
    ) -> SessionEnd {
        status_tx.send_replace(ConnectionStatus::Connected);
        info!("Connected to {}", self.config.url);

        let heartbeat_interval = self.config.heartbeat_interval;
        let mut last_pong = Instant::now();
        let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);

        self.handler.on_open();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    status_tx.send_replace(ConnectionStatus::Closing);
                    if let Err(error) = sink.close().await {
                        debug!(%error, "error closing WebSocket");
                    }
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > heartbeat_interval * 2 {
                        warn!(
                            silent_for = ?last_pong.elapsed(),
                            "Heartbeat lost, terminating connection"
                        );
                        return SessionEnd::HeartbeatLost;
                    }
                    if let Err(error) = sink.send(Message::Ping(vec![].into())).await {
                        warn!(%error, "Failed to send ping");
                    }
                }
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handler.on_message(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handler.on_message(text),
                        Err(error) => warn!(%error, "Dropping non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {
                        // Pings are answered by tungstenite itself
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "Server closed connection");
                        return SessionEnd::Closed;
                    }
                    Some(Err(error)) => {
                        error!(%error, "WebSocket error");
                        return SessionEnd::Errored;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        return SessionEnd::Closed;
                    }
                },
            }
        }
    }
}

/// Handle to a running [`StreamClient`].
#[derive(Debug)]
pub struct StreamHandle {
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Current connection state.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Receiver of every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Permanently stop the client: cancels the heartbeat and any pending reconnect, closes
    /// the live connection and waits for the supervisor task to exit.
    pub async fn close(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(error) = self.task.await {
            error!(%error, "Stream client task failed");
        }
        info!("Stream client closed manually");
    }

    /// Keep the client running until `signal` resolves, then [`close`](Self::close) it.
    ///
    /// The client is closed even if the signal listener itself failed; that failure is
    /// returned to the caller.
    pub async fn close_on<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let signalled = signal.await;
        if let Err(error) = &signalled {
            error!(%error, "Failed to listen for shutdown signal");
        }
        self.close().await;
        signalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Server side of one in-memory connection.
    struct Peer {
        inbound: mpsc::UnboundedSender<Result<Message, WsError>>,
        outbound: mpsc::UnboundedReceiver<Message>,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        attempts: Arc<AtomicUsize>,
        refuse: bool,
        peers: Arc<Mutex<Vec<Peer>>>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<(WsSink, WsSource), StreamError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(StreamError::Connect("connection refused".to_string()));
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded();
            let (outbound_tx, outbound_rx) = mpsc::unbounded();
            self.peers.lock().unwrap().push(Peer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            });

            let sink = outbound_tx.sink_map_err(|_| WsError::ConnectionClosed);
            Ok((Box::pin(sink), Box::pin(inbound_rx)))
        }
    }

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn push(&self, message: Message) {
            let peers = self.peers.lock().unwrap();
            peers.last().unwrap().inbound.unbounded_send(Ok(message)).unwrap();
        }

        fn drain_outbound(&self) -> Vec<Message> {
            let mut peers = self.peers.lock().unwrap();
            let peer = peers.last_mut().unwrap();
            let mut received = Vec::new();
            while let Ok(Some(message)) = peer.outbound.try_next() {
                received.push(message);
            }
            received
        }
    }

    /// Accepts the attempt but never completes the handshake.
    #[derive(Clone, Default)]
    struct StalledConnector {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self) -> Result<(WsSink, WsSource), StreamError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        opens: Arc<AtomicUsize>,
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl MessageHandler for RecordingHandler {
        fn on_open(&mut self) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }

        fn on_message(&mut self, payload: &str) {
            self.messages.lock().unwrap().push(payload.to_string());
        }
    }

    fn config() -> StreamConfig {
        StreamConfig::new("ws://127.0.0.1:9001")
            .with_heartbeat_interval(Duration::from_secs(30))
            .with_reconnect_delay(Duration::from_secs(5))
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new("ws://localhost:8080")
            .with_heartbeat_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(1))
            .with_connect_timeout(Duration::from_secs(10))
            .with_proxy_url(Some("http://127.0.0.1:7890".to_string()));

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.proxy_url.as_deref(), Some("http://127.0.0.1:7890"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_forwarded_to_handler() {
        let connector = FakeConnector::default();
        let handler = RecordingHandler::default();
        let handle =
            StreamClient::with_connector(config(), connector.clone(), handler.clone()).connect();

        advance(1).await;
        assert_eq!(handle.status(), ConnectionStatus::Connected);
        assert_eq!(handler.opens.load(Ordering::SeqCst), 1);

        connector.push(Message::Text("[]".to_string().into()));
        connector.push(Message::Binary(b"[{}]".to_vec().into()));
        advance(1).await;

        assert_eq!(*handler.messages.lock().unwrap(), vec!["[]".to_string(), "[{}]".to_string()]);

        handle.close().await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_lost_reconnects_after_delay() {
        let connector = FakeConnector::default();
        let handler = RecordingHandler::default();
        let handle =
            StreamClient::with_connector(config(), connector.clone(), handler.clone()).connect();

        // Pings at 30s and 60s go unanswered
        advance(61).await;
        let pings = connector
            .drain_outbound()
            .into_iter()
            .filter(|message| matches!(message, Message::Ping(_)))
            .count();
        assert_eq!(pings, 2);
        assert_eq!(handle.status(), ConnectionStatus::Connected);

        // Third tick at 90s sees 90s of silence (> 2 x 30s) and terminates
        advance(30).await;
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
        assert_eq!(connector.attempts(), 1);

        // Reconnect fires once after the fixed 5s delay
        advance(5).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(handle.status(), ConnectionStatus::Connected);
        assert_eq!(handler.opens.load(Ordering::SeqCst), 2);

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_connection_alive() {
        let connector = FakeConnector::default();
        let handle =
            StreamClient::with_connector(config(), connector.clone(), RecordingHandler::default())
                .connect();

        for _ in 0..10 {
            advance(20).await;
            connector.push(Message::Pong(vec![].into()));
        }
        advance(1).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(handle.status(), ConnectionStatus::Connected);

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_schedules_single_reconnect() {
        let connector = FakeConnector::default();
        let handle =
            StreamClient::with_connector(config(), connector.clone(), RecordingHandler::default())
                .connect();

        advance(1).await;
        connector.push(Message::Close(None));
        advance(1).await;
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);

        advance(3).await;
        assert_eq!(connector.attempts(), 1);

        advance(2).await;
        assert_eq!(connector.attempts(), 2);

        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let connector = FakeConnector {
            refuse: true,
            ..Default::default()
        };
        let handle =
            StreamClient::with_connector(config(), connector.clone(), RecordingHandler::default())
                .connect();

        // First attempt fails and a reconnect is pending for 5s
        advance(1).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);

        let mut status = handle.subscribe();
        handle.close().await;
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Closing);

        advance(60).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connected_closes_socket() {
        let connector = FakeConnector::default();
        let handle =
            StreamClient::with_connector(config(), connector.clone(), RecordingHandler::default())
                .connect();

        advance(1).await;
        handle.close().await;

        let mut peers = connector.peers.lock().unwrap();
        // Sink closed: the peer observes end-of-stream
        assert!(matches!(peers[0].outbound.try_next(), Ok(None)));
        drop(peers);

        advance(60).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_times_out_and_retries() {
        let connector = StalledConnector::default();
        let handle = StreamClient::with_connector(
            config().with_connect_timeout(Duration::from_secs(10)),
            connector.clone(),
            RecordingHandler::default(),
        )
        .connect();

        advance(1).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), ConnectionStatus::Connecting);

        // Attempt abandoned at 10s, reconnect delay pending
        advance(10).await;
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        // Second attempt at 15s
        advance(5).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(handle.status(), ConnectionStatus::Connecting);

        // Close cancels an in-flight attempt
        let mut status = handle.subscribe();
        handle.close().await;
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Closing);

        advance(60).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_on_failed_signal_still_closes() {
        let connector = FakeConnector::default();
        let handle =
            StreamClient::with_connector(config(), connector.clone(), RecordingHandler::default())
                .connect();
        let mut status = handle.subscribe();

        advance(1).await;
        let result = handle
            .close_on(async { Err::<(), _>(std::io::Error::other("no signal handler")) })
            .await;

        assert!(result.is_err());
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Closing);
        advance(60).await;
        assert_eq!(connector.attempts(), 1);
    }
}
