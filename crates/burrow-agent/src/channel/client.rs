//! Control channel client
//!
//! Keeps one WebSocket open to the control plane. A supervisor task owns the
//! connection lifecycle; every established session runs four tasks side by
//! side:
//!
//! - a writer draining the outbound queue into the socket
//! - a heartbeat sending a WebSocket ping every `ping_interval` and giving up
//!   when no pong arrives within `ping_timeout`
//! - a reader decoding frames, handing pongs to the heartbeat at once and
//!   queueing control messages
//! - a dispatcher running the registered handler for one queued message at a
//!   time
//!
//! When any of them stops, the session is torn down, a
//! [`ChannelEvent::Disconnected`] is broadcast and the supervisor retries
//! after `reconnect_interval`, forever, until [`ControlChannelClient::close`].

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use burrow_core::config::ControlChannelSection;
use burrow_core::traits::CredentialProvider;
use burrow_core::GatewayError;
use burrow_protocol::ControlMessage;

use super::interval::IntervalHandle;
use super::registry::{HandlerRegistry, MessageHandler};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames queued for the writer task
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Decoded messages waiting for their handler
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events buffered per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// How long the writer waits for a close frame to go out
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Value of the `clientType` query parameter on the handshake
const CLIENT_TYPE: &str = "remoteExitNode";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid control plane endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to obtain credentials: {0}")]
    Credentials(#[from] GatewayError),

    #[error("Handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("Control channel is already running")]
    AlreadyStarted,
}

/// Connection state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
}

/// Timing knobs for the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from(&ControlChannelSection::default())
    }
}

impl From<&ControlChannelSection> for ChannelOptions {
    fn from(section: &ControlChannelSection) -> Self {
        Self {
            reconnect_interval: section.reconnect_interval,
            ping_interval: section.ping_interval,
            ping_timeout: section.ping_timeout,
            connect_timeout: section.connect_timeout,
        }
    }
}

/// Build the WebSocket URL for `endpoint`, e.g.
/// `https://host` becomes `wss://host/api/v1/ws?token=..&clientType=remoteExitNode`.
pub fn control_channel_url(endpoint: &str, token: &str) -> Result<Url, ChannelError> {
    let trimmed = endpoint.trim_end_matches('/');
    let base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        trimmed.to_string()
    } else {
        return Err(ChannelError::InvalidEndpoint(endpoint.to_string()));
    };

    let mut url = Url::parse(&format!("{}/api/v1/ws", base))
        .map_err(|e| ChannelError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("clientType", CLIENT_TYPE);
    Ok(url)
}

/// Client for the control plane WebSocket. Cheap to clone.
#[derive(Clone)]
pub struct ControlChannelClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    options: ChannelOptions,
    credentials: Arc<dyn CredentialProvider>,
    registry: HandlerRegistry,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ChannelEvent>,
    outbound: Mutex<Option<mpsc::Sender<WsMessage>>>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannelClient {
    pub fn new(
        endpoint: impl Into<String>,
        options: ChannelOptions,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                options,
                credentials,
                registry: HandlerRegistry::new(),
                state,
                events,
                outbound: Mutex::new(None),
                shutdown: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Register the handler for one message type, replacing any earlier one
    pub fn register_handler(&self, message_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.inner.registry.register(message_type, handler);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to connect/disconnect events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    /// Start the connection supervisor.
    ///
    /// Returns immediately; handshake failures are logged and retried in
    /// the background.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut supervisor = self.inner.supervisor.lock().await;
        if supervisor.is_some() || self.inner.shutdown.is_cancelled() {
            return Err(ChannelError::AlreadyStarted);
        }

        let inner = Arc::clone(&self.inner);
        *supervisor = Some(tokio::spawn(async move { inner.supervise().await }));
        Ok(())
    }

    /// Send one message. Returns `false` (and logs) when not connected.
    pub async fn send_message(&self, message_type: &str, data: Value) -> bool {
        self.inner.send(ControlMessage::new(message_type, data)).await
    }

    /// Send the same message every `period`, starting one period from now
    pub fn send_message_interval(&self, message_type: &str, data: Value, period: Duration) -> IntervalHandle {
        self.send_message_interval_with(message_type, period, move || data.clone())
    }

    /// Like [`Self::send_message_interval`] but builds the payload on every tick
    pub fn send_message_interval_with<F>(&self, message_type: &str, period: Duration, payload: F) -> IntervalHandle
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let cancel = self.inner.shutdown.child_token();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let message_type = message_type.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }
                inner.send(ControlMessage::new(message_type.as_str(), payload())).await;
            }

            tracing::debug!("Interval sender for {} stopped", message_type);
        });

        IntervalHandle::new(cancel, task)
    }

    /// Close the socket, stop every timer and wait for the supervisor.
    ///
    /// A handler that is running is allowed to finish.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let supervisor = self.inner.supervisor.lock().await.take();
        if let Some(task) = supervisor {
            if let Err(e) = task.await {
                tracing::warn!("Control channel supervisor ended abnormally: {}", e);
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Control channel state {:?} -> {:?}", previous, state);
        }
    }

    async fn send(&self, message: ControlMessage) -> bool {
        if *self.state.borrow() != ConnectionState::Connected {
            tracing::warn!("Not connected, dropping {} message", message.message_type);
            return false;
        }

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {} message: {}", message.message_type, e);
                return false;
            }
        };

        let outbound = self.outbound.lock().await.clone();
        match outbound {
            Some(tx) => match tx.send(WsMessage::Text(text)).await {
                Ok(()) => {
                    tracing::debug!("Sent {} message", message.message_type);
                    true
                }
                Err(_) => {
                    tracing::warn!("Connection closed, dropping {} message", message.message_type);
                    false
                }
            },
            None => {
                tracing::warn!("Not connected, dropping {} message", message.message_type);
                false
            }
        }
    }

    async fn supervise(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            match self.establish().await {
                Ok(stream) => Arc::clone(&self).run_session(stream).await,
                Err(e) => tracing::warn!("Failed to connect to control plane: {}", e),
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            tracing::info!("Reconnecting in {:?}", self.options.reconnect_interval);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.reconnect_interval) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Control channel stopped");
    }

    async fn establish(&self) -> Result<WsStream, ChannelError> {
        let token = self.credentials.token().await?;
        let url = control_channel_url(&self.endpoint, &token)?;

        tracing::debug!("Connecting to control plane at {}", self.endpoint);
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (stream, _response) = tokio::select! {
            _ = self.shutdown.cancelled() => {
                return Err(ChannelError::Handshake {
                    endpoint: self.endpoint.clone(),
                    message: "shutting down".to_string(),
                });
            }
            result = tokio::time::timeout(self.options.connect_timeout, connect) => result
                .map_err(|_| ChannelError::Timeout(self.options.connect_timeout))?
                .map_err(|e| ChannelError::Handshake {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                })?,
        };

        Ok(stream)
    }

    async fn run_session(self: Arc<Self>, stream: WsStream) {
        let (sink, stream) = stream.split();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (pong_tx, pong_rx) = mpsc::channel(8);
        let session = self.shutdown.child_token();

        *self.outbound.lock().await = Some(out_tx.clone());
        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to control plane at {}", self.endpoint);
        let _ = self.events.send(ChannelEvent::Connected);

        let mut tasks = JoinSet::new();
        tasks.spawn(write_loop(sink, out_rx, session.clone()));
        tasks.spawn(heartbeat_loop(
            out_tx,
            pong_rx,
            self.options.ping_interval,
            self.options.ping_timeout,
            session.clone(),
        ));
        tasks.spawn(read_loop(stream, pong_tx, inbound_tx, session.clone()));
        tasks.spawn(Arc::clone(&self).dispatch_loop(inbound_rx, session.clone()));

        // The first task to stop ends the session; a handler that is
        // running is allowed to finish.
        let _ = tasks.join_next().await;
        session.cancel();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Control channel task ended abnormally: {}", e);
            }
        }

        *self.outbound.lock().await = None;
        tracing::info!("Disconnected from control plane");
        let _ = self.events.send(ChannelEvent::Disconnected);
    }

    /// Run handlers one message at a time, apart from the socket reader
    async fn dispatch_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<ControlMessage>, session: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                _ = session.cancelled() => return,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };

            tracing::debug!("Received message: {}", message.message_type);
            self.registry.dispatch(message).await;
        }
    }
}

/// Read frames until the socket closes. Pongs go straight to the heartbeat
/// so a slow handler never looks like a dead peer.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    pongs: mpsc::Sender<()>,
    inbound: mpsc::Sender<ControlMessage>,
    session: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = session.cancelled() => return,
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("Dropping non UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(WsMessage::Pong(_))) => {
                let _ = pongs.try_send(());
                continue;
            }
            Some(Ok(WsMessage::Close(frame))) => {
                tracing::info!("Control plane closed the connection: {:?}", frame);
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!("Control channel read error: {}", e);
                return;
            }
            None => {
                tracing::info!("Control channel stream ended");
                return;
            }
        };

        let message = match ControlMessage::decode(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed control message: {}", e);
                continue;
            }
        };

        tokio::select! {
            _ = session.cancelled() => return,
            sent = inbound.send(message) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::Receiver<WsMessage>,
    session: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = session.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = sink.send(message).await {
            tracing::warn!("Control channel write failed: {}", e);
            break;
        }
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::debug!("Timed out sending close frame");
    }
}

async fn heartbeat_loop(
    outbound: mpsc::Sender<WsMessage>,
    mut pongs: mpsc::Receiver<()>,
    ping_interval: Duration,
    ping_timeout: Duration,
    session: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = ticker.tick() => {}
        }

        // stale pongs must not satisfy this ping
        while pongs.try_recv().is_ok() {}

        if outbound.send(WsMessage::Ping(Vec::new())).await.is_err() {
            return;
        }

        tokio::select! {
            _ = session.cancelled() => return,
            pong = tokio::time::timeout(ping_timeout, pongs.recv()) => match pong {
                Ok(Some(())) => tracing::trace!("Pong received"),
                Ok(None) => return,
                Err(_) => {
                    tracing::warn!("No pong within {:?}, dropping connection", ping_timeout);
                    return;
                }
            },
        }
    }
}
