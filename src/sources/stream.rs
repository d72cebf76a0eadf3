//! Push-stream transport.
//!
//! Owns the single WebSocket connection to the spin feed, drives the
//! `Idle -> Connecting -> Connected -> Reconnecting(n) -> Disconnected` state
//! machine and publishes lifecycle and frame events on a broadcast channel.

use super::Backoff;
use crate::error::{AppError, Result};
use crate::types::{ConnectionState, TransportEvent};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Text frames received over one connection. The stream ends when the
/// connection closes; an `Err` item means the connection failed.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Opens push-stream connections.
pub trait StreamConnector: Send + Sync + 'static {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<FrameStream>>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl StreamConnector for WsConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<FrameStream>> {
        Box::pin(async move {
            let (ws_stream, _) = connect_async(url.as_str()).await?;

            let frames = futures_util::stream::unfold(ws_stream, |mut ws| async move {
                loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => return Some((Ok(text), ws)),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => return Some((Ok(text), ws)),
                            Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws.send(Message::Pong(data)).await {
                                return Some((Err(AppError::from(e)), ws));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Stream closed by server: {:?}", frame);
                            return None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Some((Err(AppError::from(e)), ws)),
                        None => return None,
                    }
                }
            });

            Ok(frames.boxed())
        })
    }
}

struct TransportInner {
    state: ConnectionState,
    /// Consecutive failures since the last successful connect.
    attempt: u32,
    /// Bumped on every (re)start and disconnect; events from older runs are dropped.
    generation: u64,
    task: Option<JoinHandle<()>>,
    last_received_at: Option<DateTime<Utc>>,
    access_token: Option<String>,
}

/// Single push-stream connection with automatic reconnect.
pub struct StreamTransport {
    url: String,
    connector: Arc<dyn StreamConnector>,
    backoff: Backoff,
    inner: Mutex<TransportInner>,
    tx: broadcast::Sender<TransportEvent>,
    forced_reconnects: AtomicU64,
}

impl StreamTransport {
    /// Create a new transport. Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn StreamConnector>,
        backoff: Backoff,
    ) -> Arc<Self> {
        let (tx, _) = broadcast::channel(1024);

        Arc::new(Self {
            url: url.into(),
            connector,
            backoff,
            inner: Mutex::new(TransportInner {
                state: ConnectionState::Idle,
                attempt: 0,
                generation: 0,
                task: None,
                last_received_at: None,
                access_token: None,
            }),
            tx,
            forced_reconnects: AtomicU64::new(0),
        })
    }

    /// Subscribe to transport events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }

    /// Open the connection unless one is already open or being established.
    pub fn connect(self: &Arc<Self>) {
        let mut inner = self.lock();
        let running = inner.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        if running && !matches!(inner.state, ConnectionState::Idle | ConnectionState::Disconnected) {
            debug!("Stream already {}, not connecting again", inner.state);
            return;
        }
        self.start(&mut inner);
    }

    /// Drop the current connection (if any) and start over with a fresh retry budget.
    pub fn force_reconnect(self: &Arc<Self>) {
        let mut inner = self.lock();
        self.restart(&mut inner);
    }

    /// Like [`force_reconnect`](Self::force_reconnect), but leaves a stream that
    /// was never started or was stopped by [`disconnect`](Self::disconnect) alone.
    ///
    /// Returns whether a reconnect was started.
    pub fn force_reconnect_if_started(self: &Arc<Self>) -> bool {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Idle {
            debug!("Stream is stopped, not reconnecting");
            return false;
        }
        self.restart(&mut inner);
        true
    }

    /// Close the connection and stop retrying.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }

        let was_active = inner.state != ConnectionState::Idle;
        inner.state = ConnectionState::Idle;
        inner.attempt = 0;

        if was_active {
            info!("Stream disconnected by caller");
            let _ = self.tx.send(TransportEvent::Disconnect);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.lock().attempt
    }

    pub fn last_received_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_received_at
    }

    pub fn forced_reconnects(&self) -> u64 {
        self.forced_reconnects.load(Ordering::SeqCst)
    }

    /// Set the access token sent with the next connection.
    pub fn set_access_token(&self, token: Option<String>) {
        self.lock().access_token = token;
    }

    fn lock(&self) -> MutexGuard<'_, TransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn restart(self: &Arc<Self>, inner: &mut TransportInner) {
        self.forced_reconnects.fetch_add(1, Ordering::SeqCst);
        info!("Forcing stream reconnect (was {})", inner.state);
        self.start(inner);
    }

    fn start(self: &Arc<Self>, inner: &mut TransportInner) {
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        inner.attempt = 0;
        inner.state = ConnectionState::Connecting;

        let generation = inner.generation;
        let transport = self.clone();
        inner.task = Some(tokio::spawn(async move {
            transport.run(generation).await;
        }));
    }

    /// Apply a state change and emit its events, unless `generation` is stale.
    ///
    /// Returns the resulting state, or `None` if this run was superseded.
    fn transition<F, I>(&self, generation: u64, f: F) -> Option<ConnectionState>
    where
        F: FnOnce(&mut TransportInner) -> I,
        I: IntoIterator<Item = TransportEvent>,
    {
        let mut inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        for event in f(&mut inner) {
            let _ = self.tx.send(event);
        }
        Some(inner.state)
    }

    fn connect_url(&self, generation: u64) -> Option<String> {
        let inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        Some(with_token(&self.url, inner.access_token.as_deref()))
    }

    async fn run(self: Arc<Self>, generation: u64) {
        loop {
            let Some(url) = self.connect_url(generation) else {
                return;
            };

            info!("Connecting to spin stream");
            let mut events = Vec::new();

            match self.connector.connect(url).await {
                Ok(mut frames) => {
                    let connected = self.transition(generation, |inner| {
                        inner.state = ConnectionState::Connected;
                        inner.attempt = 0;
                        Some(TransportEvent::Connect)
                    });
                    if connected.is_none() {
                        return;
                    }
                    info!("Connected to spin stream");

                    while let Some(frame) = frames.next().await {
                        match frame {
                            Ok(text) => {
                                let current = self.transition(generation, |inner| {
                                    inner.last_received_at = Some(Utc::now());
                                    Some(TransportEvent::Message(text))
                                });
                                if current.is_none() {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("Spin stream read error: {}", e);
                                events.push(TransportEvent::Error(e.to_string()));
                                break;
                            }
                        }
                    }

                    warn!("Spin stream connection lost");
                    events.push(TransportEvent::Disconnect);
                }
                Err(e) => {
                    warn!("Spin stream connect failed: {}", e);
                    events.push(TransportEvent::Error(e.to_string()));
                }
            }

            let next = self.transition(generation, |inner| {
                inner.attempt += 1;
                if self.backoff.exhausted(inner.attempt) {
                    inner.state = ConnectionState::Disconnected;
                    if !events.contains(&TransportEvent::Disconnect) {
                        events.push(TransportEvent::Disconnect);
                    }
                } else {
                    inner.state = ConnectionState::Reconnecting {
                        attempt: inner.attempt,
                    };
                    events.push(TransportEvent::Reconnecting {
                        attempt: inner.attempt,
                    });
                }
                events
            });

            match next {
                Some(ConnectionState::Reconnecting { attempt }) => {
                    let delay = self.backoff.delay(attempt);
                    info!("Reconnect attempt {} in {:?}", attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                Some(_) => {
                    warn!(
                        "Spin stream gave up after {} attempts; waiting for a manual reconnect",
                        self.backoff.max_attempts()
                    );
                    return;
                }
                None => return,
            }
        }
    }
}

/// Append `token` as a query parameter to `url`.
fn with_token(url: &str, token: Option<&str>) -> String {
    let Some(token) = token else {
        return url.to_string();
    };

    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("token", token);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
