//! Scripted in-memory stream and snapshot sources.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Value};
use spinfeed::error::{AppError, Result};
use spinfeed::sources::{FrameStream, SnapshotSource, StreamConnector};
use spinfeed::types::ClientEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Frames pushed into an open scripted connection.
pub type FrameSender = mpsc::UnboundedSender<Result<String>>;

enum Script {
    Fail(String),
    Open(mpsc::UnboundedReceiver<Result<String>>),
}

/// Connector that plays back queued outcomes, one per connection attempt.
/// With nothing queued, attempts fail.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, reason: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Fail(reason.to_string()));
    }

    /// Queue a successful connection and return its frame sender.
    /// Dropping the sender closes the connection.
    pub fn open(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Open(rx));
        tx
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl StreamConnector for ScriptedConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<FrameStream>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url);
        let script = self.scripts.lock().unwrap().pop_front();

        Box::pin(async move {
            match script {
                Some(Script::Open(rx)) => {
                    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|frame| (frame, rx))
                    });
                    Ok(frames.boxed())
                }
                Some(Script::Fail(reason)) => Err(AppError::Transport(reason)),
                None => Err(AppError::Transport("connection refused".to_string())),
            }
        })
    }
}

/// Snapshot source that plays back queued responses, then a fallback.
pub struct ScriptedSource {
    responses: Mutex<VecDeque<std::result::Result<Value, String>>>,
    fallback: Mutex<std::result::Result<Value, String>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(json!([]))),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push_ok(&self, body: Value) {
        self.responses.lock().unwrap().push_back(Ok(body));
    }

    pub fn push_err(&self, reason: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
    }

    pub fn set_fallback(&self, response: std::result::Result<Value, String>) {
        *self.fallback.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> std::result::Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

impl SnapshotSource for ScriptedSource {
    fn fetch_all(&self, _access_token: Option<String>) -> BoxFuture<'static, Result<Value>> {
        let response = self.next();
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response.map_err(AppError::Fetch)
        })
    }

    fn fetch_detailed(
        &self,
        key: String,
        _access_token: Option<String>,
    ) -> BoxFuture<'static, Result<Value>> {
        Box::pin(async move { Err(AppError::NotFound(key)) })
    }
}

/// Callback forwarding every event into a channel.
pub fn recorder() -> (
    impl Fn(&ClientEvent) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<ClientEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |event: &ClientEvent| {
        let _ = tx.send(event.clone());
    };
    (callback, rx)
}

/// Callback collecting events synchronously.
pub fn collector() -> (
    impl Fn(&ClientEvent) + Send + Sync + 'static,
    Arc<Mutex<Vec<ClientEvent>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback = move |event: &ClientEvent| sink.lock().unwrap().push(event.clone());
    (callback, seen)
}

/// Next event, failing the test if none arrives within a minute of (virtual) time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

pub fn update_frame(payloads: Value) -> Result<String> {
    Ok(json!({ "type": "update", "data": payloads }).to_string())
}
