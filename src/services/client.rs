//! The stream client: one push connection plus a polling safety net, feeding a
//! deduplicated cache that many subscribers observe.

use super::distributor::{Callback, EventDistributor, Subscription};
use super::gate::{AccessCredential, AccessGate};
use super::normalizer::{self, RawBatch};
use super::{ConnectionSupervisor, EntityCache};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::sources::{
    Backoff, HttpSnapshotSource, SnapshotFetcher, SnapshotSource, StreamConnector,
    StreamTransport, WsConnector,
};
use crate::types::{
    Channel, ClientEvent, ConnectionState, ConnectionStatus, DetailedRoulette, EntityFilter,
    RouletteEntity, SpinResult, SpinStats, TransportEvent,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one applied batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Entities stored or refreshed.
    pub applied: usize,
    /// Total spins that were new.
    pub new_spins: usize,
    /// Entities withheld by the server.
    pub withheld: usize,
    /// The whole batch was withheld.
    pub gated: bool,
}

/// Real-time roulette feed client.
///
/// Owns exactly one stream connection however many subscribers there are.
/// Construct once, share as `Arc<StreamClient>`.
pub struct StreamClient {
    config: Config,
    transport: Arc<StreamTransport>,
    fetcher: Arc<SnapshotFetcher>,
    gate: Arc<AccessGate>,
    cache: EntityCache,
    distributor: Arc<EventDistributor>,
    supervisor: Arc<ConnectionSupervisor>,
    /// Serializes batch application and the events it publishes.
    apply_lock: Mutex<()>,
    /// Bumped by `disconnect`; work started under an older session is discarded.
    session: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamClient {
    /// Client talking to the configured WebSocket and REST endpoints.
    pub fn new(config: Config) -> Arc<Self> {
        let source = HttpSnapshotSource::new(
            config.poll.snapshot_url.clone(),
            config.poll.detailed_url.clone(),
        );
        Self::with_sources(config, Arc::new(WsConnector), Arc::new(source))
    }

    /// Client with custom stream and snapshot sources.
    pub fn with_sources(
        config: Config,
        connector: Arc<dyn StreamConnector>,
        source: Arc<dyn SnapshotSource>,
    ) -> Arc<Self> {
        let config = config.with_nonzero_intervals();
        let transport = StreamTransport::new(
            config.stream.url.clone(),
            connector,
            Backoff::from_config(&config.backoff),
        );
        let fetcher = Arc::new(SnapshotFetcher::new(
            source,
            transport.clone(),
            config.poll.timeout,
            config.poll.failure_threshold,
        ));

        if let Some(token) = config.stream.access_token.clone() {
            transport.set_access_token(Some(token.clone()));
            fetcher.set_access_token(Some(token));
        }

        let gate = Arc::new(AccessGate::new(transport.clone(), fetcher.clone()));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport.clone(),
            gate.clone(),
            config.supervisor_interval,
        ));

        Arc::new(Self {
            cache: EntityCache::new(config.history_cap),
            config,
            transport,
            fetcher,
            gate,
            distributor: EventDistributor::new(),
            supervisor,
            apply_lock: Mutex::new(()),
            session: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the stream, the defensive poll and the supervisor.
    ///
    /// Calling this again while running does not open a second connection.
    pub fn connect_stream(self: &Arc<Self>) {
        self.start_tasks();
        self.transport.connect();
    }

    /// Drop the connection and reconnect with a fresh retry budget.
    pub fn force_reconnect_stream(self: &Arc<Self>) {
        self.start_tasks();
        self.transport.force_reconnect();
    }

    /// Stop the stream and every background loop.
    ///
    /// Takes effect before the next delivery; fetches still in flight are discarded.
    pub fn disconnect(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);

        for task in self.lock_tasks().drain(..) {
            task.abort();
        }

        let was_active = self.transport.state() != ConnectionState::Idle;
        self.transport.disconnect();

        if was_active {
            info!("Stream client disconnected");
            self.distributor.publish(&ClientEvent::Disconnect);
        }
    }

    /// Every cached roulette, ordered by display name.
    pub fn get_all_roulettes(&self) -> Vec<RouletteEntity> {
        self.cache.all()
    }

    pub fn get_roulette(&self, key: &str) -> Option<RouletteEntity> {
        self.cache.get(key)
    }

    /// Fetch a snapshot now, apply it and return the resulting cache.
    pub async fn force_update(&self) -> Result<Vec<RouletteEntity>> {
        let session = self.session.load(Ordering::SeqCst);
        self.refresh(session).await?;
        Ok(self.cache.all())
    }

    pub fn get_status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    /// Cached history of a roulette, by id or display name.
    pub fn get_preloaded_history(&self, key: &str) -> Option<Vec<SpinResult>> {
        self.cache.history(key)
    }

    /// Receive a full snapshot now (if any data is cached) and after every
    /// applied batch.
    pub fn subscribe<F>(self: &Arc<Self>, id: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(id.into(), Channel::Update, None, Arc::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe), restricted to the roulettes `filter` accepts.
    pub fn subscribe_filtered<F>(
        self: &Arc<Self>,
        id: impl Into<String>,
        filter: EntityFilter,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(id.into(), Channel::Update, Some(filter), Arc::new(callback))
    }

    /// Listen on a named channel.
    pub fn on<F>(self: &Arc<Self>, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(format!("on:{}", channel), channel, None, Arc::new(callback))
    }

    /// Listen on a named channel for a subset of roulettes.
    pub fn on_filtered<F>(
        self: &Arc<Self>,
        channel: Channel,
        filter: EntityFilter,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(format!("on:{}", channel), channel, Some(filter), Arc::new(callback))
    }

    pub fn subscriber_count(&self) -> usize {
        self.distributor.subscriber_count()
    }

    /// Supply a credential for withheld data.
    ///
    /// Reconnects a running stream and returns `true`. After
    /// [`disconnect`](Self::disconnect) the token is only kept for the next
    /// [`connect_stream`](Self::connect_stream).
    pub fn supply_credential(&self, credential: AccessCredential) -> Result<bool> {
        self.gate.supply_credential(credential)
    }

    pub fn access_required(&self) -> bool {
        self.gate.access_required()
    }

    /// Fetch the richer per-roulette payload, with statistics over its history.
    pub async fn fetch_detailed(&self, key: &str) -> Result<DetailedRoulette> {
        let raw = self.fetcher.fetch_detailed(key).await?;
        if normalizer::is_withheld(&raw) {
            return Err(AppError::AccessRequired);
        }

        let detailed = normalizer::extract_batch(raw.clone())
            .ok()
            .and_then(|batch| batch.payloads.into_iter().next())
            .and_then(|payload| normalizer::normalize_entity(&payload).ok());

        let entity = match (detailed, self.cache.get(key)) {
            (Some(entity), _) if !entity.history.is_empty() => entity,
            (_, Some(cached)) => cached,
            (Some(entity), None) => entity,
            (None, None) => return Err(AppError::NotFound(key.to_string())),
        };

        Ok(DetailedRoulette {
            stats: SpinStats::from_history(&entity.history),
            entity,
            raw,
        })
    }

    /// Gate, normalize and apply one batch, then notify subscribers.
    ///
    /// This is the only path that writes to the cache. Subscribers are called
    /// while it runs, so it must not be called from inside a callback.
    pub fn apply_batch(&self, batch: RawBatch) -> ApplyReport {
        let _guard = self.lock_apply();
        self.apply_locked(batch)
    }

    fn apply_locked(&self, batch: RawBatch) -> ApplyReport {
        let decision = self.gate.inspect(batch);
        let mut report = ApplyReport {
            withheld: decision.withheld.len(),
            gated: decision.whole_batch,
            ..ApplyReport::default()
        };

        if decision.is_gated() {
            self.distributor.publish(&ClientEvent::AccessRequired {
                entities: decision.withheld.clone(),
            });
        }
        if decision.cleartext.is_empty() {
            return report;
        }

        let entities = normalizer::normalize_batch(&decision.cleartext);
        let outcomes = self.cache.apply_batch(entities);
        report.applied = outcomes.len();

        for outcome in &outcomes {
            if outcome.new_spins.is_empty() {
                continue;
            }
            report.new_spins += outcome.new_spins.len();
            debug!(
                "{} new spins for '{}'",
                outcome.new_spins.len(),
                outcome.entity_id
            );
            self.distributor.publish(&ClientEvent::NewSpins {
                entity_id: outcome.entity_id.clone(),
                display_name: outcome.display_name.clone(),
                spins: outcome.new_spins.clone(),
            });
        }

        if !outcomes.is_empty() {
            self.distributor.publish(&ClientEvent::Update(self.cache.all()));
        }

        report
    }

    fn register(
        self: &Arc<Self>,
        label: String,
        channel: Channel,
        filter: Option<EntityFilter>,
        callback: Callback,
    ) -> Subscription {
        let client = self.clone();
        let subscription = self.distributor.subscribe(label, channel, filter, callback, move || {
            if channel != Channel::Update {
                return None;
            }
            let all = client.cache.all();
            (!all.is_empty()).then_some(ClientEvent::Update(all))
        });

        self.connect_stream();
        subscription
    }

    async fn refresh(&self, session: u64) -> Result<ApplyReport> {
        let batch = self.fetcher.fetch_all().await?;

        let _guard = self.lock_apply();
        if self.session.load(Ordering::SeqCst) != session {
            debug!("Discarding snapshot fetched before disconnect");
            return Err(AppError::Cancelled);
        }
        Ok(self.apply_locked(batch))
    }

    fn handle_transport_event(&self, event: TransportEvent, session: u64) {
        if self.session.load(Ordering::SeqCst) != session {
            return;
        }

        let client_event = match event {
            TransportEvent::Message(text) => {
                match normalizer::parse_frame(&text) {
                    Ok(batch) => {
                        let _guard = self.lock_apply();
                        if self.session.load(Ordering::SeqCst) == session {
                            self.apply_locked(batch);
                        }
                    }
                    Err(e) => {
                        warn!("Dropping stream frame: {}", e);
                        self.publish(ClientEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
                return;
            }
            TransportEvent::Connect => ClientEvent::Connect,
            TransportEvent::Disconnect => ClientEvent::Disconnect,
            TransportEvent::Error(message) => ClientEvent::Error { message },
            TransportEvent::Reconnecting { attempt } => ClientEvent::Reconnecting { attempt },
        };
        self.publish(client_event);
    }

    fn publish(&self, event: ClientEvent) {
        self.distributor.publish(&event);
    }

    fn start_tasks(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|t| !t.is_finished());
        if !tasks.is_empty() {
            return;
        }

        let session = self.session.load(Ordering::SeqCst);
        let events = self.transport.subscribe();
        let weak = Arc::downgrade(self);

        tasks.push(tokio::spawn(Self::pump(weak.clone(), events, session)));
        tasks.push(tokio::spawn(Self::poll_loop(
            weak,
            self.config.poll.interval,
            session,
        )));
        tasks.push(self.supervisor.spawn());
        info!("Stream client started");
    }

    async fn pump(
        client: Weak<Self>,
        mut events: broadcast::Receiver<TransportEvent>,
        session: u64,
    ) {
        loop {
            let received = events.recv().await;
            let Some(this) = client.upgrade() else {
                break;
            };

            match received {
                Ok(event) => this.handle_transport_event(event, session),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Stream client lagged by {} events; refreshing snapshot", skipped);
                    tokio::spawn(async move {
                        if let Err(e) = this.refresh(session).await {
                            debug!("Lag refresh failed: {}", e);
                        }
                    });
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Backfill immediately, then poll at a fixed interval whether or not the
    /// stream is connected.
    async fn poll_loop(client: Weak<Self>, interval: Duration, session: u64) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(this) = client.upgrade() else {
                break;
            };

            match this.refresh(session).await {
                Ok(report) => debug!(
                    "Snapshot poll applied {} roulettes, {} new spins",
                    report.applied, report.new_spins
                ),
                Err(AppError::Cancelled) => break,
                Err(e) => debug!("Snapshot poll failed: {}", e),
            }
        }
    }

    fn lock_apply(&self) -> MutexGuard<'_, ()> {
        self.apply_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.transport.disconnect();
    }
}
