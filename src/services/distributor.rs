//! Observer registry fanning client events out to subscribers.
//!
//! Safe against subscribers being added or removed while a broadcast is in
//! progress: each publish works on a snapshot of the registry, and a removed
//! subscriber's `active` flag is checked right before every delivery.

use crate::types::{Channel, ClientEvent, EntityFilter};
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error};
use uuid::Uuid;

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Subscriber {
    id: Uuid,
    seq: u64,
    label: String,
    channel: Channel,
    filter: Option<EntityFilter>,
    callback: Callback,
    active: AtomicBool,
    /// Held while a callback runs, so a subscriber sees its events one at a time.
    delivery: Mutex<()>,
}

impl Subscriber {
    /// Shape `event` for this subscriber, or `None` if it should not see it.
    fn prepare(&self, event: &ClientEvent) -> Option<ClientEvent> {
        if event.channel() != self.channel {
            return None;
        }
        let Some(filter) = self.filter.as_ref().filter(|f| !f.is_empty()) else {
            return Some(event.clone());
        };

        match event {
            ClientEvent::Update(entities) => {
                let visible = filter.apply(entities);
                (!visible.is_empty()).then_some(ClientEvent::Update(visible))
            }
            ClientEvent::NewSpins {
                entity_id,
                display_name,
                ..
            } => filter
                .matches_identity(entity_id, display_name)
                .then(|| event.clone()),
            ClientEvent::AccessRequired { entities } if !entities.is_empty() => {
                let visible: Vec<String> = entities
                    .iter()
                    .filter(|key| filter.matches_identity(key, key))
                    .cloned()
                    .collect();
                (!visible.is_empty()).then_some(ClientEvent::AccessRequired { entities: visible })
            }
            _ => Some(event.clone()),
        }
    }

    fn deliver(&self, event: &ClientEvent) {
        let _guard = self.delivery.lock().unwrap_or_else(|e| e.into_inner());
        self.deliver_locked(event);
    }

    fn deliver_locked(&self, event: &ClientEvent) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let callback = &self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!(
                "Subscriber '{}' panicked handling a {} event",
                self.label,
                event.channel()
            );
        }
    }
}

/// Fan-out registry of event subscribers.
pub struct EventDistributor {
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    next_seq: AtomicU64,
}

impl EventDistributor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Register a callback on `channel`.
    ///
    /// `initial` is evaluated after registration and its event, if any, is
    /// delivered before any event published concurrently.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        label: impl Into<String>,
        channel: Channel,
        filter: Option<EntityFilter>,
        callback: Callback,
        initial: F,
    ) -> Subscription
    where
        F: FnOnce() -> Option<ClientEvent>,
    {
        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            label: label.into(),
            channel,
            filter,
            callback,
            active: AtomicBool::new(true),
            delivery: Mutex::new(()),
        });

        {
            let _guard = subscriber.delivery.lock().unwrap_or_else(|e| e.into_inner());
            self.subscribers.insert(subscriber.id, subscriber.clone());
            debug!(
                "Subscriber '{}' registered on {} ({} total)",
                subscriber.label,
                channel,
                self.subscribers.len()
            );

            if let Some(event) = initial().and_then(|e| subscriber.prepare(&e)) {
                subscriber.deliver_locked(&event);
            }
        }

        Subscription {
            subscriber,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to every matching subscriber, in subscription order.
    pub fn publish(&self, event: &ClientEvent) {
        let mut targets: Vec<Arc<Subscriber>> = self
            .subscribers
            .iter()
            .filter(|s| s.channel == event.channel())
            .map(|s| s.value().clone())
            .collect();
        targets.sort_by_key(|s| s.seq);

        for subscriber in targets {
            if let Some(prepared) = subscriber.prepare(event) {
                subscriber.deliver(&prepared);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn remove(&self, id: &Uuid) {
        self.subscribers.remove(id);
    }
}

/// Handle to a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    registry: Weak<EventDistributor>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.subscriber.id
    }

    pub fn channel(&self) -> Channel {
        self.subscriber.channel
    }

    /// Stop delivery. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.subscriber.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.subscriber.id);
        }
        debug!("Subscriber '{}' removed", self.subscriber.label);
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.subscriber.id)
            .field("label", &self.subscriber.label)
            .field("channel", &self.subscriber.channel)
            .field("active", &self.is_active())
            .finish()
    }
}
