use crate::types::{normalize_name, RouletteEntity, SpinResult};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use tracing::debug;

/// Result of applying one normalized entity to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub entity_id: String,
    pub display_name: String,
    /// The entity was seen for the first time.
    pub created: bool,
    /// Spins not previously cached, newest first.
    pub new_spins: Vec<SpinResult>,
    /// Anything about the cached entity changed (spins or metadata).
    pub changed: bool,
}

/// Deduplicating, bounded cache of roulette entities.
///
/// Entities are keyed by id and also resolvable by normalized display name.
/// All mutation goes through [`apply`](Self::apply), which holds a writer lock
/// so two batches never interleave.
pub struct EntityCache {
    entities: DashMap<String, RouletteEntity>,
    /// Normalized display name -> entity id.
    names: DashMap<String, String>,
    cap: usize,
    writer: Mutex<()>,
}

impl EntityCache {
    pub fn new(cap: usize) -> Self {
        Self {
            entities: DashMap::new(),
            names: DashMap::new(),
            cap: cap.max(1),
            writer: Mutex::new(()),
        }
    }

    /// Merge `incoming` into the cache.
    ///
    /// Returns `None` when nothing was stored: an unknown entity without any
    /// history is not created.
    pub fn apply(&self, incoming: RouletteEntity) -> Option<ApplyOutcome> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.apply_locked(incoming)
    }

    /// Apply several entities under one writer lock, in order.
    pub fn apply_batch(&self, batch: Vec<RouletteEntity>) -> Vec<ApplyOutcome> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        batch
            .into_iter()
            .filter_map(|entity| self.apply_locked(entity))
            .collect()
    }

    fn apply_locked(&self, mut incoming: RouletteEntity) -> Option<ApplyOutcome> {
        let name_key = incoming.name_key();

        // A payload identified only by name may refer to an entity already known by id.
        let id = if self.entities.contains_key(&incoming.id) {
            incoming.id.clone()
        } else {
            self.names
                .get(&name_key)
                .map(|id| id.clone())
                .unwrap_or_else(|| incoming.id.clone())
        };
        incoming.id = id.clone();
        for spin in incoming.history.iter_mut() {
            spin.source_entity_id = id.clone();
        }

        let Some(mut cached) = self.entities.get_mut(&id) else {
            if incoming.history.is_empty() {
                debug!("Not caching '{}' until it reports a spin", id);
                return None;
            }

            incoming.history.truncate(self.cap);
            stamp_untimed(&mut incoming.history, None);
            let outcome = ApplyOutcome {
                entity_id: id.clone(),
                display_name: incoming.display_name.clone(),
                created: true,
                new_spins: incoming.history.clone(),
                changed: true,
            };
            if !name_key.is_empty() {
                self.names.insert(name_key, id.clone());
            }
            self.entities.insert(id, incoming);
            return Some(outcome);
        };

        let mut new_spins = find_new_spins(&cached.history, &incoming.history);
        stamp_untimed(
            &mut new_spins,
            cached.history.first().and_then(|head| head.timestamp),
        );
        let mut changed = !new_spins.is_empty();

        if !new_spins.is_empty() {
            let mut history = Vec::with_capacity(self.cap);
            history.extend(new_spins.iter().cloned());
            history.extend(cached.history.drain(..));
            history.truncate(self.cap);
            cached.history = history;
        }

        if cached.is_active != incoming.is_active {
            cached.is_active = incoming.is_active;
            changed = true;
        }
        if !incoming.display_name.is_empty() && cached.display_name != incoming.display_name {
            let old_key = cached.name_key();
            cached.display_name = incoming.display_name.clone();
            self.names.remove(&old_key);
            if !name_key.is_empty() {
                self.names.insert(name_key, id.clone());
            }
            changed = true;
        }

        Some(ApplyOutcome {
            entity_id: id,
            display_name: cached.display_name.clone(),
            created: false,
            new_spins,
            changed,
        })
    }

    /// Every cached entity, ordered by display name.
    pub fn all(&self) -> Vec<RouletteEntity> {
        let mut entities: Vec<RouletteEntity> =
            self.entities.iter().map(|e| e.value().clone()).collect();
        entities.sort_by(|a, b| {
            a.name_key()
                .cmp(&b.name_key())
                .then_with(|| a.id.cmp(&b.id))
        });
        entities
    }

    /// Look up an entity by id or by display name.
    pub fn get(&self, key: &str) -> Option<RouletteEntity> {
        if let Some(entity) = self.entities.get(key) {
            return Some(entity.clone());
        }
        let id = self.names.get(&normalize_name(key))?.clone();
        self.entities.get(&id).map(|e| e.clone())
    }

    pub fn history(&self, key: &str) -> Option<Vec<SpinResult>> {
        self.get(key).map(|e| e.history)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Spins in `incoming` (newest first) that are newer than everything in `cached`.
///
/// Timed batches walk from the newest spin and stop at the first one that
/// equals the cached head, is already cached, or is not newer than the head.
/// Bare numbers cannot tell a repeat from a known spin, so an untimed batch is
/// aligned against the cached head instead: everything in front of the run
/// that matches the newest cached numbers is new.
pub fn find_new_spins(cached: &[SpinResult], incoming: &[SpinResult]) -> Vec<SpinResult> {
    let Some(head) = cached.first() else {
        return incoming.to_vec();
    };

    if incoming.iter().any(|s| s.timestamp.is_none()) {
        return untimed_new_spins(cached, incoming);
    }

    let mut fresh = Vec::new();
    for spin in incoming {
        if spin.same_spin(head) || cached.iter().any(|c| c.same_spin(spin)) {
            break;
        }
        if let (Some(ts), Some(head_ts)) = (spin.timestamp, head.timestamp) {
            if ts <= head_ts {
                break;
            }
        }
        fresh.push(spin.clone());
    }
    fresh
}

fn untimed_new_spins(cached: &[SpinResult], incoming: &[SpinResult]) -> Vec<SpinResult> {
    for skip in 0..incoming.len() {
        let rest = &incoming[skip..];
        let overlap = rest.len().min(cached.len());
        let aligned = rest[..overlap]
            .iter()
            .zip(&cached[..overlap])
            .all(|(a, b)| a.number == b.number);
        if aligned {
            return incoming[..skip].to_vec();
        }
    }

    // No overlap with the cached head: keep everything up to the first known number.
    incoming
        .iter()
        .take_while(|spin| !cached.iter().any(|c| c.number == spin.number))
        .cloned()
        .collect()
}

/// Give spins without a server timestamp strictly decreasing observation
/// times, all newer than `after`.
fn stamp_untimed(spins: &mut [SpinResult], after: Option<DateTime<Utc>>) {
    let step = Duration::milliseconds(1);
    let mut next = Utc::now();
    if let Some(after) = after {
        let floor = after + step * spins.len() as i32;
        if floor > next {
            next = floor;
        }
    }

    for spin in spins.iter_mut().filter(|s| s.timestamp.is_none()) {
        spin.timestamp = Some(next);
        next = next - step;
    }
}
