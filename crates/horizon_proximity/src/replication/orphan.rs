//! Holding area for location updates that arrive before (or after) the
//! object they describe is present in a replicated tree.
//!
//! Updates and structural changes travel on separate streams, so an update
//! for an object can overtake its addition, or trail its temporary removal.
//! Such updates are kept for a bounded time and replayed, oldest first, when
//! the object is added again.

use super::cache::ReplicatedObjectCache;
use super::update::LocUpdate;
use crate::types::EntityId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct OrphanUpdateBuffer {
    timeout: Duration,
    updates: HashMap<EntityId, Vec<(Instant, LocUpdate)>>,
}

impl OrphanUpdateBuffer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            updates: HashMap::new(),
        }
    }

    pub fn add_orphan_update(&mut self, update: LocUpdate, now: Instant) {
        self.updates.entry(update.object).or_default().push((now, update));
    }

    /// Snapshots what `cache` holds for `id` so it survives the object's
    /// removal. Returns `false` if the cache has no record for it.
    pub fn add_update_from_existing(
        &mut self,
        cache: &ReplicatedObjectCache,
        id: EntityId,
        now: Instant,
    ) -> bool {
        match LocUpdate::from_cache(cache, id) {
            Some(update) => {
                self.add_orphan_update(update, now);
                true
            }
            None => false,
        }
    }

    /// Removes and returns every update held for `id`, in arrival order.
    pub fn take_orphan_updates(&mut self, id: EntityId) -> Vec<LocUpdate> {
        self.updates
            .remove(&id)
            .map(|entries| entries.into_iter().map(|(_, update)| update).collect())
            .unwrap_or_default()
    }

    /// Drops updates older than the timeout. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let mut dropped = 0;
        self.updates.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(received, _)| now.saturating_duration_since(*received) < timeout);
            dropped += before - entries.len();
            !entries.is_empty()
        });
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Number of objects with held updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }
}
