//! Location cache feeding a query index.
//!
//! Two caches exist side by side inside the proximity worker: a
//! [`CacheScope::Local`] cache holding only entities owned by this server
//! (evaluated for peer servers' coarse queries) and a
//! [`CacheScope::Global`] cache that also holds replicas of entities owned
//! elsewhere (evaluated for object queries).
//!
//! The cache is fed by [`LocationChange`] values coming from the
//! authoritative location service. Lookups for an entity that is not
//! tracked return `None`.

use crate::types::{BoundingSphere, EntityId, TimedMotionVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Which entities a cache accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Only entities owned by this server.
    Local,
    /// Owned entities plus replicas of remote ones.
    Global,
}

/// A change reported by the authoritative location service.
///
/// `replica` is true for entities owned by another server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationChange {
    Added {
        id: EntityId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        replica: bool,
    },
    Removed {
        id: EntityId,
        replica: bool,
    },
    LocationUpdated {
        id: EntityId,
        location: TimedMotionVector,
        replica: bool,
    },
    BoundsUpdated {
        id: EntityId,
        bounds: BoundingSphere,
        replica: bool,
    },
}

impl LocationChange {
    pub fn id(&self) -> EntityId {
        match self {
            LocationChange::Added { id, .. }
            | LocationChange::Removed { id, .. }
            | LocationChange::LocationUpdated { id, .. }
            | LocationChange::BoundsUpdated { id, .. } => *id,
        }
    }

    pub fn is_replica(&self) -> bool {
        match self {
            LocationChange::Added { replica, .. }
            | LocationChange::Removed { replica, .. }
            | LocationChange::LocationUpdated { replica, .. }
            | LocationChange::BoundsUpdated { replica, .. } => *replica,
        }
    }
}

/// Callbacks fired after the cache applied a change.
pub trait LocationUpdateListener: Send {
    fn on_location_connected(
        &mut self,
        _id: EntityId,
        _location: &TimedMotionVector,
        _bounds: &BoundingSphere,
    ) {
    }
    fn on_location_disconnected(&mut self, _id: EntityId) {}
    fn on_location_position_updated(
        &mut self,
        _id: EntityId,
        _old: &TimedMotionVector,
        _new: &TimedMotionVector,
    ) {
    }
    fn on_location_bounds_updated(
        &mut self,
        _id: EntityId,
        _old: &BoundingSphere,
        _new: &BoundingSphere,
    ) {
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone)]
pub struct CachedLocation {
    pub location: TimedMotionVector,
    pub bounds: BoundingSphere,
    pub replica: bool,
}

pub struct LocationCache {
    scope: CacheScope,
    entries: HashMap<EntityId, CachedLocation>,
    listeners: Vec<(ListenerId, Box<dyn LocationUpdateListener>)>,
    next_listener: u64,
}

impl LocationCache {
    pub fn new(scope: CacheScope) -> Self {
        Self {
            scope,
            entries: HashMap::new(),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    /// Applies a change. Returns whether the cache accepted it.
    pub fn apply(&mut self, change: &LocationChange) -> bool {
        if self.scope == CacheScope::Local && change.is_replica() {
            return false;
        }

        match change {
            LocationChange::Added { id, location, bounds, replica } => {
                if self.entries.contains_key(id) {
                    trace!("Location cache already tracks {}", id);
                    return false;
                }
                self.entries.insert(
                    *id,
                    CachedLocation {
                        location: *location,
                        bounds: *bounds,
                        replica: *replica,
                    },
                );
                for (_, listener) in self.listeners.iter_mut() {
                    listener.on_location_connected(*id, location, bounds);
                }
                true
            }
            LocationChange::Removed { id, .. } => {
                if self.entries.remove(id).is_none() {
                    return false;
                }
                for (_, listener) in self.listeners.iter_mut() {
                    listener.on_location_disconnected(*id);
                }
                true
            }
            LocationChange::LocationUpdated { id, location, .. } => {
                let Some(entry) = self.entries.get_mut(id) else {
                    return false;
                };
                let old = std::mem::replace(&mut entry.location, *location);
                for (_, listener) in self.listeners.iter_mut() {
                    listener.on_location_position_updated(*id, &old, location);
                }
                true
            }
            LocationChange::BoundsUpdated { id, bounds, .. } => {
                let Some(entry) = self.entries.get_mut(id) else {
                    return false;
                };
                let old = std::mem::replace(&mut entry.bounds, *bounds);
                for (_, listener) in self.listeners.iter_mut() {
                    listener.on_location_bounds_updated(*id, &old, bounds);
                }
                true
            }
        }
    }

    pub fn tracking(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn location(&self, id: EntityId) -> Option<TimedMotionVector> {
        self.entries.get(&id).map(|entry| entry.location)
    }

    pub fn bounds(&self, id: EntityId) -> Option<BoundingSphere> {
        self.entries.get(&id).map(|entry| entry.bounds)
    }

    pub fn get(&self, id: EntityId) -> Option<&CachedLocation> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &CachedLocation)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Largest extent of any cached entity, measured from its location.
    pub fn max_extent(&self) -> f64 {
        self.entries
            .values()
            .map(|entry| entry.bounds.center.length() + entry.bounds.radius)
            .fold(0.0, f64::max)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_listener(&mut self, listener: Box<dyn LocationUpdateListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }
}

impl std::fmt::Debug for LocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationCache")
            .field("scope", &self.scope)
            .field("entries", &self.entries.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;
    use std::sync::{Arc, Mutex};

    struct RecordingListener {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl LocationUpdateListener for RecordingListener {
        fn on_location_connected(
            &mut self,
            id: EntityId,
            _: &TimedMotionVector,
            _: &BoundingSphere,
        ) {
            self.events.lock().unwrap().push(format!("connected {}", id));
        }

        fn on_location_disconnected(&mut self, id: EntityId) {
            self.events.lock().unwrap().push(format!("disconnected {}", id));
        }

        fn on_location_position_updated(
            &mut self,
            id: EntityId,
            _: &TimedMotionVector,
            _: &TimedMotionVector,
        ) {
            self.events.lock().unwrap().push(format!("moved {}", id));
        }
    }

    fn added(id: EntityId, replica: bool) -> LocationChange {
        LocationChange::Added {
            id,
            location: TimedMotionVector::stationary(0, Vec3::new(1.0, 0.0, 0.0)),
            bounds: BoundingSphere::centered(1.0),
            replica,
        }
    }

    #[test]
    fn test_local_scope_ignores_replicas() {
        let mut local = LocationCache::new(CacheScope::Local);
        let mut global = LocationCache::new(CacheScope::Global);
        let owned = EntityId::new();
        let remote = EntityId::new();

        for change in [added(owned, false), added(remote, true)] {
            local.apply(&change);
            global.apply(&change);
        }

        assert!(local.tracking(owned));
        assert!(!local.tracking(remote));
        assert_eq!(global.len(), 2);
    }

    #[test]
    fn test_untracked_lookups_are_none() {
        let mut cache = LocationCache::new(CacheScope::Global);
        let id = EntityId::new();
        assert!(cache.location(id).is_none());

        cache.apply(&added(id, false));
        cache.apply(&LocationChange::Removed { id, replica: false });
        assert!(!cache.tracking(id));
        assert!(cache.bounds(id).is_none());
        assert!(!cache.apply(&LocationChange::LocationUpdated {
            id,
            location: TimedMotionVector::default(),
            replica: false,
        }));
    }

    #[test]
    fn test_listeners_receive_changes_until_removed() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut cache = LocationCache::new(CacheScope::Global);
        let listener = cache.add_listener(Box::new(RecordingListener { events: events.clone() }));
        let id = EntityId::new();

        cache.apply(&added(id, false));
        cache.apply(&LocationChange::LocationUpdated {
            id,
            location: TimedMotionVector::stationary(5, Vec3::zero()),
            replica: false,
        });
        assert!(cache.remove_listener(listener));
        cache.apply(&LocationChange::Removed { id, replica: false });

        let events = events.lock().unwrap();
        assert_eq!(*events, vec![format!("connected {}", id), format!("moved {}", id)]);
    }

    #[test]
    fn test_max_extent_includes_center_offset() {
        let mut cache = LocationCache::new(CacheScope::Global);
        cache.apply(&LocationChange::Added {
            id: EntityId::new(),
            location: TimedMotionVector::default(),
            bounds: BoundingSphere::new(Vec3::new(3.0, 4.0, 0.0), 2.0),
            replica: false,
        });
        assert_eq!(cache.max_extent(), 7.0);
    }
}
