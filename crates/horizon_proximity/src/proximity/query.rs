//! Per-subscriber standing queries.

use crate::spatial::{QueryEvent, QueryEventKind, QueryHandle, QueryIndex, QueryParams};
use crate::types::{BoundingSphere, EntityId, SolidAngle, TimedMotionVector};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A standing query owned by one subscriber.
///
/// `present` mirrors what the subscriber has been told: subjects whose
/// addition was delivered and not yet followed by a removal.
#[derive(Debug)]
pub struct Query<K> {
    pub subscriber: K,
    pub handle: QueryHandle,
    pub location: TimedMotionVector,
    pub bounds: BoundingSphere,
    pub angle: SolidAngle,
    present: HashSet<EntityId>,
}

impl<K> Query<K> {
    /// Records a delivered event. Returns false if the event contradicts
    /// what the subscriber already knows and must not be sent.
    pub fn accept(&mut self, event: &QueryEvent) -> bool {
        match event.kind {
            QueryEventKind::Added => self.present.insert(event.subject),
            QueryEventKind::Removed => self.present.remove(&event.subject),
        }
    }

    pub fn is_present(&self, subject: EntityId) -> bool {
        self.present.contains(&subject)
    }

    pub fn present_count(&self) -> usize {
        self.present.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryUpdate {
    Registered,
    Updated,
    /// No query exists and no angle was supplied.
    Ignored,
}

/// At most one query per subscriber, all registered with one index.
#[derive(Debug)]
pub struct QuerySet<K> {
    queries: HashMap<K, Query<K>>,
}

impl<K: Copy + Eq + Hash> QuerySet<K> {
    pub fn new() -> Self {
        Self {
            queries: HashMap::new(),
        }
    }

    /// Mutates the subscriber's query in place, or registers one when an
    /// angle is supplied. `None` refreshes geometry only.
    pub fn update(
        &mut self,
        index: &mut dyn QueryIndex,
        subscriber: K,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: Option<SolidAngle>,
    ) -> QueryUpdate {
        if let Some(query) = self.queries.get_mut(&subscriber) {
            query.location = location;
            query.bounds = bounds;
            index.set_position(query.handle, location);
            index.set_bounds(query.handle, bounds);
            if let Some(angle) = angle {
                query.angle = angle;
                index.set_angle(query.handle, angle);
            }
            return QueryUpdate::Updated;
        }

        let Some(angle) = angle else {
            return QueryUpdate::Ignored;
        };
        let handle = index.register_query(QueryParams::new(location, bounds, angle));
        self.queries.insert(
            subscriber,
            Query {
                subscriber,
                handle,
                location,
                bounds,
                angle,
                present: HashSet::new(),
            },
        );
        QueryUpdate::Registered
    }

    /// Removes the subscriber's query and unregisters it from the index.
    pub fn remove(&mut self, index: &mut dyn QueryIndex, subscriber: K) -> Option<Query<K>> {
        let query = self.queries.remove(&subscriber)?;
        index.remove_query(query.handle);
        Some(query)
    }

    pub fn get(&self, subscriber: K) -> Option<&Query<K>> {
        self.queries.get(&subscriber)
    }

    pub fn contains(&self, subscriber: K) -> bool {
        self.queries.contains_key(&subscriber)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Query<K>> {
        self.queries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl<K: Copy + Eq + Hash> Default for QuerySet<K> {
    fn default() -> Self {
        Self::new()
    }
}
