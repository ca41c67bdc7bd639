//! Query index contract and the bookkeeping shared by its implementations.
//!
//! A [`QueryIndex`] holds many standing queries and evaluates them against a
//! [`LocationCache`] on each [`tick`](QueryIndex::tick). Result changes are
//! buffered per query as [`QueryEvent`]s and drained with
//! [`pop_events`](QueryIndex::pop_events).
//!
//! Events are produced by diffing each query's previous result set against
//! the new one, so per query:
//! - an `Added` is only produced for a subject not currently in the result set
//! - a `Removed` is only produced for a subject currently in the result set
//! - events for the same subject keep their production order

use super::location_cache::LocationCache;
use crate::types::{BoundingSphere, EntityId, SolidAngle, TimedMotionVector};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Handle to a query registered with a [`QueryIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEventKind {
    Added,
    Removed,
}

/// A change in one query's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryEvent {
    pub kind: QueryEventKind,
    pub subject: EntityId,
}

impl QueryEvent {
    pub fn added(subject: EntityId) -> Self {
        Self {
            kind: QueryEventKind::Added,
            subject,
        }
    }

    pub fn removed(subject: EntityId) -> Self {
        Self {
            kind: QueryEventKind::Removed,
            subject,
        }
    }
}

/// Geometry and threshold of a standing query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryParams {
    pub location: TimedMotionVector,
    pub bounds: BoundingSphere,
    pub angle: SolidAngle,
}

impl QueryParams {
    pub fn new(location: TimedMotionVector, bounds: BoundingSphere, angle: SolidAngle) -> Self {
        Self { location, bounds, angle }
    }

    /// World-space sphere of the query at time `now`.
    pub fn sphere_at(&self, now: u64) -> BoundingSphere {
        BoundingSphere::new(self.location.extrapolate(now) + self.bounds.center, self.bounds.radius)
    }

    /// Whether an entity satisfies this query at time `now`.
    ///
    /// The solid angle the entity subtends is measured from the surface of
    /// the query's sphere, so anything overlapping the sphere always matches.
    pub fn matches(&self, now: u64, location: &TimedMotionVector, bounds: &BoundingSphere) -> bool {
        let query = self.sphere_at(now);
        let center = location.extrapolate(now) + bounds.center;
        let distance = (query.center.distance(center) - query.radius).max(0.0);
        SolidAngle::subtended(distance, bounds.radius) >= self.angle
    }
}

/// Spatial index evaluating many standing queries against a location cache.
///
/// Implementations are interchangeable; callers only use this trait.
pub trait QueryIndex: Send {
    fn register_query(&mut self, params: QueryParams) -> QueryHandle;

    fn set_position(&mut self, handle: QueryHandle, location: TimedMotionVector) -> bool;
    fn set_bounds(&mut self, handle: QueryHandle, bounds: BoundingSphere) -> bool;
    fn set_angle(&mut self, handle: QueryHandle, angle: SolidAngle) -> bool;

    /// Drops the query and any events still buffered for it.
    fn remove_query(&mut self, handle: QueryHandle) -> bool;

    /// Drops `subject` from the query's result set without queueing an
    /// event, so the next tick reports it as added again if it still
    /// matches. Returns whether the subject was a result.
    fn forget(&mut self, handle: QueryHandle, subject: EntityId) -> bool;

    /// Re-evaluates every query at time `now`.
    fn tick(&mut self, now: u64, cache: &LocationCache);

    /// Drains buffered events for one query, oldest first.
    fn pop_events(&mut self, handle: QueryHandle) -> Vec<QueryEvent>;

    fn query_count(&self) -> usize;

    fn name(&self) -> &'static str;
}

#[derive(Debug)]
pub(crate) struct QueryRecord {
    pub params: QueryParams,
    results: BTreeSet<EntityId>,
    events: VecDeque<QueryEvent>,
}

impl QueryRecord {
    /// Replaces the result set, queueing removals then additions.
    pub fn reconcile(&mut self, matched: BTreeSet<EntityId>) {
        for gone in self.results.difference(&matched) {
            self.events.push_back(QueryEvent::removed(*gone));
        }
        for new in matched.difference(&self.results) {
            self.events.push_back(QueryEvent::added(*new));
        }
        self.results = matched;
    }

    pub fn forget(&mut self, subject: EntityId) -> bool {
        self.results.remove(&subject)
    }
}

/// Query storage shared by the index implementations.
#[derive(Debug, Default)]
pub(crate) struct QueryBook {
    records: HashMap<QueryHandle, QueryRecord>,
    next_handle: u64,
}

impl QueryBook {
    pub fn register(&mut self, params: QueryParams) -> QueryHandle {
        let handle = QueryHandle(self.next_handle);
        self.next_handle += 1;
        self.records.insert(
            handle,
            QueryRecord {
                params,
                results: BTreeSet::new(),
                events: VecDeque::new(),
            },
        );
        handle
    }

    pub fn params_mut(&mut self, handle: QueryHandle) -> Option<&mut QueryParams> {
        self.records.get_mut(&handle).map(|record| &mut record.params)
    }

    pub fn remove(&mut self, handle: QueryHandle) -> bool {
        self.records.remove(&handle).is_some()
    }

    pub fn forget(&mut self, handle: QueryHandle, subject: EntityId) -> bool {
        self.records
            .get_mut(&handle)
            .is_some_and(|record| record.forget(subject))
    }

    pub fn pop_events(&mut self, handle: QueryHandle) -> Vec<QueryEvent> {
        self.records
            .get_mut(&handle)
            .map(|record| record.events.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut QueryRecord> {
        self.records.values_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
