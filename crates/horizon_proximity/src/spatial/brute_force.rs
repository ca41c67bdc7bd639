//! Query index that tests every query against every cached entity.

use super::location_cache::LocationCache;
use super::query::{QueryBook, QueryEvent, QueryHandle, QueryIndex, QueryParams};
use crate::types::{BoundingSphere, EntityId, SolidAngle, TimedMotionVector};
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct BruteForceQueryIndex {
    queries: QueryBook,
}

impl BruteForceQueryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryIndex for BruteForceQueryIndex {
    fn register_query(&mut self, params: QueryParams) -> QueryHandle {
        self.queries.register(params)
    }

    fn set_position(&mut self, handle: QueryHandle, location: TimedMotionVector) -> bool {
        self.queries.params_mut(handle).map(|params| params.location = location).is_some()
    }

    fn set_bounds(&mut self, handle: QueryHandle, bounds: BoundingSphere) -> bool {
        self.queries.params_mut(handle).map(|params| params.bounds = bounds).is_some()
    }

    fn set_angle(&mut self, handle: QueryHandle, angle: SolidAngle) -> bool {
        self.queries.params_mut(handle).map(|params| params.angle = angle).is_some()
    }

    fn remove_query(&mut self, handle: QueryHandle) -> bool {
        self.queries.remove(handle)
    }

    fn forget(&mut self, handle: QueryHandle, subject: EntityId) -> bool {
        self.queries.forget(handle, subject)
    }

    fn tick(&mut self, now: u64, cache: &LocationCache) {
        for record in self.queries.records_mut() {
            let matched: BTreeSet<_> = cache
                .iter()
                .filter(|(_, entry)| record.params.matches(now, &entry.location, &entry.bounds))
                .map(|(id, _)| id)
                .collect();
            record.reconcile(matched);
        }
    }

    fn pop_events(&mut self, handle: QueryHandle) -> Vec<QueryEvent> {
        self.queries.pop_events(handle)
    }

    fn query_count(&self) -> usize {
        self.queries.len()
    }

    fn name(&self) -> &'static str {
        "brute-force"
    }
}
