//! R*-tree backed query index.
//!
//! Entity centers are bulk-loaded into an `rstar` tree on every tick. Each
//! query then only examines entities within the largest distance at which
//! an entity of the cache's largest extent could still satisfy its
//! threshold, and applies the exact solid-angle test to those candidates.

use super::location_cache::LocationCache;
use super::query::{QueryBook, QueryEvent, QueryHandle, QueryIndex, QueryParams};
use crate::types::{BoundingSphere, EntityId, SolidAngle, TimedMotionVector};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::BTreeSet;

/// Entry stored inside the R-tree.
#[derive(Debug, Clone)]
struct SpatialEntry {
    id: EntityId,
    point: [f64; 3],
    location: TimedMotionVector,
    bounds: BoundingSphere,
}

impl PartialEq for SpatialEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for SpatialEntry {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        let dz = self.point[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

#[derive(Debug, Default)]
pub struct RTreeQueryIndex {
    queries: QueryBook,
}

impl RTreeQueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_tree(now: u64, cache: &LocationCache) -> RTree<SpatialEntry> {
        let entries = cache
            .iter()
            .map(|(id, entry)| SpatialEntry {
                id,
                point: (entry.location.extrapolate(now) + entry.bounds.center).to_array(),
                location: entry.location,
                bounds: entry.bounds,
            })
            .collect();
        RTree::bulk_load(entries)
    }
}

impl QueryIndex for RTreeQueryIndex {
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
        if self.queries.len() == 0 {
            return;
        }

        let tree = Self::build_tree(now, cache);
        let largest = cache.max_extent();

        for record in self.queries.records_mut() {
            let sphere = record.params.sphere_at(now);
            let reach = sphere.radius + record.params.angle.max_distance(largest);

            let candidates: Box<dyn Iterator<Item = &SpatialEntry>> = if reach.is_finite() {
                Box::new(tree.locate_within_distance(sphere.center.to_array(), reach * reach))
            } else {
                Box::new(tree.iter())
            };

            let matched: BTreeSet<_> = candidates
                .filter(|entry| record.params.matches(now, &entry.location, &entry.bounds))
                .map(|entry| entry.id)
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
        "rtree"
    }
}
