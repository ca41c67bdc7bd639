//! Replicated trees under interleaved structural and location updates.

use super::mocks::{MockOwner, OwnerEvent};
use crate::config::ReplicationConfig;
use crate::context::ClockOffset;
use crate::protocol::{
    DynamicClassification, IndexProperties, LocationUpdate, ProximityUpdate, ReplicaAddition,
    ReplicaRemoval,
};
use crate::replication::{ReplicatedObjectCache, ReplicatedObjectListener, ReplicationState};
use crate::types::{AggregateBounds, EntityId, ServerId, TimedMotionVector, TreeId, Vec3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TREE: TreeId = TreeId(11);

fn replication(owner: &Arc<MockOwner>) -> ReplicationState {
    ReplicationState::new(ReplicationConfig::default(), owner.clone(), Arc::new(ClockOffset(0)))
}

fn addition(object: EntityId, x: f64, seqno: u64) -> ReplicaAddition {
    ReplicaAddition {
        object,
        seqno,
        aggregate: false,
        parent: None,
        location: TimedMotionVector::stationary(0, Vec3::new(x, 0.0, 0.0)),
        orientation: Default::default(),
        bounds: AggregateBounds::object(1.0),
        mesh: "crate.glb".to_string(),
        physics: String::new(),
    }
}

fn structure(additions: Vec<ReplicaAddition>, removals: Vec<ReplicaRemoval>) -> ProximityUpdate {
    ProximityUpdate {
        index: TREE,
        properties: Some(IndexProperties {
            origin: Some(ServerId(4)),
            dynamic_classification: Some(DynamicClassification::Dynamic),
        }),
        additions,
        removals,
    }
}

fn moved(object: EntityId, x: f64, seqno: u64) -> LocationUpdate {
    LocationUpdate {
        object,
        index_ids: vec![TREE],
        seqno,
        location: Some(TimedMotionVector::stationary(0, Vec3::new(x, 0.0, 0.0))),
        ..Default::default()
    }
}

#[derive(Default)]
struct LocationCounter {
    updates: AtomicUsize,
}

impl ReplicatedObjectListener for LocationCounter {
    fn on_location_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_update_trailing_temporary_removal_is_replayed() {
    let owner = MockOwner::new();
    let mut state = replication(&owner);
    let now = Instant::now();
    let anchor = EntityId::new();
    let x = EntityId::new();

    let both = vec![addition(anchor, 0.0, 1), addition(x, 1.0, 1)];
    state.handle_proximity_update(&structure(both, vec![]), now);
    state.handle_proximity_update(
        &structure(vec![], vec![ReplicaRemoval { object: x, temporary: None }]),
        now,
    );
    // Same tick: an update sent before the removal still arrives.
    state.handle_location_update(&moved(x, 7.0, 2), now);

    let cache = state.cache(TREE).unwrap();
    assert!(!cache.exists(x));
    assert_eq!(state.stats().orphaned_objects, 1);

    // X reappears with an older snapshot: the buffered update wins.
    state.handle_proximity_update(&structure(vec![addition(x, 1.0, 1)], vec![]), now);
    assert!(cache.exists(x));
    assert_eq!(cache.location(x).unwrap().position.x, 7.0);
    assert_eq!(cache.properties(x).unwrap().location.seqno, 2);
    assert_eq!(state.stats().orphaned_objects, 0);
}

#[tokio::test]
async fn test_removal_snapshot_survives_tree_teardown() {
    let owner = MockOwner::new();
    let mut state = replication(&owner);
    let now = Instant::now();
    let x = EntityId::new();

    state.handle_proximity_update(&structure(vec![addition(x, 1.0, 1)], vec![]), now);
    state.handle_proximity_update(
        &structure(vec![], vec![ReplicaRemoval { object: x, temporary: Some(true) }]),
        now,
    );
    state.handle_location_update(&moved(x, 3.0, 5), now);
    assert_eq!(
        owner.events(),
        vec![OwnerEvent::Created(TREE, Some(ServerId(4)), true), OwnerEvent::Destroyed(TREE)]
    );

    state.handle_proximity_update(&structure(vec![addition(x, 1.0, 1)], vec![]), now);
    let cache = state.cache(TREE).unwrap();
    assert_eq!(cache.location(x).unwrap().position.x, 3.0);
    assert_eq!(owner.events().len(), 3);
}

#[tokio::test]
async fn test_orphan_updates_apply_once_in_arrival_order() {
    let owner = MockOwner::new();
    let mut state = replication(&owner);
    let now = Instant::now();
    let anchor = EntityId::new();
    let subject = EntityId::new();

    state.handle_proximity_update(&structure(vec![addition(anchor, 0.0, 1)], vec![]), now);
    let cache = state.cache(TREE).unwrap();
    let counter = Arc::new(LocationCounter::default());
    cache.add_listener(counter.clone());

    for seqno in 1..=5 {
        state.handle_location_update(&moved(subject, seqno as f64 * 10.0, seqno), now);
    }
    assert!(!cache.contains(subject));

    state.handle_proximity_update(&structure(vec![addition(subject, 0.0, 0)], vec![]), now);
    cache.flush().await;
    assert_eq!(counter.updates.load(Ordering::SeqCst), 5);
    assert_eq!(cache.location(subject).unwrap().position.x, 50.0);

    // Nothing is left to replay a second time.
    state.handle_proximity_update(&structure(vec![addition(subject, 0.0, 0)], vec![]), now);
    cache.flush().await;
    assert_eq!(counter.updates.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_unclaimed_orphans_are_evicted_by_the_sweep() {
    let owner = MockOwner::new();
    let mut state = replication(&owner);
    let start = Instant::now();

    state.handle_location_update(&moved(EntityId::new(), 1.0, 1), start);
    assert_eq!(state.cleanup_orphans(), 0);
    state.expire_orphans(start + Duration::from_secs(30));
    assert_eq!(state.cleanup_orphans(), 1);
    assert_eq!(state.stats().pending_orphan_trees, 0);
    assert!(owner.events().is_empty());
}

#[tokio::test]
async fn test_record_erased_only_when_untracked_and_removed() {
    let cache = ReplicatedObjectCache::new(TREE);
    let id = EntityId::new();
    let props = || Default::default();

    // Interleave two trackers with a removal and a re-add.
    cache.object_added(id, false, None, props());
    cache.flush().await;
    let first = cache.start_tracking(id).unwrap();
    let second = cache.start_tracking(id).unwrap();
    cache.object_removed(id, true);
    cache.flush().await;
    cache.stop_tracking(first);
    assert!(cache.contains(id));

    cache.object_added(id, false, None, props());
    cache.flush().await;
    cache.stop_tracking(second);
    assert!(cache.contains(id), "existing records stay regardless of tracking");

    let third = cache.start_tracking(id).unwrap();
    cache.object_removed(id, false);
    cache.flush().await;
    assert!(cache.contains(id));
    cache.stop_tracking(third);
    assert!(!cache.contains(id));
    assert!(cache.is_fully_empty());
}
