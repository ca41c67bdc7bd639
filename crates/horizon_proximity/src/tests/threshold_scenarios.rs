//! How object query angles propagate to peer servers.

use super::mocks::MockWorld;
use crate::config::ProximityConfig;
use crate::protocol::QueryAction;
use crate::proximity::ProximityState;
use crate::types::{BoundingSphere, EntityId, ServerId, SolidAngle, TimedMotionVector, Vec3};
use std::collections::BTreeSet;

fn marked(state: &ProximityState) -> BTreeSet<ServerId> {
    state.servers_needing_update().copied().collect()
}

fn add_query(state: &mut ProximityState, angle: f64) -> EntityId {
    let id = EntityId::new();
    state.update_object_query(
        id,
        TimedMotionVector::stationary(0, Vec3::zero()),
        BoundingSphere::centered(1.0),
        Some(SolidAngle::new(angle)),
    );
    id
}

#[test]
fn test_lowering_and_raising_the_minimum_angle() {
    let world = MockWorld::new(&[2, 3]);
    let mut state = ProximityState::new(ProximityConfig::default(), &world.context());
    let peers: BTreeSet<_> = [ServerId(2), ServerId(3)].into_iter().collect();
    assert_eq!(state.min_object_query_angle(), SolidAngle::MAX);

    // First query lowers the minimum from MAX: every peer but us is marked.
    let first = add_query(&mut state, 0.01);
    assert_eq!(state.min_object_query_angle(), SolidAngle::new(0.01));
    assert_eq!(marked(&state), peers);

    state.push_server_queries(0);
    assert!(marked(&state).is_empty());
    let sent = world.router.take_containers();
    assert_eq!(sent.len(), 2);
    for (_, container) in &sent {
        let query = container.query.as_ref().unwrap();
        assert_eq!(query.action, QueryAction::AddOrUpdate);
        assert_eq!(query.min_angle, Some(SolidAngle::new(0.01)));
    }

    // A coarser second query leaves the minimum alone.
    add_query(&mut state, 0.05);
    assert_eq!(state.min_object_query_angle(), SolidAngle::new(0.01));
    assert!(marked(&state).is_empty());

    // Removing the finest query raises the minimum; peers are refreshed on
    // the next push.
    state.remove_object_query(first);
    assert_eq!(state.min_object_query_angle(), SolidAngle::new(0.05));
    state.push_server_queries(1);
    let sent = world.router.take_containers();
    assert_eq!(sent.iter().map(|(dest, _)| *dest).collect::<BTreeSet<_>>(), peers);
    assert!(sent
        .iter()
        .all(|(_, c)| c.query.as_ref().unwrap().min_angle == Some(SolidAngle::new(0.05))));
}

#[test]
fn test_raise_never_clears_pending_marks() {
    let world = MockWorld::new(&[2]);
    let mut state = ProximityState::new(ProximityConfig::default(), &world.context());

    let fine = add_query(&mut state, 0.01);
    assert_eq!(marked(&state).len(), 1);
    state.remove_object_query(fine);
    assert_eq!(marked(&state).len(), 1);
}

#[test]
fn test_raise_waits_for_configured_delay() {
    let world = MockWorld::new(&[2]);
    let config = ProximityConfig {
        threshold_raise_delay_ms: 500,
        ..Default::default()
    };
    let mut state = ProximityState::new(config, &world.context());

    let fine = add_query(&mut state, 0.01);
    state.push_server_queries(0);
    world.router.take();

    state.remove_object_query(fine);
    state.push_server_queries(1_000);
    assert!(world.router.take().is_empty());
    state.push_server_queries(1_400);
    assert!(world.router.take().is_empty());
    state.push_server_queries(1_500);
    assert_eq!(world.router.take().len(), 1);
}
