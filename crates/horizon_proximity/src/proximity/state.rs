//! State owned by the proximity worker loop.
//!
//! [`ProximityState`] is plain synchronous code. The
//! [`ProximityCoordinator`](super::ProximityCoordinator) owns one inside
//! its worker task and drives it from commands and periodic duties; hosts
//! with their own scheduling can drive it directly.
//!
//! Effects on the authoritative location service are never executed here.
//! They accumulate as [`LocationServiceOp`]s and are collected with
//! [`take_location_ops`](ProximityState::take_location_ops).

use super::outbound::OutboundQueue;
use super::query::{Query, QuerySet, QueryUpdate};
use super::threshold::{AngleThreshold, ThresholdChange};
use crate::config::ProximityConfig;
use crate::context::{
    LocationServiceOp, ObjectStreams, ProximityContext, Segmentation, ServerRouter,
};
use crate::error::ProtocolError;
use crate::protocol::{
    self, MigrationData, ObjectMessage, ProxContainer, ProximityAddition, ProximityRemoval,
    ProximityResults, QueryAction, ServerMessage, ServerQueryMessage,
};
use crate::spatial::{
    build_index, CacheScope, LocationCache, LocationChange, LocationUpdateListener, QueryEvent,
    QueryEventKind, QueryIndex,
};
use crate::types::{
    BoundingSphere, EntityId, ServerId, SolidAngle, Subscriber, TimedMotionVector,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProximityStats {
    pub server_queries: usize,
    pub object_queries: usize,
    pub min_object_query_angle: f64,
    pub servers_pending_refresh: usize,
    pub queued_server_results: usize,
    pub queued_object_results: usize,
    pub server_queries_sent: u64,
    pub server_results_sent: u64,
    pub object_results_sent: u64,
    pub skipped_events: u64,
    pub malformed_messages: u64,
}

/// Records local entities whose geometry changed so their object queries
/// can follow them.
struct LocalMotionListener {
    moved: Arc<Mutex<Vec<EntityId>>>,
}

impl LocationUpdateListener for LocalMotionListener {
    fn on_location_position_updated(
        &mut self,
        id: EntityId,
        _old: &TimedMotionVector,
        _new: &TimedMotionVector,
    ) {
        if let Ok(mut moved) = self.moved.lock() {
            moved.push(id);
        }
    }

    fn on_location_bounds_updated(
        &mut self,
        id: EntityId,
        _old: &BoundingSphere,
        _new: &BoundingSphere,
    ) {
        if let Ok(mut moved) = self.moved.lock() {
            moved.push(id);
        }
    }
}

pub struct ProximityState {
    config: ProximityConfig,
    server_id: ServerId,
    server_router: Arc<dyn ServerRouter>,
    object_streams: Arc<dyn ObjectStreams>,
    segmentation: Arc<dyn Segmentation>,

    local_cache: LocationCache,
    global_cache: LocationCache,
    local_moves: Arc<Mutex<Vec<EntityId>>>,

    server_index: Box<dyn QueryIndex>,
    object_index: Box<dyn QueryIndex>,
    server_queries: QuerySet<ServerId>,
    object_queries: QuerySet<EntityId>,

    threshold: AngleThreshold,
    servers_needing_update: BTreeSet<ServerId>,
    raise_pending: bool,
    raise_deadline: Option<u64>,

    server_results: OutboundQueue<ServerMessage>,
    object_results: OutboundQueue<ObjectMessage>,
    location_ops: Vec<LocationServiceOp>,
    stats: ProximityStats,
}

impl ProximityState {
    pub fn new(config: ProximityConfig, context: &ProximityContext) -> Self {
        let local_moves = Arc::new(Mutex::new(Vec::new()));
        let mut local_cache = LocationCache::new(CacheScope::Local);
        local_cache.add_listener(Box::new(LocalMotionListener {
            moved: local_moves.clone(),
        }));

        Self {
            server_index: build_index(config.server_index),
            object_index: build_index(config.object_index),
            config,
            server_id: context.server_id,
            server_router: context.server_router.clone(),
            object_streams: context.object_streams.clone(),
            segmentation: context.segmentation.clone(),
            local_cache,
            global_cache: LocationCache::new(CacheScope::Global),
            local_moves,
            server_queries: QuerySet::new(),
            object_queries: QuerySet::new(),
            threshold: AngleThreshold::new(),
            servers_needing_update: BTreeSet::new(),
            raise_pending: false,
            raise_deadline: None,
            server_results: OutboundQueue::new(),
            object_results: OutboundQueue::new(),
            location_ops: Vec::new(),
            stats: ProximityStats::default(),
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn update_server_query(
        &mut self,
        server: ServerId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: SolidAngle,
    ) {
        let outcome = self
            .server_queries
            .update(self.server_index.as_mut(), server, location, bounds, Some(angle));
        if outcome == QueryUpdate::Registered {
            debug!("📡 Registered server query from {} at {}", server, angle);
        }
    }

    pub fn remove_server_query(&mut self, server: ServerId) {
        if self.server_queries.remove(self.server_index.as_mut(), server).is_some() {
            debug!("📡 Removed server query from {}", server);
            self.location_ops.push(LocationServiceOp::UnsubscribeAll {
                subscriber: Subscriber::Server(server),
            });
        }
    }

    /// Adds or updates an object query. `angle == None` refreshes location
    /// and bounds of an existing query and never creates one.
    pub fn update_object_query(
        &mut self,
        id: EntityId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: Option<SolidAngle>,
    ) {
        let outcome = self
            .object_queries
            .update(self.object_index.as_mut(), id, location, bounds, angle);
        match outcome {
            QueryUpdate::Ignored => {
                trace!("No object query for {}, geometry refresh ignored", id);
                return;
            }
            QueryUpdate::Registered => debug!("🔭 Registered object query for {}", id),
            QueryUpdate::Updated => {}
        }

        if let Some(angle) = angle {
            let change = self.threshold.set(id, angle);
            self.on_threshold_change(change);
        }
    }

    pub fn remove_object_query(&mut self, id: EntityId) -> Option<SolidAngle> {
        let query = self.object_queries.remove(self.object_index.as_mut(), id)?;
        debug!("🔭 Removed object query for {}", id);
        self.location_ops.push(LocationServiceOp::UnsubscribeAll {
            subscriber: Subscriber::Object(id),
        });
        let change = self.threshold.remove(id);
        self.on_threshold_change(change);
        Some(query.angle)
    }

    pub fn has_object_query(&self, id: EntityId) -> bool {
        self.object_queries.contains(id)
    }

    pub fn object_query(&self, id: EntityId) -> Option<&Query<EntityId>> {
        self.object_queries.get(id)
    }

    pub fn min_object_query_angle(&self) -> SolidAngle {
        self.threshold.min()
    }

    /// Peers whose copy of our server query is stale.
    pub fn servers_needing_update(&self) -> impl Iterator<Item = &ServerId> {
        self.servers_needing_update.iter()
    }

    fn on_threshold_change(&mut self, change: ThresholdChange) {
        match change {
            ThresholdChange::Lowered => {
                debug!("🎯 Minimum object query angle lowered to {}", self.threshold.min());
                self.mark_all_servers();
            }
            ThresholdChange::Raised => {
                debug!("🎯 Minimum object query angle raised to {}", self.threshold.min());
                self.raise_pending = true;
            }
            ThresholdChange::Unchanged => {}
        }
    }

    fn mark_all_servers(&mut self) {
        let own = self.server_id;
        self.servers_needing_update
            .extend(self.segmentation.peer_servers().into_iter().filter(|s| *s != own));
    }

    // ------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------

    /// Removes the object's query and returns what the destination server
    /// needs to recreate it.
    pub fn take_migration_data(&mut self, id: EntityId) -> Option<MigrationData> {
        self.remove_object_query(id)
            .map(|min_angle| MigrationData { min_angle })
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Applies a change from the authoritative location service to both caches.
    pub fn apply_location_change(&mut self, change: &LocationChange) {
        self.local_cache.apply(change);
        self.global_cache.apply(change);

        if let LocationChange::Removed { id, replica: false } = change {
            self.remove_object_query(*id);
        }

        let moved = match self.local_moves.lock() {
            Ok(mut moved) => std::mem::take(&mut *moved),
            Err(_) => Vec::new(),
        };
        for id in moved {
            if !self.object_queries.contains(id) {
                continue;
            }
            let geometry = (self.local_cache.location(id), self.local_cache.bounds(id));
            if let (Some(location), Some(bounds)) = geometry {
                self.update_object_query(id, location, bounds, None);
            }
        }
    }

    /// Handles a proximity container sent by a peer server.
    pub fn handle_server_message(
        &mut self,
        source: ServerId,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let container = match ProxContainer::decode(payload) {
            Ok(container) => container,
            Err(e) => {
                self.stats.malformed_messages += 1;
                return Err(e);
            }
        };

        if let Some(query) = container.query {
            self.handle_server_query(source, query)?;
        }

        if let Some(result) = container.result {
            for addition in result.additions {
                self.location_ops.push(LocationServiceOp::AddReplica {
                    t: result.timestamp,
                    id: addition.object,
                    location: addition.location,
                    bounds: addition.bounds,
                });
            }
            for removal in result.removals {
                self.location_ops.push(LocationServiceOp::RemoveReplica {
                    t: result.timestamp,
                    id: removal.object,
                });
            }
        }

        Ok(())
    }

    fn handle_server_query(
        &mut self,
        source: ServerId,
        query: ServerQueryMessage,
    ) -> Result<(), ProtocolError> {
        match query.action {
            QueryAction::AddOrUpdate => {
                let (Some(location), Some(bounds), Some(angle)) =
                    (query.location, query.bounds, query.min_angle)
                else {
                    self.stats.malformed_messages += 1;
                    return Err(ProtocolError::MissingField("location, bounds and min_angle"));
                };
                self.update_server_query(source, location, bounds, angle);
            }
            QueryAction::Remove => self.remove_server_query(source),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Periodic duties
    // ------------------------------------------------------------------

    /// Sends our region and minimum angle to every peer marked for refresh.
    /// Peers whose send is refused stay marked.
    pub fn push_server_queries(&mut self, now: u64) {
        if self.raise_pending {
            let deadline = *self
                .raise_deadline
                .get_or_insert(now.saturating_add(self.config.threshold_raise_delay_ms));
            if deadline <= now {
                self.raise_pending = false;
                self.raise_deadline = None;
                self.mark_all_servers();
            }
        }

        if self.servers_needing_update.is_empty() {
            return;
        }

        let Some(region) = self
            .segmentation
            .local_regions()
            .into_iter()
            .reduce(|merged, region| merged.merge(&region))
        else {
            debug!("No local regions yet, deferring server query push");
            return;
        };

        let sphere = region.bounding_sphere();
        let query = ServerQueryMessage::add_or_update(
            TimedMotionVector::stationary(now, sphere.center),
            BoundingSphere::centered(sphere.radius),
            self.threshold.min(),
        );
        let payload = match protocol::encode(&ProxContainer::query(query)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode server query: {}", e);
                return;
            }
        };

        let mut retry = BTreeSet::new();
        for server in std::mem::take(&mut self.servers_needing_update) {
            let message = ServerMessage {
                source: self.server_id,
                dest: server,
                payload: payload.clone(),
            };
            if self.server_router.route(&message) {
                self.stats.server_queries_sent += 1;
            } else {
                trace!("Router refused server query to {}, will retry", server);
                retry.insert(server);
            }
        }
        self.servers_needing_update.extend(retry);
    }

    /// Advances both query indexes.
    pub fn tick_indexes(&mut self, now: u64) {
        self.server_index.tick(now, &self.local_cache);
        self.object_index.tick(now, &self.global_cache);
    }

    /// Turns pending server query events into queued result messages.
    pub fn generate_server_events(&mut self, now: u64) {
        let batches = harvest(
            &mut self.server_queries,
            self.server_index.as_mut(),
            &self.local_cache,
            now,
            self.config.max_results_per_message,
            Subscriber::Server,
            &mut self.location_ops,
            &mut self.stats,
        );

        for (server, results) in batches {
            match protocol::encode(&ProxContainer::result(results)) {
                Ok(payload) => self.server_results.push(ServerMessage {
                    source: self.server_id,
                    dest: server,
                    payload,
                }),
                Err(e) => warn!("Failed to encode results for {}: {}", server, e),
            }
        }
    }

    /// Turns pending object query events into queued result messages.
    pub fn generate_object_events(&mut self, now: u64) {
        let batches = harvest(
            &mut self.object_queries,
            self.object_index.as_mut(),
            &self.global_cache,
            now,
            self.config.max_results_per_message,
            Subscriber::Object,
            &mut self.location_ops,
            &mut self.stats,
        );

        for (object, results) in batches {
            match protocol::encode(&results) {
                Ok(payload) => self.object_results.push(ObjectMessage {
                    source: self.server_id,
                    dest: object,
                    payload,
                }),
                Err(e) => warn!("Failed to encode results for {}: {}", object, e),
            }
        }
    }

    /// Delivers queued results oldest first, stopping each queue at its
    /// first refusal.
    pub fn deliver_results(&mut self) {
        let router = self.server_router.clone();
        let sent = self.server_results.drain_with(|message| router.route(message));
        self.stats.server_results_sent += sent as u64;

        let streams = self.object_streams.clone();
        let sent = self.object_results.drain_with(|message| streams.deliver(message));
        self.stats.object_results_sent += sent as u64;
    }

    /// Location service effects produced since the last call.
    pub fn take_location_ops(&mut self) -> Vec<LocationServiceOp> {
        std::mem::take(&mut self.location_ops)
    }

    pub fn stats(&self) -> ProximityStats {
        ProximityStats {
            server_queries: self.server_queries.len(),
            object_queries: self.object_queries.len(),
            min_object_query_angle: self.threshold.min().as_f64(),
            servers_pending_refresh: self.servers_needing_update.len(),
            queued_server_results: self.server_results.len(),
            queued_object_results: self.object_results.len(),
            ..self.stats.clone()
        }
    }
}

/// Drains every query's events into result batches of at most `max`
/// entries.
///
/// Additions whose subject the cache no longer tracks are skipped and
/// forgotten by the index, as are events contradicting what the subscriber
/// was already told. Every
/// delivered addition subscribes the subscriber to the subject's motion;
/// every delivered removal unsubscribes it.
#[allow(clippy::too_many_arguments)]
fn harvest<K: Copy + Eq + Hash + std::fmt::Display>(
    queries: &mut QuerySet<K>,
    index: &mut dyn QueryIndex,
    cache: &LocationCache,
    now: u64,
    max: usize,
    subscriber: fn(K) -> Subscriber,
    ops: &mut Vec<LocationServiceOp>,
    stats: &mut ProximityStats,
) -> Vec<(K, ProximityResults)> {
    let max = max.max(1);
    let mut batches = Vec::new();

    for query in queries.iter_mut() {
        let events: Vec<QueryEvent> = index.pop_events(query.handle);
        if events.is_empty() {
            continue;
        }

        let owner = subscriber(query.subscriber);
        let mut current = ProximityResults::new(now);
        for event in events {
            match event.kind {
                QueryEventKind::Added => {
                    let Some(entry) = cache.get(event.subject) else {
                        debug!(
                            "Skipping addition of {} for {}, no longer tracked",
                            event.subject, owner
                        );
                        // Re-announced by the next tick if it is tracked again.
                        index.forget(query.handle, event.subject);
                        stats.skipped_events += 1;
                        continue;
                    };
                    if !query.accept(&event) {
                        stats.skipped_events += 1;
                        continue;
                    }
                    current.additions.push(ProximityAddition {
                        object: event.subject,
                        location: entry.location,
                        bounds: entry.bounds,
                    });
                    ops.push(LocationServiceOp::Subscribe {
                        subscriber: owner,
                        observed: event.subject,
                    });
                }
                QueryEventKind::Removed => {
                    if !query.accept(&event) {
                        stats.skipped_events += 1;
                        continue;
                    }
                    current.removals.push(ProximityRemoval { object: event.subject });
                    ops.push(LocationServiceOp::Unsubscribe {
                        subscriber: owner,
                        observed: event.subject,
                    });
                }
            }

            if current.len() >= max {
                let full = std::mem::replace(&mut current, ProximityResults::new(now));
                batches.push((query.subscriber, full));
            }
        }
        if !current.is_empty() {
            batches.push((query.subscriber, current));
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mocks::MockWorld;
    use crate::types::Vec3;

    fn state(world: &MockWorld, max: usize) -> ProximityState {
        let config = ProximityConfig {
            max_results_per_message: max,
            ..Default::default()
        };
        ProximityState::new(config, &world.context())
    }

    fn add_entity(state: &mut ProximityState, position: Vec3, replica: bool) -> EntityId {
        let id = EntityId::new();
        state.apply_location_change(&LocationChange::Added {
            id,
            location: TimedMotionVector::stationary(0, position),
            bounds: BoundingSphere::centered(1.0),
            replica,
        });
        id
    }

    fn origin() -> TimedMotionVector {
        TimedMotionVector::stationary(0, Vec3::zero())
    }

    fn watch(state: &mut ProximityState, viewer: EntityId, angle: SolidAngle) {
        state.update_object_query(viewer, origin(), BoundingSphere::centered(1.0), Some(angle));
    }

    #[test]
    fn test_batch_size_bound() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 4);
        for i in 0..10 {
            add_entity(&mut state, Vec3::new(i as f64 * 3.0, 0.0, 0.0), false);
        }
        let viewer = EntityId::new();
        watch(&mut state, viewer, SolidAngle::MIN);

        state.tick_indexes(0);
        state.generate_object_events(0);
        state.deliver_results();

        let results = world.streams.take_results();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(dest, r)| *dest == viewer && r.additions.len() <= 4));
        assert_eq!(results.iter().map(|(_, r)| r.additions.len()).sum::<usize>(), 10);
        let subscribes = state
            .take_location_ops()
            .into_iter()
            .filter(|op| matches!(op, LocationServiceOp::Subscribe { .. }))
            .count();
        assert_eq!(subscribes, 10);
    }

    #[test]
    fn test_added_for_evicted_subject_is_skipped() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 10);
        let subject = add_entity(&mut state, Vec3::new(5.0, 0.0, 0.0), true);
        let viewer = EntityId::new();
        watch(&mut state, viewer, SolidAngle::MIN);

        state.tick_indexes(0);
        state.apply_location_change(&LocationChange::Removed { id: subject, replica: true });
        state.generate_object_events(0);
        state.deliver_results();

        assert!(world.streams.take_results().is_empty());
        assert_eq!(state.stats().skipped_events, 1);

        // The index forgot the subject, so no removal follows for a
        // subscriber that never saw the addition.
        state.tick_indexes(1);
        state.generate_object_events(1);
        state.deliver_results();
        assert!(world.streams.take_results().is_empty());
    }

    #[test]
    fn test_evicted_subject_returning_before_next_tick_is_announced() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 10);
        let subject = add_entity(&mut state, Vec3::new(5.0, 0.0, 0.0), true);
        let viewer = EntityId::new();
        watch(&mut state, viewer, SolidAngle::MIN);

        state.tick_indexes(0);
        state.apply_location_change(&LocationChange::Removed { id: subject, replica: true });
        state.generate_object_events(0);
        assert_eq!(state.stats().skipped_events, 1);

        // Back in the cache before the index looks again.
        state.apply_location_change(&LocationChange::Added {
            id: subject,
            location: TimedMotionVector::stationary(0, Vec3::new(5.0, 0.0, 0.0)),
            bounds: BoundingSphere::centered(1.0),
            replica: true,
        });
        for now in 1..=4 {
            state.tick_indexes(now);
            state.generate_object_events(now);
            state.deliver_results();
        }

        let results = world.streams.take_results();
        assert_eq!(results.len(), 1);
        let (dest, result) = &results[0];
        assert_eq!(*dest, viewer);
        assert_eq!(result.additions.len(), 1);
        assert_eq!(result.additions[0].object, subject);
        assert!(result.removals.is_empty());
        assert!(state.object_query(viewer).unwrap().is_present(subject));
    }

    #[test]
    fn test_server_queries_use_local_entities_only() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 10);
        let owned = add_entity(&mut state, Vec3::new(5.0, 0.0, 0.0), false);
        add_entity(&mut state, Vec3::new(6.0, 0.0, 0.0), true);

        let region = BoundingSphere::centered(50.0);
        state.update_server_query(ServerId(2), origin(), region, SolidAngle::new(0.01));
        state.tick_indexes(0);
        state.generate_server_events(0);
        state.deliver_results();

        let sent = world.router.take_containers();
        assert_eq!(sent.len(), 1);
        let (dest, container) = &sent[0];
        assert_eq!(*dest, ServerId(2));
        let result = container.result.as_ref().unwrap();
        assert_eq!(result.additions.len(), 1);
        assert_eq!(result.additions[0].object, owned);
    }

    #[test]
    fn test_refused_results_are_retained_in_order() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 1);
        let a = add_entity(&mut state, Vec3::new(5.0, 0.0, 0.0), false);
        let b = add_entity(&mut state, Vec3::new(7.0, 0.0, 0.0), false);
        let viewer = EntityId::new();
        watch(&mut state, viewer, SolidAngle::MIN);
        state.tick_indexes(0);
        state.generate_object_events(0);

        world.streams.set_refuse(true);
        state.deliver_results();
        assert_eq!(state.stats().queued_object_results, 2);

        world.streams.set_refuse(false);
        state.deliver_results();
        let delivered: BTreeSet<_> = world
            .streams
            .take_results()
            .into_iter()
            .map(|(_, r)| r.additions[0].object)
            .collect();
        assert_eq!(delivered, [a, b].into_iter().collect());
        assert_eq!(state.stats().object_results_sent, 2);
    }

    #[test]
    fn test_query_push_retries_refused_servers() {
        let world = MockWorld::new(&[2, 3]);
        let mut state = state(&world, 10);
        watch(&mut state, EntityId::new(), SolidAngle::new(0.2));
        assert_eq!(state.servers_needing_update().count(), 2);

        world.router.set_refuse(true);
        state.push_server_queries(10);
        assert_eq!(state.servers_needing_update().count(), 2);

        world.router.set_refuse(false);
        state.push_server_queries(20);
        assert_eq!(state.servers_needing_update().count(), 0);

        let sent = world.router.take_containers();
        assert_eq!(sent.len(), 2);
        let query = sent[0].1.query.as_ref().unwrap();
        assert_eq!(query.action, QueryAction::AddOrUpdate);
        assert_eq!(query.min_angle, Some(SolidAngle::new(0.2)));
        assert_eq!(query.location.unwrap().position, Vec3::new(50.0, 50.0, 50.0));
    }

    #[test]
    fn test_inbound_server_messages() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 10);

        let query = ServerQueryMessage::add_or_update(
            origin(),
            BoundingSphere::centered(10.0),
            SolidAngle::new(0.1),
        );
        let payload = protocol::encode(&ProxContainer::query(query)).unwrap();
        state.handle_server_message(ServerId(2), &payload).unwrap();
        assert_eq!(state.stats().server_queries, 1);

        let mut results = ProximityResults::new(42);
        let remote = EntityId::new();
        results.additions.push(ProximityAddition {
            object: remote,
            location: origin(),
            bounds: BoundingSphere::centered(1.0),
        });
        let payload = protocol::encode(&ProxContainer::result(results)).unwrap();
        state.handle_server_message(ServerId(2), &payload).unwrap();
        assert!(matches!(
            state.take_location_ops().as_slice(),
            [LocationServiceOp::AddReplica { t: 42, id, .. }] if *id == remote
        ));

        assert!(state.handle_server_message(ServerId(2), b"{oops").is_err());
        let remove = protocol::encode(&ProxContainer::query(ServerQueryMessage::remove())).unwrap();
        state.handle_server_message(ServerId(2), &remove).unwrap();
        let stats = state.stats();
        assert_eq!(stats.server_queries, 0);
        assert_eq!(stats.malformed_messages, 1);
        assert_eq!(
            state.take_location_ops(),
            vec![LocationServiceOp::UnsubscribeAll { subscriber: Subscriber::Server(ServerId(2)) }]
        );
    }

    #[test]
    fn test_local_motion_refreshes_object_query() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 10);
        let mover = add_entity(&mut state, Vec3::zero(), false);
        watch(&mut state, mover, SolidAngle::new(0.1));

        let moved = TimedMotionVector::stationary(5, Vec3::new(40.0, 0.0, 0.0));
        state.apply_location_change(&LocationChange::LocationUpdated {
            id: mover,
            location: moved,
            replica: false,
        });
        let query = state.object_query(mover).unwrap();
        assert_eq!(query.location, moved);
        assert_eq!(query.angle, SolidAngle::new(0.1));

        state.apply_location_change(&LocationChange::Removed { id: mover, replica: false });
        assert!(!state.has_object_query(mover));
    }

    #[test]
    fn test_migration_data_removes_query() {
        let world = MockWorld::new(&[2]);
        let mut state = state(&world, 10);
        let id = EntityId::new();
        watch(&mut state, id, SolidAngle::new(0.3));

        let data = state.take_migration_data(id).unwrap();
        assert_eq!(data.min_angle, SolidAngle::new(0.3));
        assert!(!state.has_object_query(id));
        assert!(state.take_migration_data(id).is_none());
    }
}
