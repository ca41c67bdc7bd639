//! Refine/coarsen protocol state owned by the replication worker.
//!
//! [`ReplicationState`] mirrors every remote tree this server has heard
//! about into a [`ReplicatedObjectCache`], buffers location updates that
//! arrive ahead of the structure they refer to, and decides when to ask the
//! remote owner for more or less detail.

use super::cache::ReplicatedObjectCache;
use super::orphan::OrphanUpdateBuffer;
use super::properties::SequencedPresenceProperties;
use super::unobserved::UnobservedTimeouts;
use super::update::LocUpdate;
use crate::config::ReplicationConfig;
use crate::context::{ReplicationOwner, TimeSynced};
use crate::error::ProtocolError;
use crate::protocol::{
    self, DynamicClassification, IndexRequest, LocationUpdate, ProximityUpdate, ReplicationMessage,
};
use crate::types::{EntityId, IndexNode, TreeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub trees: usize,
    pub pending_orphan_trees: usize,
    pub orphaned_objects: usize,
    pub unobserved_nodes: usize,
    pub refine_requests: u64,
    pub coarsen_requests: u64,
    pub failed_requests: u64,
    pub expired_orphan_updates: u64,
    pub malformed_messages: u64,
}

pub struct ReplicationState {
    config: ReplicationConfig,
    owner: Arc<dyn ReplicationOwner>,
    time_sync: Arc<dyn TimeSynced>,
    trees: BTreeMap<TreeId, ReplicatedObjectCache>,
    orphans: BTreeMap<TreeId, OrphanUpdateBuffer>,
    pending_orphan_trees: Vec<TreeId>,
    unobserved: UnobservedTimeouts,
    stats: ReplicationStats,
}

impl ReplicationState {
    pub fn new(
        config: ReplicationConfig,
        owner: Arc<dyn ReplicationOwner>,
        time_sync: Arc<dyn TimeSynced>,
    ) -> Self {
        Self {
            config,
            owner,
            time_sync,
            trees: BTreeMap::new(),
            orphans: BTreeMap::new(),
            pending_orphan_trees: Vec::new(),
            unobserved: UnobservedTimeouts::new(),
            stats: ReplicationStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Requests to the remote owner
    // ------------------------------------------------------------------

    fn send_request(&mut self, request: IndexRequest) {
        if !self.owner.send_index_request(&request) {
            self.stats.failed_requests += 1;
            warn!("Index request {:?} for {:?} was not accepted", request.action, request.index);
        }
    }

    pub fn init_query(&mut self) {
        self.send_request(IndexRequest::init());
    }

    pub fn destroy_query(&mut self) {
        self.send_request(IndexRequest::destroy());
    }

    /// Someone looks at `node`: ask for its children and forget any
    /// pending coarsen.
    pub fn queriers_are_observing(&mut self, tree: TreeId, node: EntityId) {
        debug!("Requesting refinement of {} in {}", node, tree);
        self.stats.refine_requests += 1;
        self.send_request(IndexRequest::refine(tree, vec![node]));
        self.unobserved.cancel(&IndexNode::new(tree, node));
    }

    /// Nobody looks at `node` any more: coarsen it once the unobserved
    /// timeout passes without renewed interest.
    pub fn queriers_stopped_observing(&mut self, tree: TreeId, node: EntityId, now: Instant) {
        let expires = now + self.config.unobserved_timeout();
        if !self.unobserved.insert(IndexNode::new(tree, node), expires) {
            trace!("{} in {} is already waiting to be coarsened", node, tree);
        }
    }

    /// The node left its tree, so there is nothing left to coarsen.
    pub fn replicated_node_removed(&mut self, tree: TreeId, node: EntityId) {
        self.unobserved.cancel(&IndexNode::new(tree, node));
    }

    /// Sends one coarsen request per tree for every node whose unobserved
    /// timeout passed. Returns the number of nodes coarsened.
    pub fn process_expired_nodes(&mut self, now: Instant) -> usize {
        let expired = self.unobserved.pop_expired(now);
        let count = expired.len();

        let mut by_tree: BTreeMap<TreeId, Vec<EntityId>> = BTreeMap::new();
        for node in expired {
            by_tree.entry(node.tree).or_default().push(node.node);
        }
        for (tree, nodes) in by_tree {
            debug!("Requesting coarsening of {} nodes in {}", nodes.len(), tree);
            self.stats.coarsen_requests += 1;
            self.send_request(IndexRequest::coarsen(tree, nodes));
        }
        count
    }

    pub fn next_unobserved_expiry(&self) -> Option<Instant> {
        self.unobserved.next_expiry()
    }

    // ------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------

    /// Decodes and applies one raw message from the remote owner.
    pub fn handle_message(&mut self, payload: &[u8], now: Instant) -> Result<(), ProtocolError> {
        let message = match protocol::decode::<ReplicationMessage>(payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed_messages += 1;
                return Err(e);
            }
        };
        match message {
            ReplicationMessage::Proximity(update) => self.handle_proximity_update(&update, now),
            ReplicationMessage::Location(update) => self.handle_location_update(&update, now),
        }
        Ok(())
    }

    fn orphan_buffer(&mut self, tree: TreeId) -> &mut OrphanUpdateBuffer {
        let timeout = self.config.orphan_timeout();
        self.orphans
            .entry(tree)
            .or_insert_with(|| OrphanUpdateBuffer::new(timeout))
    }

    fn note_pending_orphans(&mut self, tree: TreeId) {
        if !self.pending_orphan_trees.contains(&tree) {
            self.pending_orphan_trees.push(tree);
        }
    }

    /// Returns the cache for `tree`, creating it when the update announces
    /// the tree for the first time. Missing index properties mean an unknown
    /// origin and dynamic objects.
    fn cache_for_update(&mut self, update: &ProximityUpdate) -> ReplicatedObjectCache {
        let tree = update.index;
        if let Some(cache) = self.trees.get(&tree) {
            return cache.clone();
        }

        let properties = update.properties.as_ref();
        let origin = properties.and_then(|p| p.origin);
        let dynamic_objects = properties.and_then(|p| p.dynamic_classification)
            != Some(DynamicClassification::Static);
        let cache = ReplicatedObjectCache::new(tree);
        self.trees.insert(tree, cache.clone());
        self.orphan_buffer(tree);

        info!(
            "🌳 Replicated {} created (origin {:?}, {})",
            tree,
            origin,
            if dynamic_objects { "dynamic" } else { "static" }
        );
        self.owner
            .on_created_replicated_index(tree, cache.clone(), origin, dynamic_objects);
        cache
    }

    pub fn handle_proximity_update(&mut self, update: &ProximityUpdate, now: Instant) {
        let tree = update.index;
        let cache = self.cache_for_update(update);

        for addition in &update.additions {
            trace!("Addition of {} to {}", addition.object, tree);
            let props =
                SequencedPresenceProperties::from_addition(addition, self.time_sync.as_ref());
            cache.object_added(addition.object, addition.aggregate, addition.parent, props);

            for orphan in self.orphan_buffer(tree).take_orphan_updates(addition.object) {
                orphan.apply_to(&cache);
            }
        }

        for removal in &update.removals {
            trace!("Removal of {} from {}", removal.object, tree);
            if let Some(handle) = cache.start_tracking(removal.object) {
                self.orphan_buffer(tree).add_update_from_existing(&cache, removal.object, now);
                cache.stop_tracking(handle);
            }
            cache.object_removed(removal.object, removal.is_temporary());
        }

        if cache.is_empty() {
            self.tear_down(tree);
        }
    }

    /// Discards an emptied tree. Orphaned updates still waiting for a
    /// claim stay buffered until the sweep evicts them.
    fn tear_down(&mut self, tree: TreeId) {
        if self.trees.remove(&tree).is_some() {
            info!("🍂 Replicated {} emptied and was discarded", tree);
            self.owner.on_destroyed_replicated_index(tree);
        }
        match self.orphans.get(&tree) {
            Some(buffer) if !buffer.is_empty() => self.note_pending_orphans(tree),
            _ => {
                self.orphans.remove(&tree);
            }
        }
    }

    pub fn handle_location_update(&mut self, message: &LocationUpdate, now: Instant) {
        if message.index_ids.is_empty() {
            error!(
                "Location update for {} names no replicated trees, ignoring it",
                message.object
            );
            return;
        }

        let update = LocUpdate::from_message(message, self.time_sync.as_ref());
        for tree in &message.index_ids {
            let known = self
                .trees
                .get(tree)
                .map(|cache| (cache.clone(), cache.exists(update.object)));
            match known {
                Some((cache, true)) => update.apply_to(&cache),
                Some(_) => self.orphan_buffer(*tree).add_orphan_update(update.clone(), now),
                None => {
                    self.orphan_buffer(*tree).add_orphan_update(update.clone(), now);
                    self.note_pending_orphans(*tree);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Orphan housekeeping
    // ------------------------------------------------------------------

    /// Drops orphaned updates older than the orphan timeout.
    pub fn expire_orphans(&mut self, now: Instant) -> usize {
        let expired: usize = self.orphans.values_mut().map(|buffer| buffer.expire(now)).sum();
        if expired > 0 {
            self.stats.expired_orphan_updates += expired as u64;
            debug!("Expired {} orphaned location updates", expired);
        }
        expired
    }

    /// Low-frequency sweep over trees that received updates before any
    /// structure. Returns how many trees had their state discarded.
    pub fn cleanup_orphans(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_orphan_trees);
        let mut torn_down = 0;

        for tree in pending {
            let buffered = self.orphans.get(&tree).map(|buffer| !buffer.is_empty());
            let cache_has_data = self.trees.get(&tree).map(|cache| !cache.is_fully_empty());

            match (cache_has_data, buffered) {
                // Nothing left for this tree.
                (None, None) => {}
                // Still waiting for the updates to be claimed.
                (_, Some(true)) => self.pending_orphan_trees.push(tree),
                // Real data arrived; normal teardown applies from here.
                (Some(true), _) => {}
                _ => {
                    self.orphans.remove(&tree);
                    if self.trees.remove(&tree).is_some() {
                        self.owner.on_destroyed_replicated_index(tree);
                    }
                    torn_down += 1;
                    debug!("Discarded unclaimed orphan state for {}", tree);
                }
            }
        }
        torn_down
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn cache(&self, tree: TreeId) -> Option<ReplicatedObjectCache> {
        self.trees.get(&tree).cloned()
    }

    pub fn trees(&self) -> impl Iterator<Item = TreeId> + '_ {
        self.trees.keys().copied()
    }

    pub fn is_pending_orphan_tree(&self, tree: TreeId) -> bool {
        self.pending_orphan_trees.contains(&tree)
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            trees: self.trees.len(),
            pending_orphan_trees: self.pending_orphan_trees.len(),
            orphaned_objects: self.orphans.values().map(OrphanUpdateBuffer::len).sum(),
            unobserved_nodes: self.unobserved.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ClockOffset;
    use crate::protocol::{IndexAction, IndexProperties, ReplicaAddition, ReplicaRemoval};
    use crate::tests::mocks::{MockOwner, OwnerEvent};
    use crate::types::{AggregateBounds, ServerId, TimedMotionVector, Vec3};
    use std::time::Duration;

    fn state(owner: &Arc<MockOwner>) -> ReplicationState {
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
            mesh: String::new(),
            physics: String::new(),
        }
    }

    fn announce(tree: TreeId, additions: Vec<ReplicaAddition>) -> ProximityUpdate {
        ProximityUpdate {
            index: tree,
            properties: Some(IndexProperties {
                origin: Some(ServerId(7)),
                dynamic_classification: Some(DynamicClassification::Static),
            }),
            additions,
            removals: vec![],
        }
    }

    fn location(object: EntityId, tree: TreeId, x: f64, seqno: u64) -> LocationUpdate {
        LocationUpdate {
            object,
            index_ids: vec![tree],
            seqno,
            location: Some(TimedMotionVector::stationary(0, Vec3::new(x, 0.0, 0.0))),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_tree_is_announced_and_torn_down_when_empty() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let tree = TreeId(3);
        let a = EntityId::new();
        let now = Instant::now();

        state.handle_proximity_update(&announce(tree, vec![addition(a, 1.0, 1)]), now);
        assert_eq!(owner.events(), vec![OwnerEvent::Created(tree, Some(ServerId(7)), false)]);
        assert!(state.cache(tree).unwrap().exists(a));

        state.handle_proximity_update(
            &ProximityUpdate {
                index: tree,
                properties: None,
                additions: vec![],
                removals: vec![ReplicaRemoval { object: a, temporary: Some(false) }],
            },
            now,
        );
        assert_eq!(owner.events().last(), Some(&OwnerEvent::Destroyed(tree)));
        assert!(state.cache(tree).is_none());
        // The removal snapshot is kept for a possible reappearance.
        assert!(state.is_pending_orphan_tree(tree));
    }

    #[tokio::test]
    async fn test_update_for_undescribed_tree_creates_dynamic_tree() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let object = EntityId::new();
        let update = ProximityUpdate {
            index: TreeId(1),
            properties: None,
            additions: vec![addition(object, 0.0, 1)],
            removals: vec![],
        };
        state.handle_proximity_update(&update, Instant::now());
        assert_eq!(owner.events(), vec![OwnerEvent::Created(TreeId(1), None, true)]);
        assert_eq!(state.stats().trees, 1);
        assert!(state.cache(TreeId(1)).unwrap().exists(object));
    }

    #[tokio::test]
    async fn test_location_before_tree_is_replayed_on_addition() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let tree = TreeId(2);
        let a = EntityId::new();
        let now = Instant::now();

        state.handle_location_update(&location(a, tree, 5.0, 4), now);
        assert!(state.is_pending_orphan_tree(tree));
        assert_eq!(state.stats().orphaned_objects, 1);

        state.handle_proximity_update(&announce(tree, vec![addition(a, 1.0, 2)]), now);
        let cache = state.cache(tree).unwrap();
        assert_eq!(cache.location(a).unwrap().position.x, 5.0);
        assert_eq!(state.stats().orphaned_objects, 0);

        // Real data arrived, so the sweep only forgets the pending entry.
        assert_eq!(state.cleanup_orphans(), 0);
        assert!(!state.is_pending_orphan_tree(tree));
        assert!(state.cache(tree).is_some());
    }

    #[tokio::test]
    async fn test_location_update_applies_to_every_named_tree() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let a = EntityId::new();
        let now = Instant::now();
        state.handle_proximity_update(&announce(TreeId(1), vec![addition(a, 0.0, 1)]), now);
        state.handle_proximity_update(&announce(TreeId(2), vec![addition(a, 0.0, 1)]), now);

        let mut update = location(a, TreeId(1), 9.0, 2);
        update.index_ids.push(TreeId(2));
        state.handle_location_update(&update, now);
        for tree in [TreeId(1), TreeId(2)] {
            assert_eq!(state.cache(tree).unwrap().location(a).unwrap().position.x, 9.0);
        }

        let mut unrouted = location(a, TreeId(1), 1.0, 3);
        unrouted.index_ids.clear();
        state.handle_location_update(&unrouted, now);
        assert_eq!(state.cache(TreeId(1)).unwrap().location(a).unwrap().position.x, 9.0);
    }

    #[tokio::test]
    async fn test_cleanup_discards_unclaimed_orphans() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let tree = TreeId(9);
        let start = Instant::now();

        state.handle_location_update(&location(EntityId::new(), tree, 1.0, 1), start);
        // Buffer still holds the update: keep waiting.
        assert_eq!(state.cleanup_orphans(), 0);
        assert!(state.is_pending_orphan_tree(tree));

        assert_eq!(state.expire_orphans(start + Duration::from_secs(11)), 1);
        assert_eq!(state.cleanup_orphans(), 1);
        assert!(!state.is_pending_orphan_tree(tree));
        assert_eq!(state.stats().orphaned_objects, 0);
        assert_eq!(state.stats().expired_orphan_updates, 1);
        assert!(owner.events().is_empty());
    }

    #[tokio::test]
    async fn test_refine_and_grouped_coarsen() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let start = Instant::now();
        let (a, b, c) = (EntityId::new(), EntityId::new(), EntityId::new());

        state.queriers_stopped_observing(TreeId(1), a, start);
        state.queriers_stopped_observing(TreeId(1), b, start);
        state.queriers_stopped_observing(TreeId(2), c, start);
        state.queriers_are_observing(TreeId(2), c);
        assert_eq!(owner.take_requests(), vec![IndexRequest::refine(TreeId(2), vec![c])]);
        assert_eq!(state.stats().unobserved_nodes, 2);

        assert_eq!(state.process_expired_nodes(start + Duration::from_secs(1)), 0);
        assert_eq!(state.process_expired_nodes(start + Duration::from_secs(15)), 2);
        let requests = owner.take_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action, IndexAction::Coarsen);
        assert_eq!(requests[0].nodes, vec![a, b]);
        assert_eq!(state.next_unobserved_expiry(), None);
    }

    #[tokio::test]
    async fn test_removed_node_is_not_coarsened() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        let start = Instant::now();
        let a = EntityId::new();
        state.queriers_stopped_observing(TreeId(1), a, start);
        state.replicated_node_removed(TreeId(1), a);
        assert_eq!(state.process_expired_nodes(start + Duration::from_secs(60)), 0);
        assert!(owner.take_requests().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_is_counted() {
        let owner = MockOwner::new();
        let mut state = state(&owner);
        assert!(state.handle_message(b"{\"kind\":\"bogus\"}", Instant::now()).is_err());
        assert_eq!(state.stats().malformed_messages, 1);

        let tree = TreeId(4);
        let payload = protocol::encode(&ReplicationMessage::Proximity(announce(
            tree,
            vec![addition(EntityId::new(), 0.0, 1)],
        )))
        .unwrap();
        state.handle_message(&payload, Instant::now()).unwrap();
        assert_eq!(state.trees().collect::<Vec<_>>(), vec![tree]);
    }
}
