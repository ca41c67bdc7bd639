//! Local mirror of a remote index's objects.
//!
//! Records are reference counted instead of locked for long periods. A
//! record is erased only once its tracking count is zero **and** it has
//! been marked as no longer existing, so an iteration holding a
//! [`TrackingHandle`] can keep reading a record that was removed
//! concurrently.
//!
//! Listener callbacks run on the cache's own [`Strand`], one at a time and
//! never while the record map is borrowed. Each pending notification holds
//! a tracking reference on its record until the listeners have run.

use super::properties::SequencedPresenceProperties;
use crate::strand::Strand;
use crate::types::{AggregateBounds, EntityId, TimedMotionQuaternion, TimedMotionVector, TreeId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Callbacks for changes to a replicated object cache.
///
/// All methods default to no-ops. They run on the cache's strand; the
/// object is guaranteed to still be present while the callback runs.
pub trait ReplicatedObjectListener: Send + Sync {
    fn on_object_added(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
    fn on_object_removed(&self, _cache: &ReplicatedObjectCache, _id: EntityId, _temporary: bool) {}
    fn on_epoch_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
    fn on_parent_updated(
        &self,
        _cache: &ReplicatedObjectCache,
        _id: EntityId,
        _old: Option<EntityId>,
        _new: Option<EntityId>,
    ) {
    }
    fn on_location_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
    fn on_orientation_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
    fn on_bounds_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
    fn on_mesh_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
    fn on_physics_updated(&self, _cache: &ReplicatedObjectCache, _id: EntityId) {}
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Added,
    Removed { temporary: bool },
    Epoch,
    Parent { old: Option<EntityId>, new: Option<EntityId> },
    Location,
    Orientation,
    Bounds,
    Mesh,
    Physics,
}

/// Everything known about one replicated object.
#[derive(Debug, Clone, Default)]
pub struct ObjectRecord {
    pub exists: bool,
    pub tracking: u32,
    pub epoch: u64,
    pub aggregate: bool,
    pub parent: Option<EntityId>,
    pub props: SequencedPresenceProperties,
}

/// Proof of a tracking reference taken with
/// [`ReplicatedObjectCache::start_tracking`]. Must be returned with
/// [`ReplicatedObjectCache::stop_tracking`].
#[derive(Debug)]
#[must_use = "a tracking reference keeps the record alive until released"]
pub struct TrackingHandle {
    id: EntityId,
}

impl TrackingHandle {
    pub fn id(&self) -> EntityId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicatedListenerId(u64);

struct CacheInner {
    tree: TreeId,
    records: DashMap<EntityId, ObjectRecord>,
    listeners: RwLock<Vec<(ReplicatedListenerId, Arc<dyn ReplicatedObjectListener>)>>,
    next_listener: AtomicU64,
    strand: Strand,
}

/// Shared handle to one tree's replicated objects. Clones share state.
#[derive(Clone)]
pub struct ReplicatedObjectCache {
    inner: Arc<CacheInner>,
}

impl ReplicatedObjectCache {
    /// Creates an empty cache with its own strand. Requires a tokio runtime.
    pub fn new(tree: TreeId) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                tree,
                records: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                strand: Strand::new("replicated-cache"),
            }),
        }
    }

    pub fn tree(&self) -> TreeId {
        self.inner.tree
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Takes a reference on a present record. Returns `None` if the cache
    /// holds no record for `id`.
    pub fn start_tracking(&self, id: EntityId) -> Option<TrackingHandle> {
        let mut record = self.inner.records.get_mut(&id)?;
        record.tracking += 1;
        Some(TrackingHandle { id })
    }

    pub fn stop_tracking(&self, handle: TrackingHandle) {
        self.release(handle.id);
    }

    /// Handle-free variant of [`start_tracking`](Self::start_tracking).
    pub fn start_simple_tracking(&self, id: EntityId) -> bool {
        self.start_tracking(id).is_some()
    }

    /// Releases a reference taken with
    /// [`start_simple_tracking`](Self::start_simple_tracking).
    pub fn stop_simple_tracking(&self, id: EntityId) {
        self.release(id);
    }

    fn release(&self, id: EntityId) {
        if let Some(mut record) = self.inner.records.get_mut(&id) {
            record.tracking = record.tracking.saturating_sub(1);
        }
        self.try_remove(id);
    }

    fn try_remove(&self, id: EntityId) {
        if self
            .inner
            .records
            .remove_if(&id, |_, record| record.tracking == 0 && !record.exists)
            .is_some()
        {
            trace!("Erased replicated record {} from {}", id, self.inner.tree);
        }
    }

    // ------------------------------------------------------------------
    // Structural changes
    // ------------------------------------------------------------------

    /// Creates or resets the record for `id` and marks it existing.
    ///
    /// A record kept alive by trackers after a removal is reused, so
    /// existing tracking handles stay valid across the re-add.
    ///
    /// # Arguments
    ///
    /// * `id` - The replicated object
    /// * `aggregate` - Whether the object is an aggregate node of the tree
    /// * `parent` - The aggregate containing the object, if any
    /// * `props` - Sequenced presence properties replacing any stored ones
    ///
    /// # Returns
    ///
    /// Nothing. Listeners receive `on_object_added` on the cache's strand,
    /// and the record is guaranteed to be present while they run.
    pub fn object_added(
        &self,
        id: EntityId,
        aggregate: bool,
        parent: Option<EntityId>,
        props: SequencedPresenceProperties,
    ) {
        {
            let mut record = self.inner.records.entry(id).or_default();
            record.exists = true;
            record.aggregate = aggregate;
            record.parent = parent;
            record.props = props;
            record.tracking += 1;
        }
        self.notify(id, Notification::Added);
    }

    /// Marks `id` as no longer existing. The record is erased once the
    /// removal notification ran and no tracker remains.
    pub fn object_removed(&self, id: EntityId, temporary: bool) -> bool {
        {
            let Some(mut record) = self.inner.records.get_mut(&id) else {
                return false;
            };
            record.exists = false;
            record.tracking += 1;
        }
        self.notify(id, Notification::Removed { temporary });
        true
    }

    // ------------------------------------------------------------------
    // Field updates. All are no-ops for objects that do not exist.
    // ------------------------------------------------------------------

    fn update_field(
        &self,
        id: EntityId,
        notification: Notification,
        apply: impl FnOnce(&mut ObjectRecord) -> bool,
    ) -> bool {
        {
            let Some(mut record) = self.inner.records.get_mut(&id) else {
                return false;
            };
            if !record.exists || !apply(&mut record) {
                return false;
            }
            record.tracking += 1;
        }
        self.notify(id, notification);
        true
    }

    /// Epochs only move forward.
    pub fn epoch_updated(&self, id: EntityId, epoch: u64) -> bool {
        self.update_field(id, Notification::Epoch, |record| {
            if epoch <= record.epoch {
                return false;
            }
            record.epoch = epoch;
            true
        })
    }

    pub fn parent_updated(&self, id: EntityId, parent: Option<EntityId>) -> bool {
        let Some(old) = self.inner.records.get(&id).map(|record| record.parent) else {
            return false;
        };
        self.update_field(id, Notification::Parent { old, new: parent }, |record| {
            record.parent = parent;
            true
        })
    }

    pub fn location_updated(&self, id: EntityId, location: TimedMotionVector, seqno: u64) -> bool {
        self.update_field(id, Notification::Location, |record| {
            record.props.location.set(location, seqno)
        })
    }

    pub fn orientation_updated(
        &self,
        id: EntityId,
        orientation: TimedMotionQuaternion,
        seqno: u64,
    ) -> bool {
        self.update_field(id, Notification::Orientation, |record| {
            record.props.orientation.set(orientation, seqno)
        })
    }

    pub fn bounds_updated(&self, id: EntityId, bounds: AggregateBounds, seqno: u64) -> bool {
        self.update_field(id, Notification::Bounds, |record| {
            record.props.bounds.set(bounds, seqno)
        })
    }

    pub fn mesh_updated(&self, id: EntityId, mesh: String, seqno: u64) -> bool {
        self.update_field(id, Notification::Mesh, |record| record.props.mesh.set(mesh, seqno))
    }

    pub fn physics_updated(&self, id: EntityId, physics: String, seqno: u64) -> bool {
        self.update_field(id, Notification::Physics, |record| {
            record.props.physics.set(physics, seqno)
        })
    }

    // ------------------------------------------------------------------
    // Accessors. Callers check presence first; absent ids yield `None`.
    // ------------------------------------------------------------------

    /// Whether any record, existing or pending erasure, is held for `id`.
    pub fn contains(&self, id: EntityId) -> bool {
        self.inner.records.contains_key(&id)
    }

    /// Whether `id` is present and not removed.
    pub fn exists(&self, id: EntityId) -> bool {
        self.inner.records.get(&id).map(|record| record.exists).unwrap_or(false)
    }

    pub fn record(&self, id: EntityId) -> Option<ObjectRecord> {
        self.inner.records.get(&id).map(|record| record.clone())
    }

    pub fn epoch(&self, id: EntityId) -> Option<u64> {
        self.inner.records.get(&id).map(|record| record.epoch)
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.inner.records.get(&id).and_then(|record| record.parent)
    }

    pub fn aggregate(&self, id: EntityId) -> Option<bool> {
        self.inner.records.get(&id).map(|record| record.aggregate)
    }

    pub fn location(&self, id: EntityId) -> Option<TimedMotionVector> {
        self.inner.records.get(&id).map(|record| record.props.location.value)
    }

    pub fn orientation(&self, id: EntityId) -> Option<TimedMotionQuaternion> {
        self.inner.records.get(&id).map(|record| record.props.orientation.value)
    }

    pub fn bounds(&self, id: EntityId) -> Option<AggregateBounds> {
        self.inner.records.get(&id).map(|record| record.props.bounds.value)
    }

    pub fn mesh(&self, id: EntityId) -> Option<String> {
        self.inner.records.get(&id).map(|record| record.props.mesh.value.clone())
    }

    pub fn physics(&self, id: EntityId) -> Option<String> {
        self.inner.records.get(&id).map(|record| record.props.physics.value.clone())
    }

    pub fn properties(&self, id: EntityId) -> Option<SequencedPresenceProperties> {
        self.inner.records.get(&id).map(|record| record.props.clone())
    }

    /// True when no record reports existing. Records awaiting erasure may remain.
    pub fn is_empty(&self) -> bool {
        !self.inner.records.iter().any(|record| record.exists)
    }

    /// True when the record map holds nothing at all.
    pub fn is_fully_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn add_listener(
        &self,
        listener: Arc<dyn ReplicatedObjectListener>,
    ) -> ReplicatedListenerId {
        let id = ReplicatedListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ReplicatedListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn listeners(&self) -> Vec<Arc<dyn ReplicatedObjectListener>> {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Posts listener callbacks for `id` to the strand. The caller already
    /// took the tracking reference this releases.
    fn notify(&self, id: EntityId, notification: Notification) {
        let cache = self.clone();
        self.inner.strand.post(move || {
            for listener in cache.listeners() {
                match notification {
                    Notification::Added => listener.on_object_added(&cache, id),
                    Notification::Removed { temporary } => {
                        listener.on_object_removed(&cache, id, temporary)
                    }
                    Notification::Epoch => listener.on_epoch_updated(&cache, id),
                    Notification::Parent { old, new } => {
                        listener.on_parent_updated(&cache, id, old, new)
                    }
                    Notification::Location => listener.on_location_updated(&cache, id),
                    Notification::Orientation => listener.on_orientation_updated(&cache, id),
                    Notification::Bounds => listener.on_bounds_updated(&cache, id),
                    Notification::Mesh => listener.on_mesh_updated(&cache, id),
                    Notification::Physics => listener.on_physics_updated(&cache, id),
                }
            }
            cache.release(id);
        });
    }

    /// Resolves once every notification posted so far has run.
    pub async fn flush(&self) {
        self.inner.strand.flush().await;
    }
}
