//! A location update in the form the replicated cache applies it.

use super::cache::ReplicatedObjectCache;
use super::properties::Sequenced;
use crate::context::TimeSynced;
use crate::protocol::LocationUpdate;
use crate::types::{AggregateBounds, EntityId, TimedMotionQuaternion, TimedMotionVector};

/// Optional new values for one object's fields, each with its own
/// sequence number. Timestamps are already on the local clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocUpdate {
    pub object: EntityId,
    pub epoch: Option<u64>,
    pub parent: Option<EntityId>,
    pub location: Option<Sequenced<TimedMotionVector>>,
    pub orientation: Option<Sequenced<TimedMotionQuaternion>>,
    pub bounds: Option<Sequenced<AggregateBounds>>,
    pub mesh: Option<Sequenced<String>>,
    pub physics: Option<Sequenced<String>>,
}

impl LocUpdate {
    pub fn from_message(message: &LocationUpdate, sync: &dyn TimeSynced) -> Self {
        let seqno = message.seqno;
        Self {
            object: message.object,
            epoch: message.epoch,
            parent: message.parent,
            location: message.location.map(|mut location| {
                location.t = sync.local_time(location.t);
                Sequenced::new(location, seqno)
            }),
            orientation: message.orientation.map(|mut orientation| {
                orientation.t = sync.local_time(orientation.t);
                Sequenced::new(orientation, seqno)
            }),
            bounds: message.bounds.map(|bounds| Sequenced::new(bounds, seqno)),
            mesh: message.mesh.clone().map(|mesh| Sequenced::new(mesh, seqno)),
            physics: message.physics.clone().map(|physics| Sequenced::new(physics, seqno)),
        }
    }

    /// Snapshot of everything the cache currently holds for `object`.
    pub fn from_cache(cache: &ReplicatedObjectCache, object: EntityId) -> Option<Self> {
        let record = cache.record(object)?;
        Some(Self {
            object,
            epoch: Some(record.epoch),
            parent: record.parent,
            location: Some(record.props.location),
            orientation: Some(record.props.orientation),
            bounds: Some(record.props.bounds),
            mesh: Some(record.props.mesh),
            physics: Some(record.props.physics),
        })
    }

    /// Applies every present field: epoch, parent, location, orientation,
    /// bounds, mesh, physics.
    pub fn apply_to(&self, cache: &ReplicatedObjectCache) {
        let id = self.object;
        if let Some(epoch) = self.epoch {
            cache.epoch_updated(id, epoch);
        }
        if let Some(parent) = self.parent {
            cache.parent_updated(id, Some(parent));
        }
        if let Some(location) = &self.location {
            cache.location_updated(id, location.value, location.seqno);
        }
        if let Some(orientation) = &self.orientation {
            cache.orientation_updated(id, orientation.value, orientation.seqno);
        }
        if let Some(bounds) = &self.bounds {
            cache.bounds_updated(id, bounds.value, bounds.seqno);
        }
        if let Some(mesh) = &self.mesh {
            cache.mesh_updated(id, mesh.value.clone(), mesh.seqno);
        }
        if let Some(physics) = &self.physics {
            cache.physics_updated(id, physics.value.clone(), physics.seqno);
        }
    }
}
