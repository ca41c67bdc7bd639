//! # Collaborator Interfaces
//!
//! The proximity layer does not own transport, the authoritative location
//! service, region ownership or clock synchronization. The host supplies
//! them through the traits in this module, wrapped in `Arc` so they can be
//! shared between the worker loop and the caller-facing task.
//!
//! Routers report back-pressure by returning `false`; the caller keeps the
//! message and retries it on a later cycle.

use crate::protocol::{IndexRequest, ObjectMessage, ServerMessage};
use crate::replication::ReplicatedObjectCache;
use crate::types::{
    BoundingSphere, EntityId, RegionBounds, ServerId, Subscriber, TimedMotionVector, TreeId,
};
use std::sync::Arc;

/// Delivers payloads to peer servers.
pub trait ServerRouter: Send + Sync {
    /// Returns `false` when the message cannot be accepted right now.
    fn route(&self, message: &ServerMessage) -> bool;
}

/// Delivers payloads on a single object's stream.
pub trait ObjectStreams: Send + Sync {
    /// Returns `false` when the stream cannot accept the message right now.
    fn deliver(&self, message: &ObjectMessage) -> bool;
}

/// The authoritative per-entity location service of this server.
pub trait LocationService: Send + Sync {
    fn location(&self, id: EntityId) -> Option<TimedMotionVector>;
    fn bounds(&self, id: EntityId) -> Option<BoundingSphere>;

    /// Start forwarding motion updates for `observed` to `subscriber`.
    fn subscribe(&self, subscriber: Subscriber, observed: EntityId);
    fn unsubscribe(&self, subscriber: Subscriber, observed: EntityId);
    fn unsubscribe_all(&self, subscriber: Subscriber);

    /// Record an entity owned by another server as visible here.
    fn add_replica(
        &self,
        t: u64,
        id: EntityId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
    );
    fn remove_replica(&self, t: u64, id: EntityId);
}

/// Region ownership of this server and the set of peers.
pub trait Segmentation: Send + Sync {
    /// Regions owned by this server. May be empty before segmentation settles.
    fn local_regions(&self) -> Vec<RegionBounds>;
    /// Every other server in the cluster.
    fn peer_servers(&self) -> Vec<ServerId>;
}

/// Converts remote timestamps to the local clock.
pub trait TimeSynced: Send + Sync {
    fn local_time(&self, remote_t: u64) -> u64;
}

/// Fixed offset between a remote clock and ours, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockOffset(pub i64);

impl TimeSynced for ClockOffset {
    fn local_time(&self, remote_t: u64) -> u64 {
        if self.0 >= 0 {
            remote_t.saturating_add(self.0 as u64)
        } else {
            remote_t.saturating_sub(self.0.unsigned_abs())
        }
    }
}

/// Receives lifecycle notifications from a
/// [`ReplicationClient`](crate::ReplicationClient) and carries its requests
/// to the remote index owner.
pub trait ReplicationOwner: Send + Sync {
    /// A tree was seen for the first time.
    fn on_created_replicated_index(
        &self,
        tree: TreeId,
        cache: ReplicatedObjectCache,
        origin: Option<ServerId>,
        dynamic_objects: bool,
    );

    /// A tree emptied out and its local mirror was discarded.
    fn on_destroyed_replicated_index(&self, tree: TreeId);

    /// Returns `false` when the request could not be sent.
    fn send_index_request(&self, request: &IndexRequest) -> bool;
}

/// Effect on the location service, produced by the proximity worker and
/// executed on the caller-facing task.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationServiceOp {
    Subscribe { subscriber: Subscriber, observed: EntityId },
    Unsubscribe { subscriber: Subscriber, observed: EntityId },
    UnsubscribeAll { subscriber: Subscriber },
    AddReplica { t: u64, id: EntityId, location: TimedMotionVector, bounds: BoundingSphere },
    RemoveReplica { t: u64, id: EntityId },
}

impl LocationServiceOp {
    pub fn apply(&self, service: &dyn LocationService) {
        match self {
            LocationServiceOp::Subscribe { subscriber, observed } => {
                service.subscribe(*subscriber, *observed)
            }
            LocationServiceOp::Unsubscribe { subscriber, observed } => {
                service.unsubscribe(*subscriber, *observed)
            }
            LocationServiceOp::UnsubscribeAll { subscriber } => {
                service.unsubscribe_all(*subscriber)
            }
            LocationServiceOp::AddReplica { t, id, location, bounds } => {
                service.add_replica(*t, *id, *location, *bounds)
            }
            LocationServiceOp::RemoveReplica { t, id } => service.remove_replica(*t, *id),
        }
    }
}

/// Everything a [`ProximityCoordinator`](crate::ProximityCoordinator) needs from its host.
#[derive(Clone)]
pub struct ProximityContext {
    pub server_id: ServerId,
    pub server_router: Arc<dyn ServerRouter>,
    pub object_streams: Arc<dyn ObjectStreams>,
    pub location_service: Arc<dyn LocationService>,
    pub segmentation: Arc<dyn Segmentation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_offset() {
        assert_eq!(ClockOffset(250).local_time(1000), 1250);
        assert_eq!(ClockOffset(-250).local_time(1000), 750);
        assert_eq!(ClockOffset(-2000).local_time(1000), 0);
    }
}
