//! Per-field sequenced object properties.
//!
//! Each replicated field carries the sequence number of the update that
//! last set it, so an update overtaken by a newer one is rejected field by
//! field instead of overwriting fresher data.

use crate::context::TimeSynced;
use crate::protocol::ReplicaAddition;
use crate::types::{AggregateBounds, TimedMotionQuaternion, TimedMotionVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequenced<T> {
    pub value: T,
    pub seqno: u64,
}

impl<T> Sequenced<T> {
    pub fn new(value: T, seqno: u64) -> Self {
        Self { value, seqno }
    }

    /// Stores `value` unless `seqno` is older than the current one.
    pub fn set(&mut self, value: T, seqno: u64) -> bool {
        if seqno < self.seqno {
            return false;
        }
        self.value = value;
        self.seqno = seqno;
        true
    }
}

/// Replicated presence properties of one object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequencedPresenceProperties {
    pub location: Sequenced<TimedMotionVector>,
    pub orientation: Sequenced<TimedMotionQuaternion>,
    pub bounds: Sequenced<AggregateBounds>,
    pub mesh: Sequenced<String>,
    pub physics: Sequenced<String>,
}

impl SequencedPresenceProperties {
    /// Properties of a newly added replica, with timestamps moved to the
    /// local clock. Every field takes the addition's sequence number.
    pub fn from_addition(addition: &ReplicaAddition, sync: &dyn TimeSynced) -> Self {
        let seqno = addition.seqno;
        let mut location = addition.location;
        location.t = sync.local_time(location.t);
        let mut orientation = addition.orientation;
        orientation.t = sync.local_time(orientation.t);

        Self {
            location: Sequenced::new(location, seqno),
            orientation: Sequenced::new(orientation, seqno),
            bounds: Sequenced::new(addition.bounds, seqno),
            mesh: Sequenced::new(addition.mesh.clone(), seqno),
            physics: Sequenced::new(addition.physics.clone(), seqno),
        }
    }
}
