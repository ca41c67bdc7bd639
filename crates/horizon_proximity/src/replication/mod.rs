//! # Replication
//!
//! Client side of the refine/coarsen protocol. A [`ReplicationClient`]
//! mirrors remote spatial indexes ("trees") into local
//! [`ReplicatedObjectCache`]s and asks their owners for more or less detail
//! as local interest changes.
//!
//! ## Ordering
//!
//! Structural updates and location updates travel separately. Location
//! updates for objects (or whole trees) not yet known are held in an
//! [`OrphanUpdateBuffer`] and replayed when the object is added. Every
//! replicated field carries a sequence number, so replays and late
//! arrivals never overwrite fresher values.

pub mod cache;
pub mod client;
pub mod orphan;
pub mod properties;
pub mod state;
pub mod unobserved;
pub mod update;

pub use cache::{
    ObjectRecord, ReplicatedListenerId, ReplicatedObjectCache, ReplicatedObjectListener,
    TrackingHandle,
};
pub use client::ReplicationClient;
pub use orphan::OrphanUpdateBuffer;
pub use properties::{Sequenced, SequencedPresenceProperties};
pub use state::{ReplicationState, ReplicationStats};
pub use unobserved::UnobservedTimeouts;
pub use update::LocUpdate;
