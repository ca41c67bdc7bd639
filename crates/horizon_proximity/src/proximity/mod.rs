//! Proximity coordination for one server.
//!
//! Two independent query populations are maintained:
//!
//! - **Server queries**: coarse queries peers place on this server's region,
//!   evaluated against locally owned entities only.
//! - **Object queries**: per-object perception queries, evaluated against
//!   every entity visible here including replicas.
//!
//! The smallest object query angle is advertised to every peer as part of
//! our own server query, so peers deliver results fine enough for our most
//! demanding object.

pub mod coordinator;
pub mod outbound;
pub mod query;
pub mod state;
pub mod threshold;

pub use coordinator::ProximityCoordinator;
pub use query::{Query, QuerySet, QueryUpdate};
pub use state::{ProximityState, ProximityStats};
pub use threshold::{AngleThreshold, ThresholdChange};
