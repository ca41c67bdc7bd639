//! # Horizon Proximity
//!
//! Distributed interest management for Horizon servers. Any server can
//! learn which entities, local or owned by a peer, fall inside a region of
//! interest and receive add/remove notifications as that set changes,
//! without every server tracking every entity.
//!
//! ## Core Features
//!
//! - **Pluggable Query Evaluation**: brute-force and R-tree indexes behind one [`QueryIndex`] trait
//! - **Two Query Populations**: coarse server-to-server queries and fine per-object queries
//! - **Threshold Propagation**: the finest object query angle is advertised to every peer
//! - **Index Replication**: remote trees mirrored into reference-counted [`ReplicatedObjectCache`]s
//! - **Out-of-Order Tolerance**: early location updates are buffered and replayed on addition
//! - **Refine/Coarsen Protocol**: detail requested on observation, released after an idle timeout
//!
//! ## Architecture Overview
//!
//! Each component runs on its own serial context and is only reached by
//! message passing:
//!
//! - [`ProximityCoordinator`] owns the query sets and indexes in one worker task
//! - [`ReplicationClient`] owns the replicated trees in another
//! - every [`ReplicatedObjectCache`] delivers listener callbacks on its own [`strand::Strand`]
//!
//! Transport, the authoritative location service, region ownership and
//! clock synchronization are supplied by the host through the traits in
//! [`context`].
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use horizon_proximity::*;
//! use std::sync::Arc;
//!
//! async fn run(
//!     context: ProximityContext,
//!     owner: Arc<dyn ReplicationOwner>,
//!     viewer: EntityId,
//! ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ProximityConfigBuilder::new()
//!         .with_max_results_per_message(32)
//!         .build();
//!     setup_logging(&config.logging)?;
//!
//!     let proximity = ProximityCoordinator::spawn(config.proximity.clone(), context)?;
//!     let replication = ReplicationClient::spawn(
//!         config.replication.clone(),
//!         owner,
//!         Arc::new(ClockOffset(0)),
//!     )?;
//!
//!     // Results for the viewer arrive on its object stream.
//!     proximity.add_query(viewer, SolidAngle::new(0.01))?;
//!     replication.init_query()?;
//!
//!     proximity.shutdown().await;
//!     replication.shutdown().await;
//!     Ok(())
//! }
//! ```

#[cfg(test)]
mod tests;

// Core modules
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod strand;
pub mod types;
pub mod utils;

pub mod proximity;
pub mod replication;
pub mod spatial;

// Re-export commonly used items for convenience
pub use config::{
    IndexKind, LoggingConfig, ProximityConfig, ProximityConfigBuilder, ProximityServiceConfig,
    ReplicationConfig,
};
pub use context::{
    ClockOffset, LocationService, LocationServiceOp, ObjectStreams, ProximityContext,
    ReplicationOwner, Segmentation, ServerRouter, TimeSynced,
};
pub use error::{ConfigValidationError, ProtocolError, ProximityError, ReplicationError};
pub use logging::setup_logging;
pub use types::*;
pub use utils::current_timestamp;

pub use proximity::{ProximityCoordinator, ProximityState, ProximityStats};
pub use replication::{
    ReplicatedObjectCache, ReplicatedObjectListener, ReplicationClient, ReplicationStats,
};
pub use spatial::{LocationCache, LocationChange, QueryEvent, QueryIndex};
