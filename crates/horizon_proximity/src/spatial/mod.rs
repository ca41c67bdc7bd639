//! Spatial evaluation of proximity queries.
//!
//! - [`location_cache`] - per-entity location and bounds, fed by the location service
//! - [`query`] - the [`QueryIndex`] contract, [`QueryEvent`]s and the match predicate
//! - [`brute_force`] / [`rtree`] - interchangeable index implementations

pub mod brute_force;
pub mod location_cache;
pub mod query;
pub mod rtree;

pub use brute_force::BruteForceQueryIndex;
pub use location_cache::{
    CacheScope, ListenerId, LocationCache, LocationChange, LocationUpdateListener,
};
pub use query::{QueryEvent, QueryEventKind, QueryHandle, QueryIndex, QueryParams};
pub use rtree::RTreeQueryIndex;

use crate::config::IndexKind;

/// Creates the index implementation selected in configuration.
pub fn build_index(kind: IndexKind) -> Box<dyn QueryIndex> {
    match kind {
        IndexKind::BruteForce => Box::new(BruteForceQueryIndex::new()),
        IndexKind::RTree => Box::new(RTreeQueryIndex::new()),
    }
}
