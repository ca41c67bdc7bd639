//! Shared test doubles and cross-module scenarios.
//!
//! - Threshold propagation to peer servers
//! - Orphaned location updates around temporary removals
//! - Reference-counted erasure in replicated caches


#[cfg(test)]
pub mod replication_scenarios;

#[cfg(test)]
pub mod threshold_scenarios;
