//! Error types for the proximity and replication layers.
//!
//! Races, stale references and transient delivery failures are absorbed
//! inside the workers (skip, retry or discard-and-log) and never surface
//! here. These errors cover the remaining cases: undecodable messages,
//! invalid configuration and calls made after a worker has stopped.

use crate::types::EntityId;

/// Encoding or decoding of a logical wire message failed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Container carries neither a query nor a result")]
    EmptyContainer,

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Errors returned by the [`ProximityCoordinator`](crate::ProximityCoordinator) handle.
#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    #[error("Proximity worker has stopped")]
    WorkerStopped,

    #[error("Entity {0} is unknown to the location service")]
    UnknownEntity(EntityId),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigValidationError),
}

/// Errors returned by the [`ReplicationClient`](crate::ReplicationClient) handle.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("Replication client has stopped")]
    ClientStopped,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigValidationError),
}
