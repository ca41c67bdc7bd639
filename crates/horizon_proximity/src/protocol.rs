//! Logical wire messages exchanged by the proximity layer.
//!
//! Only the fields are fixed here. Messages are carried as JSON payloads
//! inside [`ServerMessage`] / [`ObjectMessage`] envelopes, which the
//! transport moves without looking inside.

use crate::error::ProtocolError;
use crate::types::{
    AggregateBounds, BoundingSphere, EntityId, ServerId, SolidAngle, TimedMotionQuaternion,
    TimedMotionVector, TreeId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serializes a message into a payload.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Encode)
}

/// Parses a payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(ProtocolError::Decode)
}

// ============================================================================
// Envelopes
// ============================================================================

/// Payload addressed to a peer server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub source: ServerId,
    pub dest: ServerId,
    pub payload: Vec<u8>,
}

/// Payload addressed to a single object's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMessage {
    pub source: ServerId,
    pub dest: EntityId,
    pub payload: Vec<u8>,
}

// ============================================================================
// Server <-> server
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryAction {
    AddOrUpdate,
    Remove,
}

/// A coarse query one server places on another server's region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerQueryMessage {
    pub action: QueryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<TimedMotionVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingSphere>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_angle: Option<SolidAngle>,
}

impl ServerQueryMessage {
    pub fn add_or_update(
        location: TimedMotionVector,
        bounds: BoundingSphere,
        min_angle: SolidAngle,
    ) -> Self {
        Self {
            action: QueryAction::AddOrUpdate,
            location: Some(location),
            bounds: Some(bounds),
            min_angle: Some(min_angle),
        }
    }

    pub fn remove() -> Self {
        Self {
            action: QueryAction::Remove,
            location: None,
            bounds: None,
            min_angle: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityAddition {
    pub object: EntityId,
    pub location: TimedMotionVector,
    pub bounds: BoundingSphere,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityRemoval {
    pub object: EntityId,
}

/// A batch of query result changes for one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProximityResults {
    pub timestamp: u64,
    #[serde(default)]
    pub additions: Vec<ProximityAddition>,
    #[serde(default)]
    pub removals: Vec<ProximityRemoval>,
}

impl ProximityResults {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Number of additions plus removals.
    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything one server sends another under the proximity service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxContainer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<ServerQueryMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProximityResults>,
}

impl ProxContainer {
    pub fn query(query: ServerQueryMessage) -> Self {
        Self {
            query: Some(query),
            result: None,
        }
    }

    pub fn result(result: ProximityResults) -> Self {
        Self {
            query: None,
            result: Some(result),
        }
    }

    /// Parses a container, rejecting ones that carry nothing.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let container: ProxContainer = decode(payload)?;
        if container.query.is_none() && container.result.is_none() {
            return Err(ProtocolError::EmptyContainer);
        }
        Ok(container)
    }
}

/// State handed over when an object migrates to another server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MigrationData {
    pub min_angle: SolidAngle,
}

// ============================================================================
// Replication client -> remote index owner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAction {
    Init,
    Destroy,
    Refine,
    Coarsen,
}

/// Request sent to the owner of a remote index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub action: IndexAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<TreeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<EntityId>,
}

impl IndexRequest {
    pub fn init() -> Self {
        Self {
            action: IndexAction::Init,
            index: None,
            nodes: Vec::new(),
        }
    }

    pub fn destroy() -> Self {
        Self {
            action: IndexAction::Destroy,
            index: None,
            nodes: Vec::new(),
        }
    }

    pub fn refine(tree: TreeId, nodes: Vec<EntityId>) -> Self {
        Self {
            action: IndexAction::Refine,
            index: Some(tree),
            nodes,
        }
    }

    pub fn coarsen(tree: TreeId, nodes: Vec<EntityId>) -> Self {
        Self {
            action: IndexAction::Coarsen,
            index: Some(tree),
            nodes,
        }
    }
}

// ============================================================================
// Remote index owner -> replication client
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicClassification {
    Dynamic,
    Static,
}

/// Sent with the first update of a tree the client has not seen yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_classification: Option<DynamicClassification>,
}

/// A node that became visible in a replicated tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaAddition {
    pub object: EntityId,
    pub seqno: u64,
    #[serde(default)]
    pub aggregate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    pub location: TimedMotionVector,
    #[serde(default)]
    pub orientation: TimedMotionQuaternion,
    pub bounds: AggregateBounds,
    #[serde(default)]
    pub mesh: String,
    #[serde(default)]
    pub physics: String,
}

/// A node that left a replicated tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaRemoval {
    pub object: EntityId,
    /// Defaults to a temporary removal when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<bool>,
}

impl ReplicaRemoval {
    pub fn is_temporary(&self) -> bool {
        self.temporary.unwrap_or(true)
    }
}

/// Structural change to a replicated tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityUpdate {
    pub index: TreeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexProperties>,
    #[serde(default)]
    pub additions: Vec<ReplicaAddition>,
    #[serde(default)]
    pub removals: Vec<ReplicaRemoval>,
}

/// Property change for one object, applying to every listed tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub object: EntityId,
    #[serde(default)]
    pub index_ids: Vec<TreeId>,
    pub seqno: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<TimedMotionVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<TimedMotionQuaternion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<AggregateBounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physics: Option<String>,
}

/// Any message the replication client accepts from a remote index owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicationMessage {
    Proximity(ProximityUpdate),
    Location(LocationUpdate),
}
