//! # Core Type Definitions
//!
//! Identifiers and geometry shared by the proximity coordinator and the
//! replication client.
//!
//! ## Key Types
//!
//! - [`EntityId`] - Unique identifier for any trackable entity (object or aggregate node)
//! - [`ServerId`] - Identifier for a cooperating server
//! - [`TreeId`] - Identifier for a remote index replicated locally
//! - [`TimedMotionVector`] - Time-stamped position and velocity
//! - [`BoundingSphere`] / [`AggregateBounds`] - Entity extents
//! - [`SolidAngle`] - Precision threshold for queries
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types prevent ID confusion (EntityId vs ServerId vs TreeId)
//! - **Precision**: Double-precision floats for accurate large-world positioning
//! - **Serialization**: All types support JSON serialization for network transmission

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f64::consts::PI;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an entity tracked by the proximity system.
///
/// Entities are either real objects or aggregate nodes of a remote index.
/// This is a wrapper around UUID so entity ids cannot be confused with
/// server or tree ids.
///
/// # Examples
///
/// ```rust
/// use horizon_proximity::EntityId;
///
/// let entity = EntityId::new();
/// let parsed = EntityId::from_str("550e8400-e29b-41d4-a716-446655440000")?;
/// println!("Entity: {}", parsed);
/// # let _ = entity;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Creates a new random entity ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil entity, used as "no parent".
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns true for the nil entity.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parses an entity ID from a string representation.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a cooperating server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub u32);

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server-{}", self.0)
    }
}

/// Identifier for a remote spatial index ("tree") mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeId(pub u32);

impl std::fmt::Display for TreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tree-{}", self.0)
    }
}

/// A node within a specific replicated tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexNode {
    pub tree: TreeId,
    pub node: EntityId,
}

impl IndexNode {
    pub fn new(tree: TreeId, node: EntityId) -> Self {
        Self { tree, node }
    }
}

/// Owner of a standing query: either a peer server or a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subscriber {
    Server(ServerId),
    Object(EntityId),
}

impl std::fmt::Display for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subscriber::Server(id) => write!(f, "{}", id),
            Subscriber::Object(id) => write!(f, "object-{}", id),
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// A 3D vector with double-precision components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Creates a zero vector (0, 0, 0).
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Euclidean length.
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Calculates the distance to another Vec3.
    pub fn distance(&self, other: Vec3) -> f64 {
        (*self - other).length()
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Orientation quaternion. Used for both orientation and angular velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position plus velocity, valid as of timestamp `t` (milliseconds).
///
/// The proximity layer extrapolates linearly between updates when it
/// evaluates queries; it never rewrites the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedMotionVector {
    pub t: u64,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl TimedMotionVector {
    pub fn new(t: u64, position: Vec3, velocity: Vec3) -> Self {
        Self { t, position, velocity }
    }

    /// A non-moving entity at `position`.
    pub fn stationary(t: u64, position: Vec3) -> Self {
        Self::new(t, position, Vec3::zero())
    }

    /// Position at time `at`. Times before `t` are clamped to `t`.
    pub fn extrapolate(&self, at: u64) -> Vec3 {
        let dt = at.saturating_sub(self.t) as f64 / 1000.0;
        self.position + self.velocity.scale(dt)
    }
}

impl Default for TimedMotionVector {
    fn default() -> Self {
        Self::stationary(0, Vec3::zero())
    }
}

/// Orientation plus angular velocity, valid as of timestamp `t`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimedMotionQuaternion {
    pub t: u64,
    pub position: Quaternion,
    pub velocity: Quaternion,
}

impl TimedMotionQuaternion {
    pub fn new(t: u64, position: Quaternion, velocity: Quaternion) -> Self {
        Self { t, position, velocity }
    }
}

/// Sphere relative to an entity's location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Sphere of `radius` centered on the entity.
    pub fn centered(radius: f64) -> Self {
        Self::new(Vec3::zero(), radius)
    }

    /// Smallest sphere containing both `self` and `other`.
    pub fn merge(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let distance = offset.length();
        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }
        let radius = (distance + self.radius + other.radius) / 2.0;
        let center = self.center + offset.scale((radius - self.radius) / distance);
        BoundingSphere::new(center, radius)
    }
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self::centered(0.0)
    }
}

/// Bounds of an entity that may aggregate children.
///
/// `center_bounds_radius` covers the centers of all children and
/// `max_object_size` is the largest child radius, so the full extent is
/// their sum. For a plain object the center radius is zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateBounds {
    pub center_offset: Vec3,
    pub center_bounds_radius: f64,
    pub max_object_size: f64,
}

impl AggregateBounds {
    pub fn new(center_offset: Vec3, center_bounds_radius: f64, max_object_size: f64) -> Self {
        Self {
            center_offset,
            center_bounds_radius,
            max_object_size,
        }
    }

    /// Bounds of a single, non-aggregate object.
    pub fn object(radius: f64) -> Self {
        Self::new(Vec3::zero(), 0.0, radius)
    }

    pub fn full_radius(&self) -> f64 {
        self.center_bounds_radius + self.max_object_size
    }

    pub fn full_bounds(&self) -> BoundingSphere {
        BoundingSphere::new(self.center_offset, self.full_radius())
    }
}

impl From<BoundingSphere> for AggregateBounds {
    fn from(sphere: BoundingSphere) -> Self {
        Self::new(sphere.center, 0.0, sphere.radius)
    }
}

/// Axis-aligned bounds of a region owned by a server.
///
/// # Examples
///
/// ```rust
/// use horizon_proximity::RegionBounds;
///
/// let region_bounds = RegionBounds {
///     min_x: -500.0, max_x: 500.0,
///     min_y: 0.0, max_y: 128.0,
///     min_z: -500.0, max_z: 500.0,
/// };
/// let sphere = region_bounds.bounding_sphere();
/// assert!(sphere.radius > 500.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl RegionBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min_x: min.x,
            max_x: max.x,
            min_y: min.y,
            max_y: max.y,
            min_z: min.z,
            max_z: max.z,
        }
    }

    pub fn min(&self) -> Vec3 {
        Vec3::new(self.min_x, self.min_y, self.min_z)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::new(self.max_x, self.max_y, self.max_z)
    }

    pub fn center(&self) -> Vec3 {
        (self.min() + self.max()).scale(0.5)
    }

    /// Smallest box containing both regions.
    pub fn merge(&self, other: &RegionBounds) -> RegionBounds {
        RegionBounds {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
            min_z: self.min_z.min(other.min_z),
            max_z: self.max_z.max(other.max_z),
        }
    }

    /// Sphere through the box corners, centered on the box.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        let center = self.center();
        BoundingSphere::new(center, center.distance(self.max()))
    }
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self {
            min_x: -1000.0,
            max_x: 1000.0,
            min_y: -1000.0,
            max_y: 1000.0,
            min_z: -100.0,
            max_z: 100.0,
        }
    }
}

// ============================================================================
// Solid angle
// ============================================================================

/// Angular precision threshold, in steradians.
///
/// Smaller angles select smaller or more distant entities and are more
/// expensive to evaluate. [`SolidAngle::MAX`] is the whole sphere and acts
/// as "no threshold": only entities engulfing the viewer satisfy it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolidAngle(f64);

impl SolidAngle {
    pub const MIN: SolidAngle = SolidAngle(0.0);
    pub const MAX: SolidAngle = SolidAngle(4.0 * PI);

    /// Creates an angle, clamped to `[0, 4π]`. NaN maps to `MAX`.
    pub fn new(steradians: f64) -> Self {
        if steradians.is_nan() {
            return Self::MAX;
        }
        Self(steradians.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Angle subtended by a sphere of `radius` whose center is `distance` away.
    pub fn subtended(distance: f64, radius: f64) -> Self {
        if distance <= radius {
            return Self::MAX;
        }
        let sin_half = (radius / distance).clamp(0.0, 1.0);
        let cos_half = (1.0 - sin_half * sin_half).sqrt();
        Self::new(2.0 * PI * (1.0 - cos_half))
    }

    /// Largest center distance at which a sphere of `radius` still subtends
    /// at least this angle.
    pub fn max_distance(&self, radius: f64) -> f64 {
        if self.0 <= 0.0 {
            return f64::INFINITY;
        }
        if self.0 >= 2.0 * PI {
            return radius;
        }
        let cos_half = 1.0 - self.0 / (2.0 * PI);
        let sin_half = (1.0 - cos_half * cos_half).sqrt();
        radius / sin_half
    }
}

impl PartialEq for SolidAngle {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SolidAngle {}

impl PartialOrd for SolidAngle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SolidAngle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for SolidAngle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}sr", self.0)
    }
}
