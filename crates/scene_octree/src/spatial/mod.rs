//! Spatial partitioning data structures
//!
//! An [`Octree`] indexes scene entities by their world-space bounding box and
//! follows them as they move or die. It never owns the entities: it stores
//! [`EntityId`]s and resolves them against the [`SceneGraph`](crate::scene::SceneGraph)
//! passed to each operation.

mod lock;
mod node;
mod octree;
mod query;

#[cfg(test)]
mod tests;

pub use lock::{MutationGuard, TraversalLock, WindowGuard};
pub use node::{BlockKey, Entry, EntryHandle, NodeId, OctreeNode};
pub use octree::{ErasureStatus, Octree, OctreeConfig};
pub use query::Query;

use crate::scene::{EntityId, SceneError, AABB};

/// Spatial index errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SpatialError {
    /// The handle does not name a live entity
    #[error("entity {0:?} does not exist")]
    StaleEntity(EntityId),

    /// The entity is already stored in this octree
    #[error("entity {0:?} is already indexed")]
    AlreadyIndexed(EntityId),

    /// The entity's bounding box does not fit the world bounds
    #[error("entity {entity:?} with bounds {aabb:?} lies outside the world bounds {bounds:?}")]
    OutOfBounds {
        /// Rejected entity
        entity: EntityId,
        /// Its global bounding box
        aabb: AABB,
        /// World bounds of the octree
        bounds: AABB,
    },

    /// Entities moved outside the world bounds and were dropped from the index
    #[error("{} entities moved outside the world bounds and were evicted", entities.len())]
    WorldBoundsExceeded {
        /// Evicted entities, in the order their moves were processed
        entities: Vec<EntityId>,
    },

    /// Octree configuration rejected
    #[error("invalid octree configuration: {0}")]
    InvalidConfig(String),

    /// The node handle does not name a live node
    #[error("node {0:?} does not exist")]
    InvalidNode(NodeId),

    /// Scene graph operation failed
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),
}
