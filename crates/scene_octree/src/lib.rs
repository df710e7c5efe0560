//! # Scene Octree
//!
//! A dynamic octree index over a mutable entity scene graph.
//!
//! ## Features
//!
//! - **Scene Graph**: Arena-owned entity tree with SQT local transforms
//! - **Octree Index**: Lazy subdivision, back-recursive reinsertion, block-granular merge
//! - **Deferred Notifications**: Moves and deaths are queued, never called back mid-traversal
//! - **Configuration**: TOML/RON loading with validation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scene_octree::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scene = SceneGraph::new();
//!     let mut octree = Octree::new(&mut scene, OctreeConfig::default())?;
//!
//!     let ship = scene.create_named("ship", Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)));
//!     octree.insert(&mut scene, ship)?;
//!
//!     // The octree picks up the move on its next operation.
//!     scene.move_forward(ship, 5.0)?;
//!
//!     let area = AABB::from_center_extents(Vec3::new(10.0, 0.0, -5.0), Vec3::new(1.0, 1.0, 1.0));
//!     let nearby: Vec<EntityId> = octree.query(&mut scene, area)?.collect();
//!     assert_eq!(nearby, vec![ship]);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod scene;
pub mod spatial;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        foundation::math::{Mat4, Quat, Transform, Vec3},
        scene::{
            walk, Entity, EntityEvent, EntityId, EntityVisitor, SceneError, SceneEvent, SceneGraph, AABB,
        },
        spatial::{ErasureStatus, NodeId, Octree, OctreeConfig, Query, SpatialError, TraversalLock},
    };
}
