//! Scene graph
//!
//! Entities form a parent/child tree owned by a [`SceneGraph`] arena.
//!
//! ## Architecture
//!
//! ```text
//! SceneGraph (owns entities, computes global transforms)
//!      ↓ SceneEvent over channels
//! Listeners (e.g. the Octree spatial index)
//! ```
//!
//! The graph:
//! - Keeps `global = parent.global * local` for every entity
//! - Bakes world placement into children when their parent dies
//! - Queues change and destruction notifications for subscribed listeners

mod aabb;
mod entity;
mod events;
mod graph;
mod visitor;

pub use aabb::AABB;
pub use entity::{Entity, EntityId};
pub use events::{EntityEvent, ListenerId, SceneEvent, SubscriptionToken};
pub use graph::{SceneError, SceneGraph};
pub use visitor::{walk, EntityVisitor};
