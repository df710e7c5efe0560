//! Scene entity data
//!
//! An [`Entity`] lives inside a [`SceneGraph`](super::SceneGraph) arena and is
//! addressed by its [`EntityId`]. All mutation goes through the graph so that
//! global transforms and notifications stay consistent.

use super::aabb::AABB;
use super::events::SubscriptionToken;
use crate::foundation::math::{Mat4, Transform, Vec3};

slotmap::new_key_type! {
    /// Stable handle of an entity in a [`SceneGraph`](super::SceneGraph).
    ///
    /// Handles compare by identity. A handle whose entity was destroyed never
    /// resolves again, even if the slot is reused.
    pub struct EntityId;
}

/// Node of the entity tree
#[derive(Debug, Clone)]
pub struct Entity {
    pub(super) name: Option<String>,
    pub(super) local: Transform,
    pub(super) global: Mat4,
    pub(super) local_bounds: Option<AABB>,
    pub(super) parent: Option<EntityId>,
    pub(super) children: Vec<EntityId>,
    pub(super) subscriptions: Vec<SubscriptionToken>,
}

impl Entity {
    pub(super) fn new(name: Option<String>, local: Transform) -> Self {
        Self {
            name,
            global: local.to_matrix(),
            local,
            local_bounds: None,
            parent: None,
            children: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Optional debug name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Transform relative to the parent
    pub const fn local_transform(&self) -> &Transform {
        &self.local
    }

    /// Model-to-world matrix
    pub const fn global_transform(&self) -> &Mat4 {
        &self.global
    }

    /// World-space position (translation column of the global matrix)
    pub fn global_position(&self) -> Vec3 {
        Vec3::new(self.global.m14, self.global.m24, self.global.m34)
    }

    /// Bounding box in model space, supplied by the mesh collaborator
    pub const fn local_bounds(&self) -> Option<&AABB> {
        self.local_bounds.as_ref()
    }

    /// World-space bounding box.
    ///
    /// Without local bounds the entity is a point at its global position.
    pub fn global_bounding_box(&self) -> AABB {
        match &self.local_bounds {
            Some(bounds) => bounds.transformed(&self.global),
            None => AABB::point(self.global_position()),
        }
    }

    /// Parent entity, `None` for roots
    pub const fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    /// Whether the entity has no parent
    pub const fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
