//! Entity arena and hierarchy
//!
//! The [`SceneGraph`] owns every [`Entity`]. Parents refer to children and
//! children to parents by [`EntityId`] only, so the tree carries no reference
//! cycles and a dangling handle is detected by an O(1) arena lookup.
//!
//! Every local transform change recomputes the global transform of the entity
//! and of its whole subtree, then queues [`EntityEvent::TransformChanged`] for
//! each entity in that subtree.

use super::aabb::AABB;
use super::entity::{Entity, EntityId};
use super::events::{EntityEvent, EventHub, ListenerId, SceneEvent, Subscription, SubscriptionToken};
use crate::foundation::math::{Mat4, Quat, Transform, Vec3, Vec4};
use crossbeam_channel::Receiver;
use slotmap::SlotMap;

/// Errors raised by scene graph operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The handle does not name a live entity
    #[error("entity {0:?} does not exist")]
    StaleEntity(EntityId),

    /// `remove_child` was called with an entity that is not a child
    #[error("entity {child:?} is not a child of {parent:?}")]
    NotAChild {
        /// Supposed parent
        parent: EntityId,
        /// Supposed child
        child: EntityId,
    },

    /// Attaching would make an entity its own ancestor
    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    WouldCreateCycle {
        /// Requested parent
        parent: EntityId,
        /// Requested child
        child: EntityId,
    },

    /// An entity cannot be its own parent
    #[error("entity {0:?} cannot be its own parent")]
    SelfParent(EntityId),

    /// The listener is not registered with this scene
    #[error("listener {0:?} is not registered")]
    UnknownListener(ListenerId),
}

/// Arena-backed entity tree
#[derive(Debug, Default)]
pub struct SceneGraph {
    entities: SlotMap<EntityId, Entity>,
    events: EventHub,
}

impl SceneGraph {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a root entity with the given local transform
    pub fn create(&mut self, local: Transform) -> EntityId {
        self.entities.insert(Entity::new(None, local))
    }

    /// Create a named root entity with the given local transform
    pub fn create_named(&mut self, name: impl Into<String>, local: Transform) -> EntityId {
        self.entities.insert(Entity::new(Some(name.into()), local))
    }

    /// Destroy one entity.
    ///
    /// Subscribers receive [`SceneEvent::AboutToDie`] first. Each child then
    /// becomes a root whose new local transform is its former global
    /// transform, so the subtree keeps its world placement. Finally the entity
    /// leaves its parent and its slot and subscriptions are released.
    pub fn destroy(&mut self, id: EntityId) -> Result<(), SceneError> {
        self.notify(id, EntityEvent::AboutToDie)?;

        let children = std::mem::take(&mut self.entity_mut(id)?.children);
        for child in children {
            if let Some(child) = self.entities.get_mut(child) {
                child.local = Transform::from_matrix(&child.global);
                child.parent = None;
            }
        }

        self.detach_from_parent(id);
        self.release(id);
        log::trace!("Destroyed entity {id:?}");
        Ok(())
    }

    /// Destroy an entity together with its whole subtree.
    ///
    /// Every entity in the subtree receives [`SceneEvent::AboutToDie`] in
    /// pre-order before any slot is released.
    pub fn destroy_recursive(&mut self, id: EntityId) -> Result<usize, SceneError> {
        let subtree = self.subtree(id)?;
        for &entity in &subtree {
            self.notify(entity, EntityEvent::AboutToDie)?;
        }

        self.detach_from_parent(id);
        for &entity in &subtree {
            self.release(entity);
        }
        log::trace!("Destroyed subtree of {id:?} ({} entities)", subtree.len());
        Ok(subtree.len())
    }

    fn release(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.remove(id) {
            for token in entity.subscriptions {
                self.events.unsubscribe(token);
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Look up an entity
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Whether the handle names a live entity
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the scene holds no entities
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All live entities in arena order
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    /// Entities without a parent
    pub fn roots(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.is_root())
            .map(|(id, _)| id)
    }

    /// Parent of an entity
    pub fn parent(&self, id: EntityId) -> Result<Option<EntityId>, SceneError> {
        Ok(self.entity(id)?.parent)
    }

    /// Children of an entity in insertion order
    pub fn children(&self, id: EntityId) -> Result<&[EntityId], SceneError> {
        Ok(&self.entity(id)?.children)
    }

    /// Local SQT transform of an entity
    pub fn local_transform(&self, id: EntityId) -> Result<&Transform, SceneError> {
        Ok(&self.entity(id)?.local)
    }

    /// Model-to-world matrix of an entity
    pub fn global_transform(&self, id: EntityId) -> Result<&Mat4, SceneError> {
        Ok(&self.entity(id)?.global)
    }

    /// World-space bounding box of an entity
    pub fn global_bounding_box(&self, id: EntityId) -> Result<AABB, SceneError> {
        Ok(self.entity(id)?.global_bounding_box())
    }

    /// View matrix looking along the entity's global forward (-Z) axis
    pub fn view_matrix(&self, id: EntityId) -> Result<Mat4, SceneError> {
        let global = &self.entity(id)?.global;
        let right = (global * Vec4::new(1.0, 0.0, 0.0, 0.0)).xyz();
        let up = (global * Vec4::new(0.0, 1.0, 0.0, 0.0)).xyz();
        let forward = (global * Vec4::new(0.0, 0.0, -1.0, 0.0)).xyz();
        let eye = (global * Vec4::new(0.0, 0.0, 0.0, 1.0)).xyz();

        #[rustfmt::skip]
        let view = Mat4::new(
            right.x, right.y, right.z, -right.dot(&eye),
            up.x, up.y, up.z, -up.dot(&eye),
            -forward.x, -forward.y, -forward.z, forward.dot(&eye),
            0.0, 0.0, 0.0, 1.0,
        );
        Ok(view)
    }

    /// The entity and all its descendants in pre-order
    pub fn subtree(&self, id: EntityId) -> Result<Vec<EntityId>, SceneError> {
        self.entity(id)?;
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(entity) = self.entities.get(current) {
                stack.extend(entity.children.iter().rev().copied());
            }
        }
        Ok(order)
    }

    fn entity(&self, id: EntityId) -> Result<&Entity, SceneError> {
        self.entities.get(id).ok_or(SceneError::StaleEntity(id))
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, SceneError> {
        self.entities.get_mut(id).ok_or(SceneError::StaleEntity(id))
    }

    // ------------------------------------------------------------------
    // Local transform mutators
    // ------------------------------------------------------------------

    /// Replace the local scale
    pub fn set_scale(&mut self, id: EntityId, scale: Vec3) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.scale = scale)
    }

    /// Multiply the local scale component-wise
    pub fn multiply_scale(&mut self, id: EntityId, scale: Vec3) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.scale.component_mul_assign(&scale))
    }

    /// Replace the local translation
    pub fn set_translation(&mut self, id: EntityId, translation: Vec3) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation = translation)
    }

    /// Replace the X coordinate of the local translation
    pub fn set_translation_x(&mut self, id: EntityId, x: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation.x = x)
    }

    /// Replace the Y coordinate of the local translation
    pub fn set_translation_y(&mut self, id: EntityId, y: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation.y = y)
    }

    /// Replace the Z coordinate of the local translation
    pub fn set_translation_z(&mut self, id: EntityId, z: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation.z = z)
    }

    /// Add to the local translation
    pub fn add_translation(&mut self, id: EntityId, offset: Vec3) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation += offset)
    }

    /// Replace the local rotation
    pub fn set_rotation(&mut self, id: EntityId, rotation: Quat) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.rotation = rotation)
    }

    /// Post-multiply the local rotation (`local * rotation`)
    pub fn post_multiply_rotation(&mut self, id: EntityId, rotation: Quat) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.rotation *= rotation)
    }

    /// Pre-multiply the local rotation (`rotation * local`)
    pub fn pre_multiply_rotation(&mut self, id: EntityId, rotation: Quat) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.rotation = rotation * local.rotation)
    }

    /// Replace the whole local transform
    pub fn set_local_transform(&mut self, id: EntityId, transform: Transform) -> Result<(), SceneError> {
        self.modify_local(id, |local| *local = transform)
    }

    /// Compose `transform` after the local transform (`local.combine(transform)`).
    ///
    /// With non-uniform local scale and a rotating `transform` the result is
    /// approximate; see [`Transform::combine`].
    pub fn post_add_local_transform(&mut self, id: EntityId, transform: &Transform) -> Result<(), SceneError> {
        self.modify_local(id, |local| *local = local.combine(transform))
    }

    /// Compose `transform` before the local transform (`transform.combine(local)`).
    ///
    /// Approximate when `transform` has non-uniform scale and the local
    /// rotation is not the identity.
    pub fn pre_add_local_transform(&mut self, id: EntityId, transform: &Transform) -> Result<(), SceneError> {
        self.modify_local(id, |local| *local = transform.combine(local))
    }

    /// Translate along the local forward (-Z) direction
    pub fn move_forward(&mut self, id: EntityId, amount: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation += local.forward() * amount)
    }

    /// Translate against the local forward direction
    pub fn move_backward(&mut self, id: EntityId, amount: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation -= local.forward() * amount)
    }

    /// Translate along the local right (+X) direction
    pub fn move_right(&mut self, id: EntityId, amount: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation += local.right() * amount)
    }

    /// Translate against the local right direction
    pub fn move_left(&mut self, id: EntityId, amount: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation -= local.right() * amount)
    }

    /// Translate along the local up (+Y) direction
    pub fn move_up(&mut self, id: EntityId, amount: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation += local.up() * amount)
    }

    /// Translate against the local up direction
    pub fn move_down(&mut self, id: EntityId, amount: f32) -> Result<(), SceneError> {
        self.modify_local(id, |local| local.translation -= local.up() * amount)
    }

    /// Replace the model-space bounding box supplied by the mesh collaborator.
    ///
    /// The global bounding box changes with it, so subscribers are told the
    /// transform changed. Descendants are unaffected.
    pub fn set_local_bounds(&mut self, id: EntityId, bounds: Option<AABB>) -> Result<(), SceneError> {
        self.entity_mut(id)?.local_bounds = bounds;
        self.notify(id, EntityEvent::TransformChanged)
    }

    fn modify_local(&mut self, id: EntityId, update: impl FnOnce(&mut Transform)) -> Result<(), SceneError> {
        update(&mut self.entity_mut(id)?.local);
        self.propagate(id);
        Ok(())
    }

    /// Recompute global transforms of `id`'s subtree and notify each entity.
    fn propagate(&mut self, id: EntityId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let parent_global = self
                .entities
                .get(current)
                .and_then(|entity| entity.parent)
                .and_then(|parent| self.entities.get(parent))
                .map_or_else(Mat4::identity, |parent| parent.global);

            let Some(entity) = self.entities.get_mut(current) else {
                continue;
            };
            entity.global = parent_global * entity.local.to_matrix();
            stack.extend(entity.children.iter().rev().copied());

            // `current` was resolved above.
            let _ = self.notify(current, EntityEvent::TransformChanged);
        }
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Attach `child` as the last child of `parent`.
    ///
    /// A child that already has a parent is detached from it first. The
    /// child keeps its local transform, so its world placement follows the
    /// new parent.
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) -> Result<(), SceneError> {
        if parent == child {
            return Err(SceneError::SelfParent(child));
        }
        self.entity(child)?;
        self.entity(parent)?;
        if self.is_ancestor(child, parent) {
            return Err(SceneError::WouldCreateCycle { parent, child });
        }

        self.detach_from_parent(child);
        self.entity_mut(parent)?.children.push(child);
        self.entity_mut(child)?.parent = Some(parent);
        self.propagate(child);
        Ok(())
    }

    /// Detach `child` from `parent`; the child becomes a root
    pub fn remove_child(&mut self, parent: EntityId, child: EntityId) -> Result<(), SceneError> {
        let children = &mut self.entity_mut(parent)?.children;
        let position = children
            .iter()
            .position(|&c| c == child)
            .ok_or(SceneError::NotAChild { parent, child })?;
        children.remove(position);

        if let Some(entity) = self.entities.get_mut(child) {
            entity.parent = None;
        }
        self.propagate(child);
        Ok(())
    }

    /// Make `parent` the parent of `child`
    pub fn set_parent(&mut self, child: EntityId, parent: EntityId) -> Result<(), SceneError> {
        self.add_child(parent, child)
    }

    /// Make `child` a root; no-op for an entity that already is one
    pub fn unset_parent(&mut self, child: EntityId) -> Result<(), SceneError> {
        match self.entity(child)?.parent {
            Some(parent) => self.remove_child(parent, child),
            None => Ok(()),
        }
    }

    /// Whether `ancestor` is `id` or one of its ancestors
    pub fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.entities.get(node).and_then(|entity| entity.parent);
        }
        false
    }

    fn detach_from_parent(&mut self, child: EntityId) {
        let Some(parent) = self.entities.get_mut(child).and_then(|entity| entity.parent.take()) else {
            return;
        };
        if let Some(parent) = self.entities.get_mut(parent) {
            parent.children.retain(|&c| c != child);
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Register an event receiver
    pub fn register_listener(&mut self) -> (ListenerId, Receiver<SceneEvent>) {
        self.events.register_listener()
    }

    /// Remove a listener and all of its subscriptions
    pub fn unregister_listener(&mut self, listener: ListenerId) -> bool {
        self.events.unregister_listener(listener)
    }

    /// Subscribe `listener` to `event` of entity `id`
    pub fn subscribe(
        &mut self,
        id: EntityId,
        event: EntityEvent,
        listener: ListenerId,
    ) -> Result<SubscriptionToken, SceneError> {
        if !self.events.has_listener(listener) {
            return Err(SceneError::UnknownListener(listener));
        }
        let entity = self.entities.get_mut(id).ok_or(SceneError::StaleEntity(id))?;
        let token = self.events.subscribe(Subscription { entity: id, event, listener });
        entity.subscriptions.push(token);
        Ok(token)
    }

    /// Cancel a subscription.
    ///
    /// Returns `false` if the token was already cancelled, for example
    /// because its entity died.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let Some(subscription) = self.events.unsubscribe(token) else {
            return false;
        };
        if let Some(entity) = self.entities.get_mut(subscription.entity) {
            entity.subscriptions.retain(|&t| t != token);
        }
        true
    }

    /// Whether a subscription is still live
    pub fn is_subscribed(&self, token: SubscriptionToken) -> bool {
        self.events.is_subscribed(token)
    }

    fn notify(&mut self, id: EntityId, event: EntityEvent) -> Result<(), SceneError> {
        let entity = self.entities.get_mut(id).ok_or(SceneError::StaleEntity(id))?;
        self.events.dispatch(&mut entity.subscriptions, event, id);
        Ok(())
    }
}
