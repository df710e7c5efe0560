//! Octree spatial partitioning structure
//!
//! Divides the world bounds into hierarchical regions for fast volume queries.
//! A leaf is split into 8 octants lazily, the first time something is inserted
//! into it, as long as its half-extent exceeds the subdivision threshold. An
//! entity is stored in the deepest node that fully contains its global
//! bounding box, so large entities stay high in the tree. Once all 8 children
//! of a node are empty leaves the whole block is freed again.
//!
//! The octree subscribes to every entity it stores. Moves and deaths are
//! queued by the [`SceneGraph`] and applied at the start of the next octree
//! operation, or explicitly with [`Octree::sync`].

use super::node::{Block, BlockKey, Entry, EntryHandle, NodeId, OctreeNode};
use super::query::Query;
use super::SpatialError;
use crate::config::{Config, ConfigError};
use crate::scene::{EntityEvent, EntityId, ListenerId, SceneEvent, SceneGraph, AABB};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};

/// Configuration for octree behavior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Region covered by the root node
    pub world_bounds: AABB,

    /// Nodes whose half-extent on any axis is at or below this value are
    /// never subdivided
    pub subdivision_threshold: f32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            world_bounds: AABB::cube(128.0),
            subdivision_threshold: 1.0,
        }
    }
}

impl Config for OctreeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let size = self.world_bounds.max - self.world_bounds.min;
        if !size.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "world bounds must have positive finite size, got {:?}",
                self.world_bounds
            )));
        }
        if !(self.subdivision_threshold.is_finite() && self.subdivision_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "subdivision threshold must be positive, got {}",
                self.subdivision_threshold
            )));
        }
        Ok(())
    }
}

/// Outcome of removing an entity from the octree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErasureStatus {
    /// The entity was not stored where it was looked for
    NotPresent,
    /// The entry was removed; no block was freed
    Removed,
    /// The entry was removed and at least one block was freed.
    RemovedAndMerged {
        /// Highest node that became a leaf again
        highest: NodeId,
    },
}

/// Octree spatial partitioning structure
#[derive(Debug)]
pub struct Octree {
    root: OctreeNode,
    blocks: SlotMap<BlockKey, Block>,
    locations: SecondaryMap<EntityId, EntryHandle>,
    listener: ListenerId,
    events: Receiver<SceneEvent>,
    evicted: Vec<EntityId>,
    config: OctreeConfig,
}

impl Octree {
    /// Create an empty octree over `config.world_bounds` and register it as a
    /// listener of `scene`.
    ///
    /// The octree must always be used with the scene it was created for.
    pub fn new(scene: &mut SceneGraph, config: OctreeConfig) -> Result<Self, SpatialError> {
        config
            .validate()
            .map_err(|e| SpatialError::InvalidConfig(e.to_string()))?;

        let (listener, events) = scene.register_listener();
        log::debug!(
            "Created octree over {:?} with subdivision threshold {}",
            config.world_bounds,
            config.subdivision_threshold
        );

        Ok(Self {
            root: OctreeNode::new(config.world_bounds, 0, None),
            blocks: SlotMap::with_key(),
            locations: SecondaryMap::new(),
            listener,
            events,
            evicted: Vec::new(),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Read-only accessors (state as of the last drain)
    // ------------------------------------------------------------------

    /// Configuration the octree was built with
    pub const fn config(&self) -> &OctreeConfig {
        &self.config
    }

    /// Listener the octree receives scene events on
    pub const fn listener(&self) -> ListenerId {
        self.listener
    }

    /// The root node
    pub const fn root(&self) -> &OctreeNode {
        &self.root
    }

    /// World bounds covered by the root
    pub const fn bounds(&self) -> &AABB {
        &self.root.bounds
    }

    /// Whether the root has no children
    pub const fn is_leaf(&self) -> bool {
        self.root.is_leaf()
    }

    /// Look up a node; `None` once its block has been freed
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        match id {
            NodeId::Root => Some(&self.root),
            NodeId::Child { block, octant } => self
                .blocks
                .get(block)
                .and_then(|b| b.nodes.get(usize::from(octant))),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut OctreeNode> {
        match id {
            NodeId::Root => Some(&mut self.root),
            NodeId::Child { block, octant } => self
                .blocks
                .get_mut(block)
                .and_then(|b| b.nodes.get_mut(usize::from(octant))),
        }
    }

    fn node_checked(&self, id: NodeId) -> Result<&OctreeNode, SpatialError> {
        self.node(id).ok_or(SpatialError::InvalidNode(id))
    }

    fn node_checked_mut(&mut self, id: NodeId) -> Result<&mut OctreeNode, SpatialError> {
        self.node_mut(id).ok_or(SpatialError::InvalidNode(id))
    }

    /// Total number of live nodes, root included
    pub fn node_count(&self) -> usize {
        1 + self.blocks.len() * 8
    }

    /// Where the entity's entry currently lives
    pub fn location(&self, entity: EntityId) -> Option<EntryHandle> {
        self.locations.get(entity).copied()
    }

    /// Whether the entity is stored in the octree
    pub fn contains(&self, entity: EntityId) -> bool {
        self.locations.contains_key(entity)
    }

    /// Number of entries stored in the subtree of `id`
    pub fn subtree_count(&self, id: NodeId) -> Result<usize, SpatialError> {
        let mut total = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node_checked(current)?;
            total += node.entries.len();
            stack.extend(node.child_ids().into_iter().flatten());
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Event drain
    // ------------------------------------------------------------------

    /// Apply every queued move and death notification, then report the
    /// entities evicted since the last report.
    ///
    /// Entities whose new bounding box no longer fits the world bounds are
    /// evicted. Every other public operation taking a scene applies the
    /// queue too but keeps the evictions pending, so they surface here or
    /// through [`take_evicted`](Self::take_evicted).
    pub fn sync(&mut self, scene: &mut SceneGraph) -> Result<(), SpatialError> {
        self.drain(scene)?;

        if self.evicted.is_empty() {
            Ok(())
        } else {
            Err(SpatialError::WorldBoundsExceeded {
                entities: self.take_evicted(),
            })
        }
    }

    /// Entities evicted for leaving the world bounds that have not been
    /// reported yet, in the order their moves were processed
    pub fn take_evicted(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.evicted)
    }

    fn drain(&mut self, scene: &mut SceneGraph) -> Result<(), SpatialError> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SceneEvent::TransformChanged(entity) => {
                    if let Some(entry) = self.relocate(scene, entity)? {
                        scene.unsubscribe(entry.on_transform);
                        scene.unsubscribe(entry.on_destroy);
                        log::warn!("Entity {entity:?} left the world bounds and was evicted");
                        self.evicted.push(entity);
                    }
                }
                SceneEvent::AboutToDie(entity) => {
                    self.erase_entry(scene, entity)?;
                }
            }
        }
        Ok(())
    }

    /// Move an entity's entry to the node matching its current bounding box.
    ///
    /// Returns the entry when not even the root contains the new box.
    fn relocate(&mut self, scene: &SceneGraph, entity: EntityId) -> Result<Option<Entry>, SpatialError> {
        // A dead entity is removed by its AboutToDie event.
        let Some(aabb) = scene.get(entity).map(|e| e.global_bounding_box()) else {
            return Ok(None);
        };
        let Some((old_node, entry)) = self.remove_entry(entity)? else {
            return Ok(None);
        };

        let mut target = Some(old_node);
        while let Some(id) = target {
            let node = self.node_checked(id)?;
            if node.bounds.contains(&aabb) {
                break;
            }
            target = node.parent;
        }

        let evicted = match target {
            Some(id) => {
                let node = self.insert_at(id, &aabb, entry)?;
                log::trace!("Moved entity {entity:?} from {old_node:?} to {node:?}");
                None
            }
            None => Some(entry),
        };
        self.merge_from(old_node)?;
        Ok(evicted)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Insert an entity and subscribe to its moves and death.
    ///
    /// Returns the node now holding the entity.
    pub fn insert(&mut self, scene: &mut SceneGraph, entity: EntityId) -> Result<NodeId, SpatialError> {
        self.drain(scene)?;

        let aabb = scene
            .global_bounding_box(entity)
            .map_err(|_| SpatialError::StaleEntity(entity))?;
        if self.locations.contains_key(entity) {
            return Err(SpatialError::AlreadyIndexed(entity));
        }
        if !self.root.bounds.contains(&aabb) {
            return Err(SpatialError::OutOfBounds {
                entity,
                aabb,
                bounds: self.root.bounds,
            });
        }

        let on_transform = scene.subscribe(entity, EntityEvent::TransformChanged, self.listener)?;
        let on_destroy = match scene.subscribe(entity, EntityEvent::AboutToDie, self.listener) {
            Ok(token) => token,
            Err(e) => {
                scene.unsubscribe(on_transform);
                return Err(e.into());
            }
        };

        let entry = Entry {
            entity,
            on_transform,
            on_destroy,
        };
        let node = self.insert_at(NodeId::Root, &aabb, entry)?;
        log::trace!("Inserted entity {entity:?} into {node:?}");
        Ok(node)
    }

    /// Store `entry` in the deepest node below `id` containing `aabb`.
    ///
    /// `id` must contain `aabb`.
    fn insert_at(&mut self, id: NodeId, aabb: &AABB, entry: Entry) -> Result<NodeId, SpatialError> {
        self.subdivide(id)?;

        if let Some(children) = self.node_checked(id)?.child_ids() {
            for child in children {
                if self.node_checked(child)?.bounds.contains(aabb) {
                    return self.insert_at(child, aabb, entry);
                }
            }
        }

        let node = self.node_checked_mut(id)?;
        let index = node.entries.len();
        node.entries.push(entry);
        self.locations.insert(
            entry.entity,
            EntryHandle {
                entity: entry.entity,
                node: id,
                index,
            },
        );
        Ok(id)
    }

    fn subdivide(&mut self, id: NodeId) -> Result<(), SpatialError> {
        let node = self.node_checked(id)?;
        if !node.is_leaf() {
            return Ok(());
        }

        let half = node.bounds.extents();
        let threshold = self.config.subdivision_threshold;
        if half.x <= threshold || half.y <= threshold || half.z <= threshold {
            return Ok(());
        }

        let block = Block::new(id, node);
        let key = self.blocks.insert(block);
        self.node_checked_mut(id)?.children = Some(key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove an entity, cancel its subscriptions and merge emptied blocks
    pub fn erase(&mut self, scene: &mut SceneGraph, entity: EntityId) -> Result<ErasureStatus, SpatialError> {
        self.drain(scene)?;
        self.erase_entry(scene, entity)
    }

    /// Remove an entity only if it is stored directly in `node`.
    ///
    /// Searches the node's entries linearly.
    pub fn erase_in(
        &mut self,
        scene: &mut SceneGraph,
        node: NodeId,
        entity: EntityId,
    ) -> Result<ErasureStatus, SpatialError> {
        self.drain(scene)?;

        let stored_here = self
            .node_checked(node)?
            .entries
            .iter()
            .any(|entry| entry.entity == entity);
        if !stored_here {
            return Ok(ErasureStatus::NotPresent);
        }
        self.erase_entry(scene, entity)
    }

    /// Remove the entry a handle points at, in O(1).
    ///
    /// The handle must come from [`location`](Self::location) with no removal
    /// in between, including removals applied by the event drain at the
    /// start of this call. A handle that no longer names its entity's entry
    /// yields [`ErasureStatus::NotPresent`] and removes nothing.
    pub fn erase_at(&mut self, scene: &mut SceneGraph, handle: EntryHandle) -> Result<ErasureStatus, SpatialError> {
        self.drain(scene)?;

        if self.locations.get(handle.entity) != Some(&handle) {
            log::debug!("Ignoring stale entry handle {handle:?}");
            return Ok(ErasureStatus::NotPresent);
        }
        self.erase_entry(scene, handle.entity)
    }

    fn erase_entry(&mut self, scene: &mut SceneGraph, entity: EntityId) -> Result<ErasureStatus, SpatialError> {
        let Some((node, entry)) = self.remove_entry(entity)? else {
            return Ok(ErasureStatus::NotPresent);
        };
        scene.unsubscribe(entry.on_transform);
        scene.unsubscribe(entry.on_destroy);
        log::trace!("Erased entity {entity:?} from {node:?}");

        Ok(match self.merge_from(node)? {
            Some(highest) => ErasureStatus::RemovedAndMerged { highest },
            None => ErasureStatus::Removed,
        })
    }

    /// Take an entity's entry out of its node, keeping subscriptions alive
    fn remove_entry(&mut self, entity: EntityId) -> Result<Option<(NodeId, Entry)>, SpatialError> {
        let Some(handle) = self.locations.remove(entity) else {
            return Ok(None);
        };

        let node = self.node_checked_mut(handle.node)?;
        if handle.index >= node.entries.len() {
            return Err(SpatialError::InvalidNode(handle.node));
        }
        let entry = node.entries.swap_remove(handle.index);
        let displaced = node.entries.get(handle.index).map(|e| e.entity);

        if let Some(location) = displaced.and_then(|moved| self.locations.get_mut(moved)) {
            location.index = handle.index;
        }
        Ok(Some((handle.node, entry)))
    }

    /// Free every block of empty leaves from `start` up to the root.
    ///
    /// Returns the highest node that became a leaf.
    fn merge_from(&mut self, start: NodeId) -> Result<Option<NodeId>, SpatialError> {
        let mut highest = None;
        let mut current = Some(start);

        while let Some(id) = current {
            let node = self.node_checked(id)?;
            current = node.parent;

            let Some(block) = node.children else {
                continue;
            };
            let collapsible = self
                .blocks
                .get(block)
                .is_some_and(|b| b.nodes.iter().all(|child| child.is_leaf() && child.has_no_entities()));

            if collapsible {
                self.blocks.remove(block);
                self.node_checked_mut(id)?.children = None;
                highest = Some(id);
            }
        }

        if let Some(id) = highest {
            log::trace!("Merged octree blocks up to {id:?}");
        }
        Ok(highest)
    }

    // ------------------------------------------------------------------
    // Queries and traversal
    // ------------------------------------------------------------------

    /// Entities whose global bounding box intersects `area`.
    ///
    /// An area lying on an octant boundary descends into the octant that
    /// contains it only, so boxes that merely touch that boundary from the
    /// neighbouring octant can be missed. See [`Query`].
    ///
    /// The scene stays borrowed while the iterator lives, so it cannot be
    /// mutated halfway through a query.
    pub fn query<'a>(&'a mut self, scene: &'a mut SceneGraph, area: AABB) -> Result<Query<'a>, SpatialError> {
        self.drain(scene)?;
        Ok(Query::new(self, scene, area))
    }

    /// Append the result of [`query`](Self::query) to `out`; returns the
    /// number of entities appended
    pub fn query_into(
        &mut self,
        scene: &mut SceneGraph,
        area: AABB,
        out: &mut Vec<EntityId>,
    ) -> Result<usize, SpatialError> {
        let before = out.len();
        out.extend(self.query(scene, area)?);
        Ok(out.len() - before)
    }

    /// Number of indexed entities
    pub fn count(&mut self, scene: &mut SceneGraph) -> Result<usize, SpatialError> {
        self.drain(scene)?;
        self.subtree_count(NodeId::Root)
    }

    /// Visit every node in pre-order
    pub fn for_each_node(
        &mut self,
        scene: &mut SceneGraph,
        mut f: impl FnMut(NodeId, &OctreeNode),
    ) -> Result<(), SpatialError> {
        self.drain(scene)?;

        let mut stack = vec![NodeId::Root];
        while let Some(id) = stack.pop() {
            let node = self.node_checked(id)?;
            f(id, node);
            if let Some(children) = node.child_ids() {
                stack.extend(children.iter().rev());
            }
        }
        Ok(())
    }

    /// Visit every indexed entity in node pre-order
    pub fn for_each(
        &mut self,
        scene: &mut SceneGraph,
        mut f: impl FnMut(&SceneGraph, EntityId),
    ) -> Result<(), SpatialError> {
        self.drain(scene)?;

        let mut stack = vec![NodeId::Root];
        while let Some(id) = stack.pop() {
            let node = self.node_checked(id)?;
            for entry in &node.entries {
                if scene.contains(entry.entity) {
                    f(scene, entry.entity);
                }
            }
            if let Some(children) = node.child_ids() {
                stack.extend(children.iter().rev());
            }
        }
        Ok(())
    }

    /// Visit every indexed entity with mutable access to the scene.
    ///
    /// The entities are collected before the first call, so moves and
    /// deaths caused by `f` are applied on the next drain rather than during
    /// the traversal. An entity destroyed by an earlier call is skipped.
    pub fn for_each_mut(
        &mut self,
        scene: &mut SceneGraph,
        mut f: impl FnMut(&mut SceneGraph, EntityId),
    ) -> Result<(), SpatialError> {
        let mut snapshot = Vec::new();
        self.for_each(scene, |_, entity| snapshot.push(entity))?;

        for entity in snapshot {
            if scene.contains(entity) {
                f(scene, entity);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Whole-tree operations
    // ------------------------------------------------------------------

    /// Remove every entity and free every block.
    ///
    /// Queued notifications and unreported evictions are discarded.
    pub fn clear(&mut self, scene: &mut SceneGraph) {
        self.events.try_iter().for_each(drop);

        let mut stack = vec![NodeId::Root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            for entry in &node.entries {
                scene.unsubscribe(entry.on_transform);
                scene.unsubscribe(entry.on_destroy);
            }
            stack.extend(node.child_ids().into_iter().flatten());
        }

        self.root = OctreeNode::new(self.config.world_bounds, 0, None);
        self.blocks.clear();
        self.locations.clear();
        self.evicted.clear();
        log::debug!("Cleared octree");
    }

    /// Empty the index and insert `entities` from scratch.
    ///
    /// Stops at the first entity that cannot be inserted. Returns the number
    /// of entities inserted.
    pub fn rebuild(
        &mut self,
        scene: &mut SceneGraph,
        entities: impl IntoIterator<Item = EntityId>,
    ) -> Result<usize, SpatialError> {
        self.clear(scene);

        let mut inserted = 0;
        for entity in entities {
            self.insert(scene, entity)?;
            inserted += 1;
        }
        log::debug!("Rebuilt octree with {inserted} entities");
        Ok(inserted)
    }

    /// Cancel every subscription and unregister from the scene.
    ///
    /// Dropping an octree without detaching is also safe: the scene prunes
    /// its listener the next time it tries to notify it.
    pub fn detach(mut self, scene: &mut SceneGraph) {
        self.clear(scene);
        scene.unregister_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::scene::SceneError;
    use approx::assert_relative_eq;

    fn scene_with_octree(half: f32, threshold: f32) -> (SceneGraph, Octree) {
        let mut scene = SceneGraph::new();
        let config = OctreeConfig {
            world_bounds: AABB::cube(half),
            subdivision_threshold: threshold,
        };
        let octree = Octree::new(&mut scene, config).unwrap();
        (scene, octree)
    }

    fn spawn(scene: &mut SceneGraph, position: Vec3) -> EntityId {
        scene.create(Transform::from_translation(position))
    }

    fn spawn_box(scene: &mut SceneGraph, position: Vec3, half: f32) -> EntityId {
        let id = spawn(scene, position);
        scene.set_local_bounds(id, Some(AABB::cube(half))).unwrap();
        id
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut scene = SceneGraph::new();
        let inverted = OctreeConfig {
            world_bounds: AABB::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 1.0, 1.0)),
            ..OctreeConfig::default()
        };
        let no_threshold = OctreeConfig {
            subdivision_threshold: 0.0,
            ..OctreeConfig::default()
        };

        assert!(matches!(
            Octree::new(&mut scene, inverted),
            Err(SpatialError::InvalidConfig(_))
        ));
        assert!(matches!(
            Octree::new(&mut scene, no_threshold),
            Err(SpatialError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_insert_descends_to_deepest_containing_node() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::new(11.0, 11.0, 11.0));

        let node_id = octree.insert(&mut scene, entity).unwrap();
        let node = octree.node(node_id).unwrap();

        // Half-extents 16 -> 8 -> 4 -> 2 -> 1; nodes with half-extent 1 stay leaves.
        assert_eq!(node.depth(), 4);
        assert_relative_eq!(node.bounds().min, Vec3::new(10.0, 10.0, 10.0));
        assert_relative_eq!(node.bounds().max, Vec3::new(12.0, 12.0, 12.0));
        assert!(node.is_leaf());
        assert_eq!(octree.location(entity).map(|h| h.node), Some(node_id));
    }

    #[test]
    fn test_large_entity_stays_high() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let straddling = spawn_box(&mut scene, Vec3::zeros(), 1.0);

        let node = octree.insert(&mut scene, straddling).unwrap();

        assert_eq!(node, NodeId::Root);
        assert!(!octree.is_leaf());
    }

    #[test]
    fn test_insert_errors() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let outside = spawn(&mut scene, Vec3::new(100.0, 0.0, 0.0));
        let inside = spawn(&mut scene, Vec3::zeros());

        assert!(matches!(
            octree.insert(&mut scene, outside),
            Err(SpatialError::OutOfBounds { entity, .. }) if entity == outside
        ));

        octree.insert(&mut scene, inside).unwrap();
        assert_eq!(
            octree.insert(&mut scene, inside),
            Err(SpatialError::AlreadyIndexed(inside))
        );

        scene.destroy(inside).unwrap();
        assert_eq!(
            octree.insert(&mut scene, inside),
            Err(SpatialError::StaleEntity(inside))
        );
    }

    #[test]
    fn test_erase_absent_is_not_present() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::new(3.0, 3.0, 3.0));
        octree.insert(&mut scene, entity).unwrap();

        assert!(matches!(
            octree.erase(&mut scene, entity),
            Ok(ErasureStatus::RemovedAndMerged { highest: NodeId::Root })
        ));
        assert_eq!(octree.erase(&mut scene, entity), Ok(ErasureStatus::NotPresent));
        assert_eq!(octree.count(&mut scene), Ok(0));
        assert!(octree.is_leaf());
        assert_eq!(octree.node_count(), 1);
    }

    #[test]
    fn test_erase_cancels_subscriptions() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::new(3.0, 3.0, 3.0));
        octree.insert(&mut scene, entity).unwrap();
        let handle = octree.location(entity).unwrap();
        let entry = octree.node(handle.node).unwrap().entries()[handle.index];

        octree.erase(&mut scene, entity).unwrap();

        assert!(!scene.is_subscribed(entry.on_transform));
        assert!(!scene.is_subscribed(entry.on_destroy));

        // Moving after erase must not resurrect the entry.
        scene.set_translation(entity, Vec3::new(-3.0, -3.0, -3.0)).unwrap();
        assert_eq!(octree.count(&mut scene), Ok(0));
        assert!(!octree.contains(entity));
    }

    #[test]
    fn test_erase_in_checks_node() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::new(3.0, 3.0, 3.0));
        let node = octree.insert(&mut scene, entity).unwrap();

        assert_eq!(
            octree.erase_in(&mut scene, NodeId::Root, entity),
            Ok(ErasureStatus::NotPresent)
        );
        assert!(octree.contains(entity));
        assert!(matches!(
            octree.erase_in(&mut scene, node, entity),
            Ok(ErasureStatus::RemovedAndMerged { .. })
        ));
    }

    #[test]
    fn test_erase_at_validates_handle() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let a = spawn_box(&mut scene, Vec3::zeros(), 1.0);
        let b = spawn_box(&mut scene, Vec3::zeros(), 2.0);
        octree.insert(&mut scene, a).unwrap();
        octree.insert(&mut scene, b).unwrap();

        let stale = octree.location(a).unwrap();
        octree.erase(&mut scene, a).unwrap();
        assert_eq!(octree.erase_at(&mut scene, stale), Ok(ErasureStatus::NotPresent));

        // b was swapped into a's old slot.
        let fresh = octree.location(b).unwrap();
        assert_eq!(fresh.index, 0);
        assert!(octree.erase_at(&mut scene, fresh).is_ok());
        assert_eq!(octree.count(&mut scene), Ok(0));
    }

    #[test]
    fn test_swap_remove_keeps_locations_consistent() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let ids: Vec<_> = (0..5)
            .map(|i| spawn_box(&mut scene, Vec3::zeros(), 1.0 + i as f32 * 0.1))
            .collect();
        for &id in &ids {
            octree.insert(&mut scene, id).unwrap();
        }

        octree.erase(&mut scene, ids[1]).unwrap();

        for &id in ids.iter().filter(|&&id| id != ids[1]) {
            let handle = octree.location(id).unwrap();
            assert_eq!(octree.node(handle.node).unwrap().entries()[handle.index].entity, id);
        }
    }

    #[test]
    fn test_move_relocates_entry() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::new(-5.0, -5.0, -5.0));
        octree.insert(&mut scene, entity).unwrap();

        scene.set_translation(entity, Vec3::new(5.0, 5.0, 5.0)).unwrap();

        let old_area = AABB::from_center_extents(Vec3::new(-5.0, -5.0, -5.0), Vec3::new(0.5, 0.5, 0.5));
        let new_area = AABB::from_center_extents(Vec3::new(5.0, 5.0, 5.0), Vec3::new(0.5, 0.5, 0.5));
        assert!(octree.query(&mut scene, old_area).unwrap().next().is_none());
        assert_eq!(octree.query(&mut scene, new_area).unwrap().collect::<Vec<_>>(), vec![entity]);

        let node = octree.node(octree.location(entity).unwrap().node).unwrap();
        assert!(node.bounds().contains_point(Vec3::new(5.0, 5.0, 5.0)));
    }

    #[test]
    fn test_parent_move_relocates_children() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let parent = spawn(&mut scene, Vec3::new(-8.0, 0.0, 0.0));
        let child = spawn(&mut scene, Vec3::new(1.0, 0.0, 0.0));
        scene.add_child(parent, child).unwrap();
        octree.insert(&mut scene, child).unwrap();

        scene.set_translation(parent, Vec3::new(8.0, 0.0, 0.0)).unwrap();

        let area = AABB::from_center_extents(Vec3::new(9.0, 0.0, 0.0), Vec3::new(0.1, 0.1, 0.1));
        assert_eq!(octree.query(&mut scene, area).unwrap().collect::<Vec<_>>(), vec![child]);
    }

    #[test]
    fn test_world_bounds_exceeded_is_reported_and_evicts() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let runaway = spawn(&mut scene, Vec3::zeros());
        let stays = spawn(&mut scene, Vec3::new(1.0, 1.0, 1.0));
        octree.insert(&mut scene, runaway).unwrap();
        octree.insert(&mut scene, stays).unwrap();

        scene.set_translation(runaway, Vec3::new(50.0, 0.0, 0.0)).unwrap();
        scene.set_translation(stays, Vec3::new(2.0, 2.0, 2.0)).unwrap();

        assert_eq!(
            octree.sync(&mut scene),
            Err(SpatialError::WorldBoundsExceeded { entities: vec![runaway] })
        );
        assert!(!octree.contains(runaway));
        assert_eq!(octree.count(&mut scene), Ok(1));

        // Back inside: the caller may index it again.
        scene.set_translation(runaway, Vec3::zeros()).unwrap();
        octree.insert(&mut scene, runaway).unwrap();
        assert_eq!(octree.count(&mut scene), Ok(2));
    }

    #[test]
    fn test_eviction_does_not_block_other_operations() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let runaway = spawn(&mut scene, Vec3::zeros());
        let victim = spawn(&mut scene, Vec3::new(-3.0, 2.0, 2.0));
        octree.insert(&mut scene, runaway).unwrap();
        octree.insert(&mut scene, victim).unwrap();

        scene.set_translation(runaway, Vec3::new(100.0, 0.0, 0.0)).unwrap();
        assert_eq!(octree.erase(&mut scene, victim), Ok(ErasureStatus::RemovedAndMerged { highest: NodeId::Root }));
        assert!(!octree.contains(victim));
        assert!(!octree.contains(runaway));

        let newcomer = spawn(&mut scene, Vec3::new(4.0, 4.0, 4.0));
        octree.insert(&mut scene, newcomer).unwrap();
        assert!(octree.contains(newcomer));
        assert_eq!(octree.count(&mut scene), Ok(1));

        // The eviction is still reported once, by the explicit drain.
        assert_eq!(
            octree.sync(&mut scene),
            Err(SpatialError::WorldBoundsExceeded { entities: vec![runaway] })
        );
        assert_eq!(octree.sync(&mut scene), Ok(()));
    }

    #[test]
    fn test_take_evicted_drains_pending_reports() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let first = spawn(&mut scene, Vec3::new(1.0, 1.0, 1.0));
        let second = spawn(&mut scene, Vec3::new(-1.0, -1.0, -1.0));
        octree.insert(&mut scene, first).unwrap();
        octree.insert(&mut scene, second).unwrap();

        scene.set_translation(first, Vec3::new(0.0, 40.0, 0.0)).unwrap();
        assert_eq!(octree.count(&mut scene), Ok(1));
        scene.set_translation(second, Vec3::new(0.0, 0.0, -40.0)).unwrap();
        assert_eq!(octree.count(&mut scene), Ok(0));

        assert_eq!(octree.take_evicted(), vec![first, second]);
        assert!(octree.take_evicted().is_empty());
        assert_eq!(octree.sync(&mut scene), Ok(()));
    }

    #[test]
    fn test_move_then_destroy_in_same_drain() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::zeros());
        octree.insert(&mut scene, entity).unwrap();

        scene.set_translation(entity, Vec3::new(4.0, 4.0, 4.0)).unwrap();
        scene.destroy(entity).unwrap();

        assert_eq!(octree.count(&mut scene), Ok(0));
        assert!(octree.is_leaf());
    }

    #[test]
    fn test_for_each_mut_defers_moves() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let ids: Vec<_> = (0..4)
            .map(|i| spawn(&mut scene, Vec3::new(-8.0 + i as f32, -8.0, -8.0)))
            .collect();
        for &id in &ids {
            octree.insert(&mut scene, id).unwrap();
        }

        let mut visited = 0;
        octree
            .for_each_mut(&mut scene, |scene, id| {
                visited += 1;
                scene.add_translation(id, Vec3::new(12.0, 12.0, 12.0)).unwrap();
            })
            .unwrap();
        assert_eq!(visited, 4);

        let moved_area = AABB::new(Vec3::new(3.0, 3.0, 3.0), Vec3::new(8.0, 5.0, 5.0));
        let mut found = Vec::new();
        assert_eq!(octree.query_into(&mut scene, moved_area, &mut found), Ok(4));
        found.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_clear_and_rebuild() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let ids: Vec<_> = (0..3)
            .map(|i| spawn(&mut scene, Vec3::new(i as f32 * 3.0, 1.0, 1.0)))
            .collect();
        for &id in &ids {
            octree.insert(&mut scene, id).unwrap();
        }

        octree.clear(&mut scene);
        assert_eq!(octree.count(&mut scene), Ok(0));
        assert_eq!(octree.node_count(), 1);

        assert_eq!(octree.rebuild(&mut scene, ids.iter().copied()), Ok(3));
        assert_eq!(octree.count(&mut scene), Ok(3));
    }

    #[test]
    fn test_detach_unregisters_listener() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::zeros());
        octree.insert(&mut scene, entity).unwrap();
        let listener = octree.listener();

        octree.detach(&mut scene);

        assert_eq!(
            scene.subscribe(entity, EntityEvent::TransformChanged, listener),
            Err(SceneError::UnknownListener(listener))
        );
    }

    #[test]
    fn test_dropped_octree_is_pruned_by_scene() {
        let (mut scene, mut octree) = scene_with_octree(16.0, 1.0);
        let entity = spawn(&mut scene, Vec3::zeros());
        octree.insert(&mut scene, entity).unwrap();
        let handle = octree.location(entity).unwrap();
        let entry = octree.node(handle.node).unwrap().entries()[handle.index];
        drop(octree);

        scene.add_translation(entity, Vec3::new(1.0, 0.0, 0.0)).unwrap();

        assert!(!scene.is_subscribed(entry.on_transform));
        assert!(!scene.is_subscribed(entry.on_destroy));
    }

    #[test]
    fn test_config_round_trip_through_ron() {
        let dir = std::env::temp_dir().join(format!("scene_octree_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("octree.ron");

        let config = OctreeConfig {
            world_bounds: AABB::cube(64.0),
            subdivision_threshold: 0.5,
        };
        config.save_to_file(&path).unwrap();
        let loaded = OctreeConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded, config);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_config_from_toml_validates() {
        let config: OctreeConfig = toml::from_str(
            r#"
            subdivision_threshold = -1.0

            [world_bounds]
            min = [-10.0, -10.0, -10.0]
            max = [10.0, 10.0, 10.0]
            "#,
        )
        .unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
