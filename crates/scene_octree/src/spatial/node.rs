//! Octree node storage
//!
//! Child nodes are allocated eight at a time in a [`Block`]. A node is named by
//! a [`NodeId`]: either the root, or an octant slot inside a block.

use crate::scene::{EntityId, SubscriptionToken, AABB};

slotmap::new_key_type! {
    /// Key of an 8-node block in the octree's block arena
    pub struct BlockKey;
}

/// Handle of a node in an [`Octree`](super::Octree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// The root node; never freed
    Root,
    /// Octant `octant` (0-7) of the block `block`
    Child {
        /// Block holding the node and its seven siblings
        block: BlockKey,
        /// Octant index, see [`AABB::octant`]
        octant: u8,
    },
}

/// Entity stored in a node together with the subscriptions that keep the
/// index informed about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Indexed entity
    pub entity: EntityId,
    /// Subscription to [`EntityEvent::TransformChanged`](crate::scene::EntityEvent::TransformChanged)
    pub on_transform: SubscriptionToken,
    /// Subscription to [`EntityEvent::AboutToDie`](crate::scene::EntityEvent::AboutToDie)
    pub on_destroy: SubscriptionToken,
}

/// Location of an entity's entry: node plus slot in that node's entry list.
///
/// Handles go stale when entries of the same node are removed. See
/// [`Octree::erase_at`](super::Octree::erase_at).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    /// Entity the handle was issued for
    pub entity: EntityId,
    /// Node holding the entry
    pub node: NodeId,
    /// Slot in the node's entry list
    pub index: usize,
}

/// Single node in the octree hierarchy
#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub(super) bounds: AABB,
    pub(super) depth: u32,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Option<BlockKey>,
    pub(super) entries: Vec<Entry>,
}

impl OctreeNode {
    pub(super) const fn new(bounds: AABB, depth: u32, parent: Option<NodeId>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: None,
            entries: Vec::new(),
        }
    }

    /// Check if this node is a leaf (has no children)
    pub const fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Whether no entity is stored directly in this node
    pub fn has_no_entities(&self) -> bool {
        self.entries.is_empty()
    }

    /// World-space region covered by this node
    pub const fn bounds(&self) -> &AABB {
        &self.bounds
    }

    /// Depth in the tree (0 = root)
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Parent node, `None` for the root
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Entries stored directly in this node
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Handles of the eight children in octant order, `None` for a leaf
    pub fn child_ids(&self) -> Option<[NodeId; 8]> {
        self.children.map(|block| {
            std::array::from_fn(|octant| NodeId::Child {
                block,
                octant: octant as u8,
            })
        })
    }
}

/// Eight sibling nodes allocated and freed together
#[derive(Debug, Clone)]
pub(super) struct Block {
    pub(super) nodes: [OctreeNode; 8],
}

impl Block {
    /// Children of `parent`, one per octant of its region
    pub(super) fn new(parent_id: NodeId, parent: &OctreeNode) -> Self {
        Self {
            nodes: std::array::from_fn(|octant| {
                OctreeNode::new(parent.bounds.octant(octant), parent.depth + 1, Some(parent_id))
            }),
        }
    }
}
