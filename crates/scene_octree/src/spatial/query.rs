//! Lazy volume query over an octree

use super::node::{Entry, NodeId};
use super::octree::Octree;
use crate::scene::{EntityId, SceneGraph, AABB};

#[derive(Debug, Clone, Copy)]
enum Visit {
    /// Test entries against the area and choose how to visit children
    Test(NodeId),
    /// Emit the whole subtree without geometric tests
    Bulk(NodeId),
}

/// Iterator over the entities whose bounding box intersects a query area.
///
/// Created by [`Octree::query`]. Nodes are visited in pre-order. For each
/// child of a tested node, in octant order:
/// - the child contains the area: descend into it and skip the remaining
///   children
/// - the area contains the child: emit the child's subtree wholesale
/// - they intersect: descend
/// - otherwise skip
///
/// Boxes are closed, so an area touching a shared octant face is contained
/// by the octant on its side of the face. The other octants are then
/// skipped, and entities that only touch the area from across that face are
/// not returned.
pub struct Query<'a> {
    octree: &'a Octree,
    scene: &'a SceneGraph,
    area: AABB,
    stack: Vec<Visit>,
    pending: std::slice::Iter<'a, Entry>,
    testing: bool,
}

impl<'a> Query<'a> {
    pub(super) fn new(octree: &'a Octree, scene: &'a SceneGraph, area: AABB) -> Self {
        Self {
            octree,
            scene,
            area,
            stack: vec![Visit::Test(NodeId::Root)],
            pending: [].iter(),
            testing: true,
        }
    }

    /// Area being queried
    pub const fn area(&self) -> &AABB {
        &self.area
    }

    fn plan_children(&mut self, children: [NodeId; 8]) {
        let octree = self.octree;
        let start = self.stack.len();
        for child in children {
            let Some(node) = octree.node(child) else {
                continue;
            };
            if node.bounds.contains(&self.area) {
                self.stack.push(Visit::Test(child));
                break;
            } else if self.area.contains(&node.bounds) {
                self.stack.push(Visit::Bulk(child));
            } else if node.bounds.intersects(&self.area) {
                self.stack.push(Visit::Test(child));
            }
        }
        // Popped from the back, so reverse to keep octant order.
        self.stack[start..].reverse();
    }

    fn matches(&self, entity: EntityId) -> bool {
        self.scene
            .get(entity)
            .is_some_and(|e| !self.testing || e.global_bounding_box().intersects(&self.area))
    }
}

impl Iterator for Query<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        loop {
            while let Some(entry) = self.pending.next() {
                if self.matches(entry.entity) {
                    return Some(entry.entity);
                }
            }

            let (id, testing) = match self.stack.pop()? {
                Visit::Test(id) => (id, true),
                Visit::Bulk(id) => (id, false),
            };
            let octree = self.octree;
            let Some(node) = octree.node(id) else {
                continue;
            };

            self.pending = node.entries.iter();
            self.testing = testing;
            if let Some(children) = node.child_ids() {
                if testing {
                    self.plan_children(children);
                } else {
                    self.stack.extend(children.iter().rev().map(|&child| Visit::Bulk(child)));
                }
            }
        }
    }
}
