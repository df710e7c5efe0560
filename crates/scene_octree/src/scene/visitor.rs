//! Pre-order entity tree walk

use super::entity::EntityId;
use super::graph::SceneGraph;

/// Callbacks driven by [`walk`].
pub trait EntityVisitor {
    /// Called once before the walk; returning `false` skips the walk but
    /// [`on_finish`](Self::on_finish) still runs.
    fn on_start(&mut self) -> bool {
        true
    }

    /// Called for each entity with its depth below the walk root (root is 0).
    ///
    /// Returning `false` skips the entity's children. Siblings are still
    /// visited.
    fn on_visit(&mut self, scene: &SceneGraph, id: EntityId, depth: usize) -> bool;

    /// Called once at the end of the walk
    fn on_finish(&mut self) {}
}

/// Walk the subtree rooted at `root` in pre-order.
///
/// A stale `root` visits nothing. Returns the number of visited entities.
pub fn walk<V: EntityVisitor + ?Sized>(visitor: &mut V, scene: &SceneGraph, root: EntityId) -> usize {
    let mut visited = 0;

    if visitor.on_start() && scene.contains(root) {
        let mut stack = vec![(root, 0)];
        while let Some((id, depth)) = stack.pop() {
            let Some(entity) = scene.get(id) else {
                continue;
            };
            visited += 1;
            if visitor.on_visit(scene, id, depth) {
                stack.extend(entity.children().iter().rev().map(|&child| (child, depth + 1)));
            }
        }
    }

    visitor.on_finish();
    visited
}
