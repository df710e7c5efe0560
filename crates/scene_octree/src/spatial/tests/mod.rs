//! Octree tests driven through a real scene graph


use crate::foundation::math::{Transform, Vec3};
use crate::scene::{EntityId, SceneGraph, AABB};
use crate::spatial::{Octree, OctreeConfig};

fn setup(half: f32, threshold: f32) -> (SceneGraph, Octree) {
    crate::foundation::logging::try_init();
    let mut scene = SceneGraph::new();
    let octree = Octree::new(
        &mut scene,
        OctreeConfig {
            world_bounds: AABB::cube(half),
            subdivision_threshold: threshold,
        },
    )
    .unwrap();
    (scene, octree)
}

/// Entity with a small cube as its mesh bounds
fn spawn_small(scene: &mut SceneGraph, position: Vec3) -> EntityId {
    let id = scene.create(Transform::from_translation(position));
    scene.set_local_bounds(id, Some(AABB::cube(0.25))).unwrap();
    id
}

fn around(position: Vec3, half: f32) -> AABB {
    AABB::from_center_extents(position, Vec3::new(half, half, half))
}
