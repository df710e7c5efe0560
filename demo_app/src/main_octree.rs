//! Octree Demo
//!
//! Runs a headless fleet simulation over the scene octree:
//! - Ships fly around and bounce off the world walls
//! - Escorts are parented to a flagship and follow it through the hierarchy
//! - Once a second queries the neighbourhood of the flagship
//! - Some ships are destroyed along the way and drop out of the index
//!
//! Usage: `octree_demo [config.toml|config.ron]`

use rand::Rng;
use scene_octree::config::{Config, ConfigError};
use scene_octree::foundation::math::{Quat, Transform, Vec3};
use scene_octree::scene::{EntityId, EntityVisitor, SceneGraph, AABB};
use scene_octree::spatial::{NodeId, Octree, OctreeConfig, SpatialError, TraversalLock};
use serde::{Deserialize, Serialize};

/// Distance kept between spawn points and the world walls
const SPAWN_MARGIN: f32 = 10.0;

/// Escorts fly this far from the flagship
const ESCORT_DISTANCE: f32 = 4.0;

/// Demo settings, loadable from TOML or RON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DemoConfig {
    octree: OctreeConfig,
    ship_count: usize,
    escort_count: usize,
    ship_size: f32,
    ship_speed: f32,
    frames: u32,
    delta_time: f32,
    query_radius: f32,
    /// Chance per frame that a random ship is destroyed
    loss_rate: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            octree: OctreeConfig {
                world_bounds: AABB::cube(50.0),
                subdivision_threshold: 1.5,
            },
            ship_count: 40,
            escort_count: 4,
            ship_size: 0.8,
            ship_speed: 6.0,
            frames: 600,
            delta_time: 1.0 / 60.0,
            query_radius: 10.0,
            loss_rate: 0.02,
        }
    }
}

impl DemoConfig {
    /// Half-size of the largest origin-centred cube inside the world
    fn arena_half_extent(&self) -> f32 {
        let bounds = self.octree.world_bounds;
        bounds.max.inf(&-bounds.min).min()
    }

    /// Radius of the flagship's circle around the origin
    fn orbit_radius(&self) -> f32 {
        self.arena_half_extent() * 0.4
    }
}

impl Config for DemoConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.octree.validate()?;
        if self.ship_size <= 0.0 || self.query_radius <= 0.0 || self.delta_time <= 0.0 {
            return Err(ConfigError::Invalid(
                "ship_size, query_radius and delta_time must be positive".to_string(),
            ));
        }
        let half = self.arena_half_extent();
        if half <= SPAWN_MARGIN + 2.0 * self.ship_size {
            return Err(ConfigError::Invalid(format!(
                "world must reach more than {} from the origin on every axis for ships of size {}, got {half}",
                SPAWN_MARGIN + 2.0 * self.ship_size,
                self.ship_size
            )));
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(ConfigError::Invalid(format!("loss_rate {} is not a probability", self.loss_rate)));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("octree: {0}")]
    Spatial(#[from] SpatialError),
    #[error("scene: {0}")]
    Scene(#[from] scene_octree::scene::SceneError),
}

struct Ship {
    entity: EntityId,
    velocity: Vec3,
}

/// Counts the flagship formation while logging it
struct FormationReport {
    members: usize,
}

impl EntityVisitor for FormationReport {
    fn on_visit(&mut self, scene: &SceneGraph, id: EntityId, depth: usize) -> bool {
        self.members += 1;
        if let Some(entity) = scene.get(id) {
            log::debug!(
                "{:indent$}{} at {:?}",
                "",
                entity.name().unwrap_or("ship"),
                entity.global_position(),
                indent = depth * 2
            );
        }
        true
    }
}

struct OctreeDemo {
    config: DemoConfig,
    scene: SceneGraph,
    octree: Octree,
    lock: TraversalLock,
    ships: Vec<Ship>,
    flagship: EntityId,
    rng: rand::rngs::ThreadRng,
}

impl OctreeDemo {
    fn new(config: DemoConfig) -> Result<Self, DemoError> {
        let mut scene = SceneGraph::new();
        let mut octree = Octree::new(&mut scene, config.octree)?;
        let mut rng = rand::thread_rng();
        let spawn_bounds = config.arena_half_extent() - SPAWN_MARGIN - config.ship_size;

        let mut ships = Vec::with_capacity(config.ship_count);
        for i in 0..config.ship_count {
            let position = Vec3::new(
                rng.gen_range(-spawn_bounds..spawn_bounds),
                rng.gen_range(-spawn_bounds..spawn_bounds),
                rng.gen_range(-spawn_bounds..spawn_bounds),
            );
            let direction = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let velocity = direction.try_normalize(1.0e-6).unwrap_or_else(Vec3::x) * config.ship_speed;

            let entity = scene.create_named(format!("ship-{i}"), Transform::from_translation(position));
            scene.set_local_bounds(entity, Some(AABB::cube(config.ship_size)))?;
            octree.insert(&mut scene, entity)?;
            ships.push(Ship { entity, velocity });
        }

        let flagship = scene.create_named("flagship", Transform::identity());
        scene.set_local_bounds(flagship, Some(AABB::cube(config.ship_size * 2.0)))?;
        octree.insert(&mut scene, flagship)?;
        for i in 0..config.escort_count {
            let angle = std::f32::consts::TAU * i as f32 / config.escort_count as f32;
            let offset = Vec3::new(angle.cos(), 0.0, angle.sin()) * ESCORT_DISTANCE;
            let escort = scene.create_named(format!("escort-{i}"), Transform::from_translation(offset));
            scene.set_local_bounds(escort, Some(AABB::cube(config.ship_size)))?;
            scene.add_child(flagship, escort)?;
            octree.insert(&mut scene, escort)?;
        }

        log::info!(
            "Spawned {} ships and a flagship with {} escorts",
            ships.len(),
            config.escort_count
        );

        Ok(Self {
            config,
            scene,
            octree,
            lock: TraversalLock::new(),
            ships,
            flagship,
            rng,
        })
    }

    fn update(&mut self, frame: u32) -> Result<(), DemoError> {
        let dt = self.config.delta_time;
        let half_bounds = self.config.arena_half_extent() - self.config.ship_size * 2.0;

        for ship in &mut self.ships {
            let Some(entity) = self.scene.get(ship.entity) else {
                continue;
            };
            let mut pos = entity.local_transform().translation + ship.velocity * dt;

            // Bounce off walls
            for axis in 0..3 {
                if pos[axis] < -half_bounds || pos[axis] > half_bounds {
                    ship.velocity[axis] = -ship.velocity[axis];
                    pos[axis] = pos[axis].clamp(-half_bounds, half_bounds);
                }
            }
            self.scene.set_translation(ship.entity, pos)?;
        }

        // The flagship circles the origin and its escorts follow.
        let t = frame as f32 * dt;
        let orbit = Vec3::new(t.cos(), 0.2 * t.sin(), t.sin()) * self.config.orbit_radius();
        self.scene.set_translation(self.flagship, orbit)?;
        self.scene
            .post_multiply_rotation(self.flagship, Quat::from_axis_angle(&Vec3::y_axis(), dt))?;

        if self.rng.gen_bool(self.config.loss_rate) && !self.ships.is_empty() {
            let lost = self.ships.swap_remove(self.rng.gen_range(0..self.ships.len()));
            self.scene.destroy(lost.entity)?;
            log::info!("Frame {frame}: ship {:?} destroyed", lost.entity);
        }

        match self.octree.sync(&mut self.scene) {
            Ok(()) => Ok(()),
            Err(SpatialError::WorldBoundsExceeded { entities }) => self.recover(entities),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull evicted entities back to the origin and index them again
    fn recover(&mut self, entities: Vec<EntityId>) -> Result<(), DemoError> {
        for entity in entities {
            log::warn!("Entity {entity:?} escaped the world; respawning at origin");
            self.scene.set_translation(entity, Vec3::zeros())?;
            self.octree.insert(&mut self.scene, entity)?;
        }
        Ok(())
    }

    fn report(&mut self, frame: u32) -> Result<(), DemoError> {
        let center = self.scene.get(self.flagship).map_or_else(Vec3::zeros, |e| e.global_position());
        let radius = self.config.query_radius;
        let area = AABB::from_center_extents(center, Vec3::new(radius, radius, radius));

        let nearby = self.octree.query(&mut self.scene, area)?.count();
        let total = self.octree.count(&mut self.scene)?;

        // Snapshot of occupied nodes, the way a renderer would sort them.
        let _window = self.lock.window();
        let mut occupied = Vec::new();
        self.octree.for_each_node(&mut self.scene, |id, node| {
            if !node.has_no_entities() {
                occupied.push((id, node.depth(), node.entries().len()));
            }
        })?;
        occupied.sort_by_key(|&(_, depth, _)| std::cmp::Reverse(depth));
        let deepest = occupied.first().map_or(0, |&(_, depth, _)| depth);
        let at_root = occupied
            .iter()
            .find(|(id, _, _)| *id == NodeId::Root)
            .map_or(0, |&(_, _, count)| count);

        log::info!(
            "Frame {frame}: {total} indexed, {nearby} near flagship, {} nodes, {} occupied, deepest {deepest}, {at_root} at root",
            self.octree.node_count(),
            occupied.len(),
        );
        Ok(())
    }

    fn run(mut self) -> Result<(), DemoError> {
        let mut formation = FormationReport { members: 0 };
        scene_octree::scene::walk(&mut formation, &self.scene, self.flagship);
        log::info!("Flagship formation has {} members", formation.members);

        for frame in 0..self.config.frames {
            self.update(frame)?;
            if frame % 60 == 0 {
                self.report(frame)?;
            }
        }
        self.report(self.config.frames)?;

        let mut everyone = Vec::new();
        self.octree.for_each(&mut self.scene, |_, id| everyone.push(id))?;
        let rebuilt = self.octree.rebuild(&mut self.scene, everyone)?;
        log::info!("Rebuilt the index from scratch with {rebuilt} entities");

        self.scene.destroy_recursive(self.flagship)?;
        log::info!(
            "Flagship lost with its escorts; {} entities remain indexed",
            self.octree.count(&mut self.scene)?
        );

        self.octree.detach(&mut self.scene);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => DemoConfig::load_from_file(&path)?,
        None => DemoConfig::default(),
    };
    config.validate()?;

    log::info!("=== Octree Demo ===");
    log::info!(
        "World {:?}, subdivision threshold {}",
        config.octree.world_bounds,
        config.octree.subdivision_threshold
    );

    OctreeDemo::new(config)?.run()?;
    Ok(())
}
