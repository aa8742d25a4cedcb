//! slime3d: particle-based slime simulation core.
//!
//! A deformable particle mass that can split into disjoint blobs and merge
//! back together, each blob independently controllable. One tick runs:
//!
//! 1. a Position-Based-Fluids constraint solve (twice) with spatial hashing,
//! 2. sparse block-structured density reconstruction with optional
//!    anisotropic kernel splatting,
//! 3. connected-component segmentation of the filtered field,
//! 4. one controller (attractor) per region, feeding cohesion back into the
//!    next solve, and
//! 5. a pooled instance layer that keeps stable presentation entities over
//!    the otherwise per-tick region identities.
//!
//! This crate is framework-agnostic - it handles simulation only. Rendering,
//! camera/input and marching-cubes triangulation belong to the consumer; the
//! simulation hands out bounds, a density-field view, raw particles and the
//! instance list at the end of each tick.
//!
//! # Example
//!
//! ```
//! use slime3d::{SlimeParams, SlimeSimulation3D};
//!
//! let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
//! sim.spawn_half_cube(8, 0.5);
//! for _ in 0..10 {
//!     sim.update();
//! }
//! assert!(!sim.active_instances().is_empty());
//! ```

pub mod anisotropy;
pub mod bubbles;
pub mod constants;
pub mod controller;
pub mod density;
pub mod error;
pub mod grid;
pub mod instance;
pub mod kernels;
pub mod obstacle;
pub mod params;
pub mod segment;
pub mod solver;
pub mod spatial;

use glam::{Mat3, Vec3};
use log::{info, warn};

use crate::bubbles::BubbleSystem;
use crate::constants::{DT, H, SOLVER_ROUNDS};
use crate::controller::{ControllerManager, NO_SEED};
use crate::density::DensityFieldBuilder;
use crate::grid::DensityGrid;
use crate::instance::InstanceTracker;
use crate::segment::ComponentSegmenter;
use crate::spatial::SpatialHashIndex;

pub use crate::bubbles::Bubble;
pub use crate::controller::{AnchorState, Controller};
pub use crate::error::SlimeError;
pub use crate::grid::DensityFieldView;
pub use crate::instance::SlimeInstance;
pub use crate::obstacle::BoxObstacle;
pub use crate::params::SlimeParams;
pub use crate::segment::Region;

/// One simulation particle: position plus the index of the controller that
/// currently owns it. `Pod` so point-cloud consumers can upload the particle
/// slice directly.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position: Vec3,
    /// Index into the current controller list; 0 is always valid.
    pub component: i32,
}

/// Snapshot of one active instance for gameplay enumeration.
#[derive(Clone, Copy, Debug)]
pub struct InstanceInfo {
    pub id: usize,
    pub position: Vec3,
    pub radius: f32,
    pub facing: Vec3,
    pub anchor: Vec3,
    pub particle_count: usize,
}

/// The whole simulation as one caller-owned value: fixed buffers, the staged
/// tick pipeline and the gameplay control surface. No ambient state.
pub struct SlimeSimulation3D {
    params: SlimeParams,

    particles: Vec<Particle>,
    velocities: Vec<Vec3>,
    velocity_scratch: Vec<Vec3>,
    predicted: Vec<Vec3>,
    pos_old: Vec<Vec3>,
    lambdas: Vec<f32>,
    smoothed: Vec<Vec3>,
    shapes: Vec<Mat3>,
    /// Seed-controller ownership per particle; `NO_SEED` = organic.
    pins: Vec<u32>,

    hash: SpatialHashIndex,
    grid: DensityGrid,
    builder: DensityFieldBuilder,
    segmenter: ComponentSegmenter,
    regions: Vec<Region>,
    controllers: ControllerManager,
    instances: InstanceTracker,
    bubbles: BubbleSystem,
    anchor: AnchorState,
    obstacles: Vec<BoxObstacle>,

    bounds: (Vec3, Vec3),
    frame: u64,
    /// Set on the first tick; the particle set and obstacles are fixed from
    /// then on.
    sealed: bool,
}

impl SlimeSimulation3D {
    pub fn new(params: SlimeParams) -> Result<Self, SlimeError> {
        params.validate()?;
        info!(
            "slime3d: {} particle capacity, {} density blocks",
            params.particle_capacity, params.max_blocks
        );
        let capacity = params.particle_capacity;
        Ok(Self {
            hash: SpatialHashIndex::new(capacity, H),
            grid: DensityGrid::new(params.max_blocks),
            builder: DensityFieldBuilder::new(params.max_blocks),
            segmenter: ComponentSegmenter::new(),
            regions: Vec::with_capacity(64),
            controllers: ControllerManager::new(params.concentration),
            instances: InstanceTracker::new(),
            bubbles: BubbleSystem::new(params.bubble_capacity),
            anchor: AnchorState::default(),
            obstacles: Vec::new(),
            particles: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
            velocity_scratch: Vec::with_capacity(capacity),
            predicted: Vec::with_capacity(capacity),
            pos_old: Vec::with_capacity(capacity),
            lambdas: Vec::with_capacity(capacity),
            smoothed: Vec::with_capacity(capacity),
            shapes: Vec::with_capacity(capacity),
            pins: Vec::with_capacity(capacity),
            bounds: (Vec3::ZERO, Vec3::ZERO),
            frame: 0,
            sealed: false,
            params,
        })
    }

    // ========== Setup (before the first tick) ==========

    /// Add one particle. Returns false when the capacity is spent or the
    /// simulation has already started ticking.
    pub fn spawn_particle(&mut self, position: Vec3) -> bool {
        if self.sealed {
            warn!("spawn after the first tick ignored; particle count is fixed at startup");
            return false;
        }
        if self.particles.len() >= self.params.particle_capacity {
            warn!(
                "particle capacity {} reached, spawn ignored",
                self.params.particle_capacity
            );
            return false;
        }
        self.particles.push(Particle {
            position,
            component: 0,
        });
        self.velocities.push(Vec3::ZERO);
        self.velocity_scratch.push(Vec3::ZERO);
        self.predicted.push(position);
        self.pos_old.push(position);
        self.lambdas.push(0.0);
        self.smoothed.push(position);
        self.shapes.push(Mat3::IDENTITY);
        self.pins.push(NO_SEED);
        true
    }

    /// Fill half a `width^3` lattice of particles around the origin at the
    /// given spacing; the default starting blob. Returns how many spawned.
    pub fn spawn_half_cube(&mut self, width: usize, spacing: f32) -> usize {
        let half = width as f32 / 2.0;
        let mut spawned = 0;
        for i in 0..width / 2 {
            for j in 0..width {
                for k in 0..width {
                    let pos =
                        Vec3::new(k as f32 - half, j as f32, i as f32 - half) * spacing;
                    if self.spawn_particle(pos) {
                        spawned += 1;
                    }
                }
            }
        }
        spawned
    }

    /// Register a static box obstacle. Obstacles are gathered once at
    /// startup and read-only afterwards.
    pub fn add_obstacle(&mut self, obstacle: BoxObstacle) -> bool {
        if self.sealed {
            warn!("obstacle added after the first tick ignored");
            return false;
        }
        self.obstacles.push(obstacle);
        true
    }

    // ========== Tick ==========

    /// Advance the simulation by one fixed tick.
    pub fn update(&mut self) {
        if self.particles.is_empty() {
            return;
        }
        self.sealed = true;

        // 1. PBF constraint solve, run twice for stability
        for _ in 0..SOLVER_ROUNDS {
            self.substep();
        }

        // 2. Surface reconstruction: smoothed positions, anisotropy, sparse
        //    density field and blur
        self.bounds = self.builder.build(
            &mut self.grid,
            &self.hash,
            &self.particles,
            &mut self.smoothed,
            &mut self.shapes,
            self.params.use_anisotropic,
        );

        // 3. Connected components, then re-tag particles through the grid
        self.segmenter.segment(&mut self.grid, &mut self.regions);
        self.controllers
            .release_arrivals(&self.particles, &mut self.pins);
        segment::relabel_particles(&self.grid, &self.smoothed, &self.pins, &mut self.particles);

        // 4. One controller per region; retained seeds ride along
        self.controllers.rebuild(
            &self.regions,
            self.grid.origin(),
            self.anchor.position,
            &mut self.particles,
            &mut self.pins,
        );

        // 5. Stable instances over the fresh controller list
        self.instances.reconcile(
            &mut self.controllers,
            &self.grid,
            self.params.threshold,
            &self.anchor,
            DT,
        );

        // 6. Cosmetic bubbles ride the velocity field
        self.bubbles.update(
            &self.grid,
            &self.hash,
            &self.predicted,
            &self.velocities,
            self.params.threshold,
            self.params.bubble_speed,
            self.params.viscosity,
            self.frame,
        );

        self.frame += 1;
    }

    fn substep(&mut self) {
        solver::apply_external_forces(
            &self.particles,
            self.controllers.controllers(),
            &self.pins,
            &mut self.velocities,
            &mut self.pos_old,
            &mut self.predicted,
            Vec3::new(0.0, self.params.gravity, 0.0),
            self.params.damping,
        );
        self.hash.build(&self.predicted);
        solver::compute_lambdas(&self.predicted, &self.hash, &mut self.lambdas);
        solver::project_density_constraint(
            &mut self.particles,
            &self.predicted,
            &self.lambdas,
            &self.hash,
        );
        solver::resolve_collisions(&mut self.particles, &self.obstacles);
        solver::reconstruct_velocities(
            &self.particles,
            &self.pos_old,
            &mut self.velocity_scratch,
            self.params.max_speed,
        );
        solver::apply_viscosity(
            &self.predicted,
            &self.hash,
            &self.velocity_scratch,
            &mut self.velocities,
            self.params.viscosity,
        );
    }

    // ========== Gameplay control surface ==========

    /// Overwrite the velocity of the given particles. Out-of-range indices
    /// are ignored.
    pub fn apply_velocity(&mut self, indices: &[usize], velocity: Vec3) {
        for &i in indices {
            if let Some(v) = self.velocities.get_mut(i) {
                *v = velocity;
            }
        }
    }

    /// Hand the given particles to a controller. Assigning to a seed
    /// controller pins the particles to it until they arrive. Out-of-range
    /// particle indices and unknown controller ids are ignored.
    pub fn set_particle_controller(&mut self, indices: &[usize], controller: usize) {
        if controller >= self.controllers.len() {
            return;
        }
        let pin = self
            .controllers
            .seed_id_for(controller)
            .unwrap_or(NO_SEED);
        for &i in indices {
            if i >= self.particles.len() {
                continue;
            }
            self.particles[i].component = controller as i32;
            self.pins[i] = pin;
        }
    }

    /// Create a seed controller at a position; returns its id in the current
    /// controller list. The id stays valid until the next tick; the seed
    /// itself lives while it owns pinned particles.
    pub fn create_controller_at(
        &mut self,
        position: Vec3,
        radius: f32,
        concentration: Option<f32>,
    ) -> usize {
        self.controllers.create_seed(position, radius, concentration)
    }

    /// Number of particles inside a world-space sphere.
    pub fn count_particles_in_sphere(&self, center: Vec3, radius: f32) -> usize {
        let r2 = radius * radius;
        self.particles
            .iter()
            .filter(|p| (p.position - center).length_squared() <= r2)
            .count()
    }

    /// Indices of the `count` particles nearest to a point, closest first.
    pub fn nearest_particles(&self, position: Vec3, count: usize) -> Vec<usize> {
        let mut order: Vec<(f32, usize)> = self
            .particles
            .iter()
            .enumerate()
            .map(|(i, p)| ((p.position - position).length_squared(), i))
            .collect();
        order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        order.truncate(count);
        order.into_iter().map(|(_, i)| i).collect()
    }

    /// Indices of particles owned by a controller, up to an optional limit.
    pub fn particles_in_controller(&self, controller: usize, limit: Option<usize>) -> Vec<usize> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for (i, p) in self.particles.iter().enumerate() {
            if p.component as usize == controller {
                out.push(i);
                if out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Pull every blob toward the anchor until a single blob remains.
    pub fn merge_all(&mut self) {
        self.controllers.request_merge();
    }

    /// Feed the external anchor transform (merge target, default facing,
    /// controlled-instance coupling).
    pub fn set_anchor(&mut self, position: Vec3, velocity: Vec3) {
        self.anchor = AnchorState { position, velocity };
    }

    /// Take control of an active instance; the anchor snaps to its center.
    pub fn switch_to_instance(&mut self, id: usize) -> bool {
        match self.instances.switch_to(id) {
            Some(center) => {
                self.anchor.position = center;
                true
            }
            None => false,
        }
    }

    pub fn controlled_instance(&self) -> usize {
        self.instances.controlled()
    }

    /// Every active instance with its particle count.
    pub fn active_instances(&self) -> Vec<InstanceInfo> {
        self.instances
            .instances()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active)
            .map(|(id, s)| InstanceInfo {
                id,
                position: s.center,
                radius: s.radius,
                facing: s.facing,
                anchor: s.anchor,
                particle_count: self
                    .particles
                    .iter()
                    .filter(|p| p.component as usize == s.controller)
                    .count(),
            })
            .collect()
    }

    /// Cohesion strength currently applied by controllers.
    pub fn concentration(&self) -> f32 {
        self.controllers.concentration()
    }

    pub fn set_concentration(&mut self, concentration: f32) {
        self.params.concentration = concentration;
        self.controllers.set_concentration(concentration);
    }

    // ========== Boundary outputs ==========

    /// Block-aligned world bounds of the particle cloud after the last tick.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.bounds
    }

    /// Raw particle slice (positions + component ids), point-cloud mode.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Per-particle anisotropy matrices matching [`Self::particles`].
    pub fn anisotropy(&self) -> &[Mat3] {
        &self.shapes
    }

    /// Read-only view of the filtered density field for the external
    /// marching-cubes collaborator.
    pub fn density_field(&self) -> DensityFieldView<'_> {
        self.grid.field_view(self.params.threshold)
    }

    /// Active cosmetic bubbles.
    pub fn bubbles(&self) -> impl Iterator<Item = &Bubble> {
        self.bubbles.active()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn block_count(&self) -> usize {
        self.grid.block_count()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn params(&self) -> &SlimeParams {
        &self.params
    }
}
