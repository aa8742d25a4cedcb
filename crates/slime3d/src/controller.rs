//! Controllers: one attractor per connected region, plus gameplay seeds.
//!
//! The controller list is rebuilt from scratch every tick from the segmented
//! regions; list indices are only meaningful within the tick. Gameplay can
//! append seed controllers which persist across rebuilds while they still own
//! pinned particles, guiding launched material to a target until it arrives
//! and organic segmentation takes over.

use glam::Vec3;

use crate::constants::{
    CELL_SIZE, FLAT_EXTENT_CELLS, FLAT_LIFT, MERGE_SPEED, SEED_MAX_AGE,
};
use crate::segment::Region;
use crate::Particle;

/// Pin value for particles not owned by any seed controller.
pub const NO_SEED: u32 = u32::MAX;

/// Radius of the fallback controller used before the first segmentation and
/// whenever no region exists.
const DEFAULT_RADIUS: f32 = 10.0;

/// Attractor for one connected mass.
#[derive(Clone, Copy, Debug)]
pub struct Controller {
    pub center: Vec3,
    pub radius: f32,
    pub velocity: Vec3,
    /// Cohesion strength: how hard particles inside the radius are pulled in.
    pub concentration: f32,
}

#[derive(Clone, Copy, Debug)]
struct Seed {
    id: u32,
    controller: Controller,
    age: u32,
}

/// Externally supplied anchor transform: merge direction, default facing and
/// the coupling target of the controlled instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnchorState {
    pub position: Vec3,
    pub velocity: Vec3,
}

pub struct ControllerManager {
    controllers: Vec<Controller>,
    organic_count: usize,
    seeds: Vec<Seed>,
    next_seed_id: u32,
    merge: bool,
    concentration: f32,
    /// Scratch: pinned-particle count per seed, reused across ticks.
    seed_counts: Vec<u32>,
}

impl ControllerManager {
    pub fn new(concentration: f32) -> Self {
        Self {
            controllers: vec![Controller {
                center: Vec3::ZERO,
                radius: DEFAULT_RADIUS,
                velocity: Vec3::ZERO,
                concentration,
            }],
            organic_count: 1,
            seeds: Vec::new(),
            next_seed_id: 0,
            merge: false,
            concentration,
            seed_counts: Vec::new(),
        }
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Controllers derived from this tick's regions, excluding seeds.
    pub fn organic_count(&self) -> usize {
        self.organic_count
    }

    pub fn get(&self, id: i32) -> Option<&Controller> {
        self.controllers.get(id as usize)
    }

    pub(crate) fn controller_mut(&mut self, id: usize) -> Option<&mut Controller> {
        self.controllers.get_mut(id)
    }

    /// Cohesion strength applied to controllers built from here on.
    pub fn concentration(&self) -> f32 {
        self.concentration
    }

    pub fn set_concentration(&mut self, concentration: f32) {
        self.concentration = concentration;
    }

    /// Pull every region toward the anchor until a single region remains.
    pub fn request_merge(&mut self) {
        self.merge = true;
    }

    pub fn merging(&self) -> bool {
        self.merge
    }

    /// Append a gameplay seed controller; returns its id in the current list.
    /// The id is valid until the next tick's rebuild; the seed itself lives
    /// until its pinned particles arrive or it expires.
    pub fn create_seed(
        &mut self,
        center: Vec3,
        radius: f32,
        concentration: Option<f32>,
    ) -> usize {
        let controller = Controller {
            center,
            radius,
            velocity: Vec3::ZERO,
            concentration: concentration.unwrap_or(self.concentration),
        };
        self.seeds.push(Seed {
            id: self.next_seed_id,
            controller,
            age: 0,
        });
        self.next_seed_id += 1;
        self.controllers.push(controller);
        self.controllers.len() - 1
    }

    /// Stable seed handle behind a controller id, if the id names a seed.
    pub(crate) fn seed_id_for(&self, controller_id: usize) -> Option<u32> {
        if controller_id < self.organic_count {
            return None;
        }
        self.seeds
            .get(controller_id - self.organic_count)
            .map(|s| s.id)
    }

    /// Unpin particles that reached their seed's radius. Runs before the
    /// relabel pass so freshly released particles pick up an organic label in
    /// the same tick.
    pub(crate) fn release_arrivals(&self, particles: &[Particle], pins: &mut [u32]) {
        if self.seeds.is_empty() {
            return;
        }
        for (i, pin) in pins.iter_mut().enumerate() {
            if *pin == NO_SEED {
                continue;
            }
            let Some(seed) = self.seeds.iter().find(|s| s.id == *pin) else {
                *pin = NO_SEED;
                continue;
            };
            let distance = (particles[i].position - seed.controller.center).length();
            if distance < seed.controller.radius {
                *pin = NO_SEED;
            }
        }
    }

    /// Rebuild the controller list from this tick's regions, retire spent
    /// seeds and re-point pinned particles at the new list layout.
    pub fn rebuild(
        &mut self,
        regions: &[Region],
        origin: Vec3,
        anchor: Vec3,
        particles: &mut [Particle],
        pins: &mut [u32],
    ) {
        for seed in &mut self.seeds {
            seed.age += 1;
        }

        self.seed_counts.clear();
        self.seed_counts.resize(self.seeds.len(), 0);
        for &pin in pins.iter() {
            if pin == NO_SEED {
                continue;
            }
            if let Some(idx) = self.seeds.iter().position(|s| s.id == pin) {
                self.seed_counts[idx] += 1;
            }
        }

        let counts = &self.seed_counts;
        let mut kept = 0;
        let seeds = &mut self.seeds;
        for idx in 0..seeds.len() {
            let seed = seeds[idx];
            // A just-created seed (age 1 here) gets one tick of grace before
            // it must own pinned particles.
            if seed.age <= SEED_MAX_AGE && (counts[idx] > 0 || seed.age <= 1) {
                seeds[kept] = seed;
                kept += 1;
            }
        }
        seeds.truncate(kept);

        self.controllers.clear();
        if regions.is_empty() {
            self.controllers.push(Controller {
                center: Vec3::ZERO,
                radius: DEFAULT_RADIUS,
                velocity: Vec3::ZERO,
                concentration: self.concentration,
            });
        } else {
            for region in regions {
                let ext = region.max.as_vec3() - region.center;
                let radius = ((ext.x + ext.y + ext.z) * CELL_SIZE * 0.6).max(1.0);
                let mut center = origin + region.center * CELL_SIZE;
                if ext.y < FLAT_EXTENT_CELLS {
                    // Keep the attractor of flat puddles above the mass.
                    center.y += ext.y * FLAT_LIFT;
                }
                let velocity = if self.merge {
                    MERGE_SPEED * (anchor - center).normalize_or_zero()
                } else {
                    Vec3::ZERO
                };
                self.controllers.push(Controller {
                    center,
                    radius,
                    velocity,
                    concentration: self.concentration,
                });
            }
        }
        self.organic_count = self.controllers.len();
        if self.merge && self.organic_count == 1 {
            self.merge = false;
        }

        for seed in &self.seeds {
            self.controllers.push(seed.controller);
        }

        let organic = self.organic_count;
        let total = self.controllers.len();
        for (i, p) in particles.iter_mut().enumerate() {
            if pins[i] != NO_SEED {
                match self.seeds.iter().position(|s| s.id == pins[i]) {
                    Some(idx) => p.component = (organic + idx) as i32,
                    None => {
                        pins[i] = NO_SEED;
                        p.component = 0;
                    }
                }
            } else if p.component < 0 || p.component as usize >= total {
                p.component = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    fn region(center: Vec3, min: IVec3, max: IVec3) -> Region {
        Region {
            center,
            min,
            max,
            cells: 8,
        }
    }

    #[test]
    fn region_radius_tracks_extent() {
        let mut manager = ControllerManager::new(10.0);
        let regions = [region(
            Vec3::new(4.0, 4.0, 4.0),
            IVec3::ZERO,
            IVec3::splat(8),
        )];
        let mut particles = [];
        let mut pins = [];
        manager.rebuild(&regions, Vec3::ZERO, Vec3::ZERO, &mut particles, &mut pins);

        assert_eq!(manager.organic_count(), 1);
        let ctl = &manager.controllers()[0];
        // ext = (4,4,4): radius = 12 * cell * 0.6.
        assert!((ctl.radius - 12.0 * CELL_SIZE * 0.6).abs() < 1e-5);
        assert!((ctl.center - Vec3::new(2.0, 2.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn flat_regions_get_lifted_centers() {
        let mut manager = ControllerManager::new(10.0);
        let flat = [region(
            Vec3::new(4.0, 0.5, 4.0),
            IVec3::new(0, 0, 0),
            IVec3::new(8, 1, 8),
        )];
        let mut particles = [];
        let mut pins = [];
        manager.rebuild(&flat, Vec3::ZERO, Vec3::ZERO, &mut particles, &mut pins);

        let expected_y = 0.5 * CELL_SIZE + 0.5 * FLAT_LIFT;
        assert!((manager.controllers()[0].center.y - expected_y).abs() < 1e-5);
    }

    #[test]
    fn merge_clears_once_a_single_region_remains() {
        let mut manager = ControllerManager::new(10.0);
        manager.request_merge();

        let two = [
            region(Vec3::ZERO, IVec3::ZERO, IVec3::splat(2)),
            region(Vec3::splat(20.0), IVec3::splat(18), IVec3::splat(22)),
        ];
        let mut particles = [];
        let mut pins = [];
        let anchor = Vec3::new(50.0, 0.0, 0.0);
        manager.rebuild(&two, Vec3::ZERO, anchor, &mut particles, &mut pins);
        assert!(manager.merging());
        for ctl in &manager.controllers()[..manager.organic_count()] {
            assert!((ctl.velocity.length() - MERGE_SPEED).abs() < 1e-4);
        }

        let one = [region(Vec3::ZERO, IVec3::ZERO, IVec3::splat(2))];
        manager.rebuild(&one, Vec3::ZERO, anchor, &mut particles, &mut pins);
        assert!(!manager.merging());
    }

    #[test]
    fn seed_survives_while_it_owns_pins_and_repins_components() {
        let mut manager = ControllerManager::new(10.0);
        let id = manager.create_seed(Vec3::new(8.0, 1.0, 8.0), 2.0, None);
        assert_eq!(id, 1);
        assert_eq!(manager.seed_id_for(id), Some(0));

        let mut particles = [Particle {
            position: Vec3::ZERO,
            component: id as i32,
        }];
        let mut pins = [0u32];

        // Two organic regions appear: the seed keeps its particle pinned and
        // the component index shifts past the organic block.
        let regions = [
            region(Vec3::ZERO, IVec3::ZERO, IVec3::splat(2)),
            region(Vec3::splat(30.0), IVec3::splat(28), IVec3::splat(32)),
        ];
        manager.rebuild(&regions, Vec3::ZERO, Vec3::ZERO, &mut particles, &mut pins);
        assert_eq!(manager.len(), 3);
        assert_eq!(particles[0].component, 2);
        assert_eq!(pins[0], 0);

        // Once the particle is inside the seed radius it is released, and the
        // now-empty seed dies at the following rebuild.
        particles[0].position = Vec3::new(8.5, 1.0, 8.0);
        manager.release_arrivals(&particles, &mut pins);
        assert_eq!(pins[0], NO_SEED);
        manager.rebuild(&regions, Vec3::ZERO, Vec3::ZERO, &mut particles, &mut pins);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn empty_segmentation_keeps_a_default_controller() {
        let mut manager = ControllerManager::new(10.0);
        let mut particles = [Particle {
            position: Vec3::ZERO,
            component: 5,
        }];
        let mut pins = [NO_SEED];
        manager.rebuild(&[], Vec3::ZERO, Vec3::ZERO, &mut particles, &mut pins);
        assert_eq!(manager.len(), 1);
        // Out-of-range components collapse to the default.
        assert_eq!(particles[0].component, 0);
    }
}
