//! Cosmetic bubbles riding the velocity field.
//!
//! A fixed pool of lightweight particles emitted inside the dense interior of
//! the slime. They drift upward, get dragged by the kernel-weighted local
//! particle velocity, and recycle when their lifetime ends or they leave the
//! body. Purely presentational; nothing here feeds back into the solver.

use glam::{IVec3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{BLOCK_DIM, BLOCK_VOLUME, DT, H, H2, TARGET_DENSITY};
use crate::grid::{local_coord, DensityGrid};
use crate::kernels;
use crate::spatial::{cell_coord, cell_key, SpatialHashIndex};

/// Emission attempts per tick.
const SPAWN_ATTEMPTS: usize = 8;
/// Bubbles only exist where the field is comfortably above the surface
/// threshold.
const INTERIOR_FACTOR: f32 = 1.2;
/// Bubbles couple to the fluid far more weakly than particles do to each
/// other.
const DRAG_SCALE: f32 = 1.0 / 50.0;

#[derive(Clone, Copy, Debug)]
pub struct Bubble {
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    /// Remaining lifetime in seconds; dead bubbles are negative.
    pub life: f32,
}

pub struct BubbleSystem {
    bubbles: Vec<Bubble>,
    free: Vec<usize>,
}

impl BubbleSystem {
    pub fn new(capacity: usize) -> Self {
        Self {
            bubbles: vec![
                Bubble {
                    position: Vec3::ZERO,
                    velocity: Vec3::ZERO,
                    radius: 0.0,
                    life: -1.0,
                };
                capacity
            ],
            free: (0..capacity).collect(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.bubbles.len() - self.free.len()
    }

    pub fn active(&self) -> impl Iterator<Item = &Bubble> {
        self.bubbles.iter().filter(|b| b.life > 0.0)
    }

    /// Emit, advect and recycle for one tick. Seeded from the tick counter so
    /// a run stays reproducible.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        grid: &DensityGrid,
        hash: &SpatialHashIndex,
        predicted: &[Vec3],
        velocities: &[Vec3],
        threshold: f32,
        bubble_speed: f32,
        viscosity: f32,
        frame: u64,
    ) {
        let mut rng = StdRng::seed_from_u64(frame);
        let interior = threshold * INTERIOR_FACTOR;

        if grid.block_count() > 0 {
            for _ in 0..SPAWN_ATTEMPTS {
                if self.free.is_empty() {
                    break;
                }
                let slot = rng.gen_range(0..grid.block_count());
                let local = rng.gen_range(0..BLOCK_VOLUME);
                let cell = grid.keys()[slot] * BLOCK_DIM + local_coord(local);
                if grid.filtered_at(cell) < interior {
                    continue;
                }
                let Some(idx) = self.free.pop() else {
                    break;
                };
                let jitter = Vec3::new(
                    rng.gen_range(-0.2..0.2),
                    rng.gen_range(-0.2..0.2),
                    rng.gen_range(-0.2..0.2),
                );
                self.bubbles[idx] = Bubble {
                    position: grid.cell_center(cell) + jitter,
                    velocity: Vec3::ZERO,
                    radius: rng.gen_range(0.05..0.2),
                    life: rng.gen_range(2.0..6.0),
                };
            }
        }

        for i in 0..self.bubbles.len() {
            let bubble = &mut self.bubbles[i];
            if bubble.life <= 0.0 {
                continue;
            }

            let coord = cell_coord(bubble.position, H);
            let mut drag = Vec3::ZERO;
            for dz in -1..=1 {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let key = cell_key(coord + IVec3::new(dx, dy, dz));
                        for &(_, j) in hash.cell(key) {
                            let j = j as usize;
                            let r2 = (bubble.position - predicted[j]).length_squared();
                            if r2 > H2 {
                                continue;
                            }
                            drag += (velocities[j] - bubble.velocity) * kernels::poly6(r2, H);
                        }
                    }
                }
            }

            bubble.velocity += drag / TARGET_DENSITY * viscosity * DRAG_SCALE * DT;
            bubble.velocity.y += 0.01 * bubble_speed;
            bubble.velocity *= 0.98;
            bubble.position += bubble.velocity;
            bubble.life -= DT;

            let here = grid.filtered_at(grid.cell_of_position(bubble.position));
            if bubble.life <= 0.0 || here < interior {
                bubble.life = -1.0;
                self.free.push(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_grid() -> DensityGrid {
        let mut grid = DensityGrid::new(8);
        grid.reset(Vec3::ZERO);
        grid.try_allocate(IVec3::ZERO);
        grid.filtered_plane_mut()[..BLOCK_VOLUME].fill(5.0);
        grid
    }

    #[test]
    fn bubbles_spawn_in_dense_cells_and_rise() {
        let grid = dense_grid();
        let mut hash = SpatialHashIndex::new(1, H);
        hash.build(&[]);
        let mut bubbles = BubbleSystem::new(16);

        bubbles.update(&grid, &hash, &[], &[], 1.0, 1.0, 1.0, 1);
        assert!(bubbles.active_count() > 0);

        let start_y: f32 = bubbles.active().map(|b| b.position.y).sum();
        for frame in 2..6 {
            bubbles.update(&grid, &hash, &[], &[], 1.0, 1.0, 1.0, frame);
        }
        let end_y: f32 = bubbles.active().map(|b| b.position.y).sum();
        assert!(bubbles.active_count() > 0);
        assert!(end_y > start_y, "bubbles should drift upward");
    }

    #[test]
    fn bubbles_pop_outside_the_body() {
        let mut grid = dense_grid();
        let mut hash = SpatialHashIndex::new(1, H);
        hash.build(&[]);
        let mut bubbles = BubbleSystem::new(16);
        bubbles.update(&grid, &hash, &[], &[], 1.0, 1.0, 1.0, 1);
        assert!(bubbles.active_count() > 0);

        // The body vanishes: every bubble recycles on the next tick.
        grid.filtered_plane_mut()[..BLOCK_VOLUME].fill(0.0);
        bubbles.update(&grid, &hash, &[], &[], 1.0, 1.0, 1.0, 2);
        assert_eq!(bubbles.active_count(), 0);
    }

    #[test]
    fn empty_grid_spawns_nothing() {
        let mut grid = DensityGrid::new(4);
        grid.reset(Vec3::ZERO);
        let mut hash = SpatialHashIndex::new(1, H);
        hash.build(&[]);
        let mut bubbles = BubbleSystem::new(4);
        bubbles.update(&grid, &hash, &[], &[], 1.0, 1.0, 1.0, 1);
        assert_eq!(bubbles.active_count(), 0);
    }
}
