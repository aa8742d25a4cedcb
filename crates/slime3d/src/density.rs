//! Density-field construction: smoothed particle positions, optional
//! anisotropic shaping, sparse block allocation, colored kernel splatting and
//! the final blur.
//!
//! Splatting is partitioned into eight parity color classes. Two blocks of
//! the same color are at least two blocks apart per differing axis, so their
//! 8x8x8 splat caches (block plus two-cell apron) never overlap and a whole
//! class can fill its caches concurrently. The folds into the shared density
//! plane run outside the parallel section.

use glam::{IVec3, Mat3, Vec3};
use log::warn;
use rayon::prelude::*;

use crate::anisotropy::{outer, shape_matrix, trace};
use crate::constants::{BLOCK_DIM, CACHE_DIM, CACHE_VOLUME, CELL_SIZE, COLOR_CLASSES, H, H2};
use crate::grid::{cache_index, DensityGrid};
use crate::kernels;
use crate::spatial::{cell_coord, cell_key, SpatialHashIndex};
use crate::Particle;

pub struct DensityFieldBuilder {
    /// Per-block splat caches, reused across ticks.
    caches: Vec<[f32; CACHE_VOLUME]>,
    /// Block slots grouped by parity color, rebuilt per tick.
    color_slots: [Vec<usize>; COLOR_CLASSES],
}

impl DensityFieldBuilder {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            caches: vec![[0.0; CACHE_VOLUME]; max_blocks],
            color_slots: Default::default(),
        }
    }

    /// Run the full reconstruction: fills `smoothed` (and `shapes` when
    /// anisotropy is on), re-seeds and populates the grid, and returns the
    /// block-aligned world bounds of the particle cloud.
    pub fn build(
        &mut self,
        grid: &mut DensityGrid,
        hash: &SpatialHashIndex,
        particles: &[Particle],
        smoothed: &mut [Vec3],
        shapes: &mut [Mat3],
        use_anisotropic: bool,
    ) -> (Vec3, Vec3) {
        compute_smoothed_positions(particles, hash, smoothed);
        if use_anisotropic {
            compute_shapes(particles, hash, smoothed, shapes);
        }

        let (min, max) = bounds(smoothed);
        let block_size = grid.block_size();
        let origin = (min / block_size).floor() * block_size;
        let outer_bound = (max / block_size).ceil() * block_size;
        grid.reset(origin);

        self.allocate_blocks(grid, smoothed);
        self.partition_colors(grid);
        self.splat(grid, hash, smoothed, shapes, use_anisotropic);
        grid.blur();

        (origin, outer_bound)
    }

    /// Ensure blocks exist for every cell a particle can splat into (its cell
    /// dilated by two). Allocation runs in particle order and stops silently
    /// once the block capacity is spent.
    fn allocate_blocks(&mut self, grid: &mut DensityGrid, smoothed: &[Vec3]) {
        let mut exhausted = false;
        'particles: for pos in smoothed {
            let cell = grid.cell_of_position(*pos);
            for bz in (cell.z - 2) >> 2..=(cell.z + 2) >> 2 {
                for by in (cell.y - 2) >> 2..=(cell.y + 2) >> 2 {
                    for bx in (cell.x - 2) >> 2..=(cell.x + 2) >> 2 {
                        if !grid.try_allocate(IVec3::new(bx, by, bz)) {
                            exhausted = true;
                            break 'particles;
                        }
                    }
                }
            }
        }
        if exhausted {
            warn!(
                "density block capacity ({}) exhausted; remaining particles dropped from the surface",
                grid.max_blocks()
            );
        }
    }

    fn partition_colors(&mut self, grid: &DensityGrid) {
        for class in &mut self.color_slots {
            class.clear();
        }
        for (slot, key) in grid.keys().iter().enumerate() {
            let color = ((key.x & 1) | ((key.y & 1) << 1) | ((key.z & 1) << 2)) as usize;
            self.color_slots[color].push(slot);
        }
    }

    fn splat(
        &mut self,
        grid: &mut DensityGrid,
        hash: &SpatialHashIndex,
        smoothed: &[Vec3],
        shapes: &[Mat3],
        use_anisotropic: bool,
    ) {
        for class in &self.color_slots {
            let caches = &mut self.caches[..class.len()];
            caches
                .par_iter_mut()
                .zip(class.par_iter())
                .for_each(|(cache, &slot)| {
                    fill_cache(
                        cache,
                        grid.keys()[slot],
                        grid.origin(),
                        hash,
                        smoothed,
                        shapes,
                        use_anisotropic,
                    );
                });
            for (cache, &slot) in caches.iter().zip(class.iter()) {
                grid.fold_splat_cache(grid.keys()[slot], cache);
            }
        }
    }
}

/// Poly6-weighted average of neighbor positions. Stabilizes the covariance
/// pass and keeps the splatted surface from rippling with solver noise.
fn compute_smoothed_positions(
    particles: &[Particle],
    hash: &SpatialHashIndex,
    smoothed: &mut [Vec3],
) {
    smoothed.par_iter_mut().enumerate().for_each(|(i, out)| {
        let pos = particles[i].position;
        let coord = cell_coord(pos, H);
        let mut weight = 0.0;
        let mut sum = Vec3::ZERO;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = cell_key(coord + IVec3::new(dx, dy, dz));
                    for &(_, j) in hash.cell(key) {
                        let neighbor = particles[j as usize].position;
                        let r2 = (pos - neighbor).length_squared();
                        if r2 > H2 {
                            continue;
                        }
                        let w = kernels::poly6(r2, H);
                        weight += w;
                        sum += neighbor * w;
                    }
                }
            }
        }
        *out = if weight > 1e-5 { sum / weight } else { pos };
    });
}

/// Weighted covariance of neighbor offsets around the smoothed mean, turned
/// into an inverse-stretch shape matrix per particle.
fn compute_shapes(
    particles: &[Particle],
    hash: &SpatialHashIndex,
    smoothed: &[Vec3],
    shapes: &mut [Mat3],
) {
    shapes.par_iter_mut().enumerate().for_each(|(i, shape)| {
        let pos = particles[i].position;
        let mean = smoothed[i];
        let coord = cell_coord(pos, H);
        let mut weight = 0.0;
        let mut cov = Mat3::ZERO;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = cell_key(coord + IVec3::new(dx, dy, dz));
                    for &(_, j) in hash.cell(key) {
                        let offset = particles[j as usize].position - mean;
                        let r2 = offset.length_squared();
                        if r2 > H2 {
                            continue;
                        }
                        let w = kernels::poly6(r2, H);
                        cov += outer(offset) * w;
                        weight += w;
                    }
                }
            }
        }

        let mut cov = if weight > 1e-5 {
            cov * (1.0 / weight)
        } else {
            Mat3::IDENTITY
        };
        let mean_trace = trace(cov) / 3.0;
        if mean_trace > 1e-6 {
            cov *= 1.0 / mean_trace;
        }
        *shape = shape_matrix(cov);
    });
}

fn bounds(positions: &[Vec3]) -> (Vec3, Vec3) {
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for p in positions {
        min = min.min(*p);
        max = max.max(*p);
    }
    if positions.is_empty() {
        (Vec3::ZERO, Vec3::ZERO)
    } else {
        (min, max)
    }
}

/// Splat every particle hashed into the 2x2x2 hash cells covering `block`
/// into an 8x8x8 cache: the block's cells plus a two-cell apron. A particle's
/// 5x5x5 cell footprint always fits the cache of the block that gathers it.
fn fill_cache(
    cache: &mut [f32; CACHE_VOLUME],
    block: IVec3,
    origin: Vec3,
    hash: &SpatialHashIndex,
    smoothed: &[Vec3],
    shapes: &[Mat3],
    use_anisotropic: bool,
) {
    cache.fill(0.0);
    let cache_min = block * BLOCK_DIM - IVec3::splat(2);
    // One block spans two hash cells per axis.
    let hash_base = cell_coord(origin, H) + block * 2;

    for hz in 0..2 {
        for hy in 0..2 {
            for hx in 0..2 {
                let key = cell_key(hash_base + IVec3::new(hx, hy, hz));
                for &(_, j) in hash.cell(key) {
                    let j = j as usize;
                    let rel = smoothed[j] - origin;
                    let center_cell = (rel / CELL_SIZE).floor().as_ivec3();
                    for dz in -2..=2 {
                        for dy in -2..=2 {
                            for dx in -2..=2 {
                                let cell = center_cell + IVec3::new(dx, dy, dz);
                                let local = cell - cache_min;
                                if local.min_element() < 0 || local.max_element() >= CACHE_DIM {
                                    continue;
                                }
                                let cell_center = (cell.as_vec3() + 0.5) * CELL_SIZE;
                                let mut dir = cell_center - rel;
                                if use_anisotropic {
                                    dir = shapes[j] * dir;
                                }
                                let r2 = dir.length_squared();
                                if r2 > H2 {
                                    continue;
                                }
                                cache[cache_index(local)] += kernels::poly6(r2, H);
                            }
                        }
                    }
                }
            }
        }
    }
}
