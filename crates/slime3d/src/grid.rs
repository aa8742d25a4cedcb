//! Sparse block-structured density grid.
//!
//! Cells are grouped into 4x4x4 blocks, the unit of sparse allocation. Blocks
//! are addressed through a map from block coordinate to an allocation-ordered
//! slot; each slot owns 64 cells in the flat `density`, `filtered` and
//! `labels` planes. The grid is bounded by `max_blocks` and re-seeded every
//! tick from the particle bounding box; a lookup outside any allocated block
//! reads as empty.

use std::collections::HashMap;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::constants::{BLOCK_DIM, BLOCK_VOLUME, BLUR_DIM, CACHE_VOLUME, CELL_SIZE};

/// Block coordinate of a cell coordinate (arithmetic shift floors negatives).
#[inline]
pub fn block_of(cell: IVec3) -> IVec3 {
    IVec3::new(cell.x >> 2, cell.y >> 2, cell.z >> 2)
}

/// Index of a cell within its 4x4x4 block.
#[inline]
pub fn local_index(cell: IVec3) -> usize {
    ((cell.x & 3) + 4 * ((cell.y & 3) + 4 * (cell.z & 3))) as usize
}

/// Decode a 0..64 local index back to block-local coordinates.
#[inline]
pub fn local_coord(index: usize) -> IVec3 {
    let i = index as i32;
    IVec3::new(i & 3, (i >> 2) & 3, (i >> 4) & 3)
}

/// Index into an 8x8x8 splat cache.
#[inline]
pub fn cache_index(local: IVec3) -> usize {
    (local.x + 8 * (local.y + 8 * local.z)) as usize
}

pub struct DensityGrid {
    max_blocks: usize,
    origin: Vec3,
    /// block coordinate -> slot in allocation order
    slots: HashMap<IVec3, usize>,
    /// slot -> block coordinate
    keys: Vec<IVec3>,
    /// raw splatted density, `max_blocks * BLOCK_VOLUME`
    density: Vec<f32>,
    /// blurred density consumed downstream
    filtered: Vec<f32>,
    /// per-cell component label, -1 = unvisited
    labels: Vec<i32>,
}

impl DensityGrid {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            max_blocks,
            origin: Vec3::ZERO,
            slots: HashMap::with_capacity(max_blocks),
            keys: Vec::with_capacity(max_blocks),
            density: vec![0.0; max_blocks * BLOCK_VOLUME],
            filtered: vec![0.0; max_blocks * BLOCK_VOLUME],
            labels: vec![-1; max_blocks * BLOCK_VOLUME],
        }
    }

    /// Drop all blocks and re-seed the grid at a new origin.
    pub fn reset(&mut self, origin: Vec3) {
        self.origin = origin;
        self.slots.clear();
        self.keys.clear();
        self.density.fill(0.0);
        self.labels.fill(-1);
    }

    /// Ensure a block exists. Returns false once the block capacity is spent
    /// and the key is not already present.
    pub fn try_allocate(&mut self, key: IVec3) -> bool {
        if self.slots.contains_key(&key) {
            return true;
        }
        if self.keys.len() >= self.max_blocks {
            return false;
        }
        self.slots.insert(key, self.keys.len());
        self.keys.push(key);
        true
    }

    #[inline]
    pub fn slot(&self, key: IVec3) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    pub fn block_count(&self) -> usize {
        self.keys.len()
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    /// Allocated block coordinates in allocation order.
    pub fn keys(&self) -> &[IVec3] {
        &self.keys
    }

    /// World position of the grid minimum, aligned to block granularity.
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn cell_size(&self) -> f32 {
        CELL_SIZE
    }

    /// World edge length of one block.
    pub fn block_size(&self) -> f32 {
        BLOCK_DIM as f32 * CELL_SIZE
    }

    /// Grid-cell coordinate containing a world position.
    #[inline]
    pub fn cell_of_position(&self, pos: Vec3) -> IVec3 {
        ((pos - self.origin) / CELL_SIZE).floor().as_ivec3()
    }

    /// World-space center of a grid cell.
    #[inline]
    pub fn cell_center(&self, cell: IVec3) -> Vec3 {
        self.origin + (cell.as_vec3() + 0.5) * CELL_SIZE
    }

    /// Raw splatted density at a cell; absent blocks read as zero.
    #[inline]
    pub fn density_at(&self, cell: IVec3) -> f32 {
        match self.slot(block_of(cell)) {
            Some(slot) => self.density[slot * BLOCK_VOLUME + local_index(cell)],
            None => 0.0,
        }
    }

    /// Filtered density at a cell; absent blocks read as zero.
    #[inline]
    pub fn filtered_at(&self, cell: IVec3) -> f32 {
        match self.slot(block_of(cell)) {
            Some(slot) => self.filtered[slot * BLOCK_VOLUME + local_index(cell)],
            None => 0.0,
        }
    }

    /// Component label at a cell; absent blocks read as -1.
    #[inline]
    pub fn label_at(&self, cell: IVec3) -> i32 {
        match self.slot(block_of(cell)) {
            Some(slot) => self.labels[slot * BLOCK_VOLUME + local_index(cell)],
            None => -1,
        }
    }

    /// Add an 8x8x8 splat cache (a block plus a two-cell apron) into the
    /// block it belongs to and any allocated neighbors it overlaps. The cache
    /// is folded in aligned 2x2x2 chunks so each chunk lands in one block.
    pub(crate) fn fold_splat_cache(&mut self, block: IVec3, cache: &[f32; CACHE_VOLUME]) {
        let cache_min = block * BLOCK_DIM - IVec3::splat(2);
        for gz in 0..4 {
            for gy in 0..4 {
                for gx in 0..4 {
                    let chunk_min = cache_min + IVec3::new(gx * 2, gy * 2, gz * 2);
                    let Some(slot) = self.slot(block_of(chunk_min)) else {
                        continue;
                    };
                    for lz in 0..2 {
                        for ly in 0..2 {
                            for lx in 0..2 {
                                let cell = chunk_min + IVec3::new(lx, ly, lz);
                                self.density[slot * BLOCK_VOLUME + local_index(cell)] +=
                                    cache[cache_index(cell - cache_min)];
                            }
                        }
                    }
                }
            }
        }
    }

    /// Distance-weighted blur of the raw density into the filtered plane.
    ///
    /// Each block gathers a 6x6x6 padded neighborhood (absent neighbors read
    /// as zero) and averages the 3x3x3 surround of every cell with weights
    /// `1 - 0.5 * |offset|`, normalized so a uniform field passes through
    /// unchanged.
    pub(crate) fn blur(&mut self) {
        let n = self.keys.len();
        let keys = &self.keys;
        let slots = &self.slots;
        let density = &self.density;

        const PAD: usize = (BLUR_DIM * BLUR_DIM * BLUR_DIM) as usize;
        let pad_index = |c: IVec3| (c.x + BLUR_DIM * (c.y + BLUR_DIM * c.z)) as usize;

        self.filtered[..n * BLOCK_VOLUME]
            .par_chunks_mut(BLOCK_VOLUME)
            .zip(keys.par_iter())
            .for_each(|(out, &key)| {
                let mut pad = [0.0f32; PAD];
                let pad_min = key * BLOCK_DIM - IVec3::ONE;
                for dz in -1..=1 {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            let nkey = key + IVec3::new(dx, dy, dz);
                            let Some(&slot) = slots.get(&nkey) else {
                                continue;
                            };
                            for j in 0..BLOCK_VOLUME {
                                let coord = nkey * BLOCK_DIM + local_coord(j) - pad_min;
                                if coord.min_element() < 0 || coord.max_element() >= BLUR_DIM {
                                    continue;
                                }
                                pad[pad_index(coord)] = density[slot * BLOCK_VOLUME + j];
                            }
                        }
                    }
                }

                for (j, cell) in out.iter_mut().enumerate() {
                    let center = local_coord(j) + IVec3::ONE;
                    let mut sum = 0.0;
                    let mut weight = 0.0;
                    for dz in -1..=1 {
                        for dy in -1..=1 {
                            for dx in -1..=1 {
                                let offset = IVec3::new(dx, dy, dz);
                                let w = 1.0 - 0.5 * offset.as_vec3().length();
                                sum += w * pad[pad_index(center + offset)];
                                weight += w;
                            }
                        }
                    }
                    *cell = sum / weight;
                }
            });
    }

    /// Borrow the pieces needed by the component segmenter: block keys,
    /// block map, filtered densities and mutable labels.
    pub(crate) fn segmentation_parts(
        &mut self,
    ) -> (&[IVec3], &HashMap<IVec3, usize>, &[f32], &mut [i32]) {
        (&self.keys, &self.slots, &self.filtered, &mut self.labels)
    }

    /// March from `from` along `dir` until the filtered density drops below
    /// `threshold`; the crossing point approximates the surface. Returns
    /// `None` when the start is already outside or the direction is
    /// degenerate.
    pub fn surface_point(&self, from: Vec3, dir: Vec3, threshold: f32) -> Option<Vec3> {
        let dir = dir.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }
        if self.filtered_at(self.cell_of_position(from)) < threshold {
            return None;
        }
        let step = 0.5 * CELL_SIZE;
        for i in 1..=128 {
            let p = from + dir * (step * i as f32);
            if self.filtered_at(self.cell_of_position(p)) < threshold {
                return Some(p);
            }
        }
        None
    }

    /// Read-only view of the filtered field for the surface consumer.
    pub fn field_view(&self, threshold: f32) -> DensityFieldView<'_> {
        DensityFieldView {
            grid: self,
            threshold,
        }
    }

    #[cfg(test)]
    pub(crate) fn density_plane_mut(&mut self) -> &mut [f32] {
        &mut self.density
    }

    #[cfg(test)]
    pub(crate) fn filtered_plane_mut(&mut self) -> &mut [f32] {
        &mut self.filtered
    }
}

/// Snapshot handle over the filtered density field, addressed in grid cells.
/// Everything an external marching-cubes pass needs: block keys, origin, cell
/// size, densities and the surface threshold.
pub struct DensityFieldView<'a> {
    grid: &'a DensityGrid,
    threshold: f32,
}

impl DensityFieldView<'_> {
    pub fn origin(&self) -> Vec3 {
        self.grid.origin()
    }

    pub fn cell_size(&self) -> f32 {
        self.grid.cell_size()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn blocks(&self) -> &[IVec3] {
        self.grid.keys()
    }

    pub fn density(&self, cell: IVec3) -> f32 {
        self.grid.filtered_at(cell)
    }

    pub fn cell_center(&self, cell: IVec3) -> Vec3 {
        self.grid.cell_center(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addressing_round_trips() {
        for i in 0..BLOCK_VOLUME {
            assert_eq!(local_index(local_coord(i)), i);
        }
    }

    #[test]
    fn block_of_floors_negative_cells() {
        assert_eq!(block_of(IVec3::new(-1, 0, 3)), IVec3::new(-1, 0, 0));
        assert_eq!(block_of(IVec3::new(-4, -5, 7)), IVec3::new(-1, -2, 1));
    }

    #[test]
    fn allocation_stops_at_capacity() {
        let mut grid = DensityGrid::new(2);
        grid.reset(Vec3::ZERO);
        assert!(grid.try_allocate(IVec3::new(0, 0, 0)));
        assert!(grid.try_allocate(IVec3::new(1, 0, 0)));
        // Existing key still succeeds, a new one does not.
        assert!(grid.try_allocate(IVec3::new(0, 0, 0)));
        assert!(!grid.try_allocate(IVec3::new(2, 0, 0)));
        assert_eq!(grid.block_count(), 2);
    }

    #[test]
    fn absent_blocks_read_empty() {
        let grid = DensityGrid::new(4);
        assert_eq!(grid.density_at(IVec3::new(10, 10, 10)), 0.0);
        assert_eq!(grid.filtered_at(IVec3::new(10, 10, 10)), 0.0);
        assert_eq!(grid.label_at(IVec3::new(10, 10, 10)), -1);
    }

    #[test]
    fn fold_distributes_into_adjacent_blocks() {
        let mut grid = DensityGrid::new(8);
        grid.reset(Vec3::ZERO);
        grid.try_allocate(IVec3::ZERO);
        grid.try_allocate(IVec3::new(-1, 0, 0));

        let mut cache = [0.0f32; CACHE_VOLUME];
        // Cache cell at local (0,2,2) = global cell (-2,0,0): block (-1,0,0).
        cache[cache_index(IVec3::new(0, 2, 2))] = 2.5;
        // Cache cell at local (2,2,2) = global cell (0,0,0): block (0,0,0).
        cache[cache_index(IVec3::new(2, 2, 2))] = 1.5;
        grid.fold_splat_cache(IVec3::ZERO, &cache);

        assert_eq!(grid.density_at(IVec3::new(-2, 0, 0)), 2.5);
        assert_eq!(grid.density_at(IVec3::new(0, 0, 0)), 1.5);
    }

    #[test]
    fn uniform_field_survives_blur() {
        let mut grid = DensityGrid::new(27);
        grid.reset(Vec3::ZERO);
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    grid.try_allocate(IVec3::new(x, y, z));
                }
            }
        }
        grid.density_plane_mut()[..27 * BLOCK_VOLUME].fill(2.0);
        grid.blur();

        // The interior block is fully surrounded by uniform density, so the
        // normalized weights must leave it untouched.
        let center_slot = grid.slot(IVec3::new(1, 1, 1)).unwrap();
        for j in 0..BLOCK_VOLUME {
            let cell = IVec3::new(1, 1, 1) * BLOCK_DIM + local_coord(j);
            assert_eq!(grid.slot(block_of(cell)), Some(center_slot));
            let value = grid.filtered_at(cell);
            assert!(
                (value - 2.0).abs() < 1e-4,
                "cell {:?} changed: {}",
                cell,
                value
            );
        }
    }

    #[test]
    fn surface_ray_finds_the_density_falloff() {
        let mut grid = DensityGrid::new(8);
        grid.reset(Vec3::ZERO);
        grid.try_allocate(IVec3::ZERO);
        // Fill only the x < 2 half of the block above threshold.
        for j in 0..BLOCK_VOLUME {
            let c = local_coord(j);
            let v = if c.x < 2 { 3.0 } else { 0.0 };
            grid.filtered_plane_mut()[j] = v;
        }

        let from = grid.cell_center(IVec3::new(0, 1, 1));
        let hit = grid
            .surface_point(from, Vec3::X, 1.0)
            .expect("ray should exit the dense half");
        assert!(hit.x > from.x);
        assert!(hit.x < 2.0);

        // Starting outside the surface yields nothing.
        let outside = grid.cell_center(IVec3::new(3, 1, 1));
        assert!(grid.surface_point(outside, Vec3::X, 1.0).is_none());
    }
}
