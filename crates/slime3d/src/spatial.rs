//! Uniform-grid spatial hash with sorted, range-addressed buckets.
//!
//! Particles are bucketed at the kernel radius, so a neighbor query scans the
//! 3x3x3 cells around the query cell. The index is rebuilt once per solver
//! substep from predicted positions: keys are computed per particle, the
//! `(key, index)` pairs are sorted, and a lookup table maps each key to its
//! contiguous range of the sorted order. A key that is absent simply means an
//! empty cell.

use std::collections::HashMap;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

/// Discretize a position to hash-cell coordinates at resolution `h`.
#[inline]
pub fn cell_coord(pos: Vec3, h: f32) -> IVec3 {
    (pos / h).floor().as_ivec3()
}

/// Pack a cell coordinate into a single key, 10 bits per axis.
///
/// Coordinates alias modulo 1024; cells that far apart landing in one bucket
/// only cost extra distance checks in the neighborhood scan.
#[inline]
pub fn cell_key(coord: IVec3) -> u32 {
    let x = (coord.x & 1023) as u32;
    let y = (coord.y & 1023) as u32;
    let z = (coord.z & 1023) as u32;
    (x << 20) | (y << 10) | z
}

pub struct SpatialHashIndex {
    /// `(cell key, particle index)` pairs, sorted by key.
    entries: Vec<(u32, u32)>,
    /// key -> `[start, end)` range into `entries`.
    ranges: HashMap<u32, (u32, u32)>,
    cell_size: f32,
}

impl SpatialHashIndex {
    pub fn new(capacity: usize, cell_size: f32) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ranges: HashMap::with_capacity(capacity),
            cell_size,
        }
    }

    /// Rebuild the index from the given positions. Reuses all buffers.
    pub fn build(&mut self, positions: &[Vec3]) {
        let cell_size = self.cell_size;
        self.entries.clear();
        self.entries.extend(
            positions
                .iter()
                .enumerate()
                .map(|(i, &p)| (cell_key(cell_coord(p, cell_size)), i as u32)),
        );
        self.entries.par_sort_unstable();

        self.ranges.clear();
        let mut start = 0;
        for i in 1..=self.entries.len() {
            if i == self.entries.len() || self.entries[i].0 != self.entries[start].0 {
                self.ranges
                    .insert(self.entries[start].0, (start as u32, i as u32));
                start = i;
            }
        }
    }

    /// Sorted `(key, particle index)` entries for one cell; empty if absent.
    #[inline]
    pub fn cell(&self, key: u32) -> &[(u32, u32)] {
        match self.ranges.get(&key) {
            Some(&(start, end)) => &self.entries[start as usize..end as usize],
            None => &[],
        }
    }

    /// All `(key, [start, end))` ranges currently indexed.
    pub fn ranges(&self) -> impl Iterator<Item = (u32, (u32, u32))> + '_ {
        self.ranges.iter().map(|(&k, &r)| (k, r))
    }

    /// Sorted entry list backing the ranges.
    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_separates_adjacent_cells() {
        let a = cell_key(IVec3::new(0, 0, 0));
        let b = cell_key(IVec3::new(1, 0, 0));
        let c = cell_key(IVec3::new(0, 1, 0));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn negative_coordinates_get_distinct_keys() {
        let a = cell_key(IVec3::new(-1, 0, 0));
        let b = cell_key(IVec3::new(0, 0, 0));
        let c = cell_key(IVec3::new(-2, -2, -2));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn build_groups_particles_by_cell() {
        let mut index = SpatialHashIndex::new(8, 1.0);
        let positions = vec![
            Vec3::new(0.2, 0.2, 0.2),
            Vec3::new(5.5, 0.0, 0.0),
            Vec3::new(0.8, 0.4, 0.1),
        ];
        index.build(&positions);

        let key = cell_key(IVec3::ZERO);
        let bucket = index.cell(key);
        assert_eq!(bucket.len(), 2);
        let mut found: Vec<u32> = bucket.iter().map(|&(_, i)| i).collect();
        found.sort_unstable();
        assert_eq!(found, vec![0, 2]);

        assert!(index.cell(cell_key(IVec3::new(3, 3, 3))).is_empty());
    }

    #[test]
    fn ranges_cover_every_particle_exactly_once() {
        let mut index = SpatialHashIndex::new(64, 1.0);
        let positions: Vec<Vec3> = (0..50)
            .map(|i| Vec3::new((i % 7) as f32 * 0.9, (i % 3) as f32, (i / 10) as f32))
            .collect();
        index.build(&positions);

        let mut seen = vec![false; positions.len()];
        for (key, (start, end)) in index.ranges() {
            assert!(start < end);
            for &(k, i) in &index.entries()[start as usize..end as usize] {
                assert_eq!(k, key);
                assert!(!seen[i as usize]);
                seen[i as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn empty_build_is_fine() {
        let mut index = SpatialHashIndex::new(4, 1.0);
        index.build(&[]);
        assert!(index.is_empty());
        assert_eq!(index.cell(cell_key(IVec3::ZERO)).len(), 0);
    }
}
