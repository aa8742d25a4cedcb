//! Connected-component segmentation of the filtered density field.
//!
//! A cell is occupied when its filtered density exceeds a small epsilon.
//! Occupied cells are flood-filled through face adjacency, walking across
//! block boundaries via the block map; each maximal region gets a label and
//! an aggregate (center of mass, bounds, cell count). Labels are only
//! meaningful within the tick; continuity is reconstructed downstream by the
//! instance tracker, never by label identity.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::constants::{BLOCK_DIM, BLOCK_VOLUME, OCCUPANCY_EPSILON};
use crate::grid::{block_of, local_coord, local_index, DensityGrid};
use crate::Particle;

/// Aggregate of one connected region, in grid-cell coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    /// Mean occupied-cell coordinate.
    pub center: Vec3,
    pub min: IVec3,
    pub max: IVec3,
    pub cells: u32,
}

const FACES: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

pub struct ComponentSegmenter {
    /// Reusable flood-fill stack.
    stack: Vec<IVec3>,
}

impl ComponentSegmenter {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(4096),
        }
    }

    /// Label every occupied cell and emit one [`Region`] per label.
    pub fn segment(&mut self, grid: &mut DensityGrid, regions: &mut Vec<Region>) {
        regions.clear();
        let (keys, slots, filtered, labels) = grid.segmentation_parts();

        for (slot, key) in keys.iter().enumerate() {
            for j in 0..BLOCK_VOLUME {
                let idx = slot * BLOCK_VOLUME + j;
                if filtered[idx] <= OCCUPANCY_EPSILON || labels[idx] != -1 {
                    continue;
                }

                let label = regions.len() as i32;
                let start = *key * BLOCK_DIM + local_coord(j);
                labels[idx] = label;
                self.stack.push(start);

                let mut sum = Vec3::ZERO;
                let mut min = start;
                let mut max = start;
                let mut cells = 0u32;

                while let Some(cell) = self.stack.pop() {
                    cells += 1;
                    sum += cell.as_vec3();
                    min = min.min(cell);
                    max = max.max(cell);

                    for face in FACES {
                        let neighbor = cell + face;
                        let Some(&nslot) = slots.get(&block_of(neighbor)) else {
                            continue;
                        };
                        let nidx = nslot * BLOCK_VOLUME + local_index(neighbor);
                        if filtered[nidx] > OCCUPANCY_EPSILON && labels[nidx] == -1 {
                            labels[nidx] = label;
                            self.stack.push(neighbor);
                        }
                    }
                }

                regions.push(Region {
                    center: sum / cells as f32,
                    min,
                    max,
                    cells,
                });
            }
        }
    }
}

impl Default for ComponentSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-tag every particle with the label of the cell under its smoothed
/// position. This is the only channel through which segmentation decides
/// which controller attracts a particle next tick. Particles pinned to a seed
/// controller keep their assignment.
pub fn relabel_particles(
    grid: &DensityGrid,
    smoothed: &[Vec3],
    pins: &[u32],
    particles: &mut [Particle],
) {
    particles.par_iter_mut().enumerate().for_each(|(i, p)| {
        if pins[i] != crate::controller::NO_SEED {
            return;
        }
        let label = grid.label_at(grid.cell_of_position(smoothed[i]));
        p.component = if label >= 0 { label } else { 0 };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_blocks(keys: &[IVec3]) -> DensityGrid {
        let mut grid = DensityGrid::new(64);
        grid.reset(Vec3::ZERO);
        for &key in keys {
            assert!(grid.try_allocate(key));
        }
        grid
    }

    fn fill_cells(grid: &mut DensityGrid, cells: &[IVec3], value: f32) {
        for &cell in cells {
            let slot = grid.slot(block_of(cell)).unwrap();
            grid.filtered_plane_mut()[slot * BLOCK_VOLUME + local_index(cell)] = value;
        }
    }

    #[test]
    fn one_filled_block_is_one_region() {
        let mut grid = grid_with_blocks(&[IVec3::ZERO]);
        let all: Vec<IVec3> = (0..BLOCK_VOLUME).map(local_coord).collect();
        fill_cells(&mut grid, &all, 1.0);

        let mut segmenter = ComponentSegmenter::new();
        let mut regions = Vec::new();
        segmenter.segment(&mut grid, &mut regions);

        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert_eq!(region.cells, BLOCK_VOLUME as u32);
        assert_eq!(region.min, IVec3::ZERO);
        assert_eq!(region.max, IVec3::splat(3));
    }

    #[test]
    fn separated_clusters_get_distinct_labels() {
        let mut grid = grid_with_blocks(&[IVec3::ZERO]);
        // Two 1-cell regions with an empty cell between them.
        fill_cells(
            &mut grid,
            &[IVec3::new(0, 0, 0), IVec3::new(2, 0, 0)],
            1.0,
        );

        let mut segmenter = ComponentSegmenter::new();
        let mut regions = Vec::new();
        segmenter.segment(&mut grid, &mut regions);
        assert_eq!(regions.len(), 2);

        assert_ne!(
            grid.label_at(IVec3::new(0, 0, 0)),
            grid.label_at(IVec3::new(2, 0, 0))
        );
        assert_eq!(grid.label_at(IVec3::new(1, 0, 0)), -1);
    }

    #[test]
    fn fill_walks_across_block_boundaries() {
        let mut grid = grid_with_blocks(&[IVec3::ZERO, IVec3::new(1, 0, 0)]);
        // A strip of cells crossing the x boundary between the two blocks.
        let strip: Vec<IVec3> = (2..6).map(|x| IVec3::new(x, 1, 1)).collect();
        fill_cells(&mut grid, &strip, 2.0);

        let mut segmenter = ComponentSegmenter::new();
        let mut regions = Vec::new();
        segmenter.segment(&mut grid, &mut regions);

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].cells, 4);
        assert_eq!(regions[0].min, IVec3::new(2, 1, 1));
        assert_eq!(regions[0].max, IVec3::new(5, 1, 1));
    }

    #[test]
    fn particles_inherit_the_label_under_them() {
        let mut grid = grid_with_blocks(&[IVec3::ZERO]);
        let all: Vec<IVec3> = (0..BLOCK_VOLUME).map(local_coord).collect();
        fill_cells(&mut grid, &all, 1.0);

        let mut segmenter = ComponentSegmenter::new();
        let mut regions = Vec::new();
        segmenter.segment(&mut grid, &mut regions);

        let inside = grid.cell_center(IVec3::new(1, 1, 1));
        let outside = grid.cell_center(IVec3::new(20, 20, 20));
        let mut particles = vec![
            Particle {
                position: inside,
                component: 7,
            },
            Particle {
                position: outside,
                component: 7,
            },
        ];
        let smoothed = vec![inside, outside];
        let pins = vec![crate::controller::NO_SEED; 2];
        relabel_particles(&grid, &smoothed, &pins, &mut particles);

        assert_eq!(particles[0].component, 0);
        // Unlabeled space falls back to the default controller.
        assert_eq!(particles[1].component, 0);
    }
}
