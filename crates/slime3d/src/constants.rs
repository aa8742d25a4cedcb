//! Fixed numeric contract of the simulation pipeline.
//!
//! These values are load-bearing for the geometry of the pipeline: the
//! density grid runs at half the kernel radius, a spatial-hash cell spans two
//! density cells, and a block spans two hash cells. The splat and blur caches
//! are sized from those ratios. Runtime tunables live in
//! [`crate::params::SlimeParams`].

/// SPH smoothing radius. The spatial hash is bucketed at this resolution.
pub const H: f32 = 1.0;

/// Precomputed `H * H` for squared-distance gates.
pub const H2: f32 = H * H;

/// Density grid resolution: two cells per kernel radius.
pub const CELL_SIZE: f32 = 0.5 * H;

/// Fixed simulation timestep (seconds).
pub const DT: f32 = 0.02;

/// Position-prediction step of the constraint solve.
pub const PREDICT_STEP: f32 = 0.02;

/// The full PBF pipeline runs this many times per tick.
pub const SOLVER_ROUNDS: usize = 2;

/// Rest density the density constraint drives toward.
pub const TARGET_DENSITY: f32 = 1.5;

/// Relaxation epsilon in the lambda denominator.
pub const LAMBDA_EPSILON: f32 = 1e-5;

/// Lower clamp on the density constraint; keeps sparse regions from
/// collapsing onto themselves.
pub const CONSTRAINT_FLOOR: f32 = -0.2;

/// Tensile-instability reference distance (`delta q` in the PBF paper).
pub const TENSILE_DQ: f32 = 0.25 * H;

/// Tensile-instability correction strength.
pub const TENSILE_K: f32 = 0.1;

/// Ground plane height; particle positions are clamped to stay above it.
pub const GROUND_HEIGHT: f32 = 1.0;

/// Cells per block edge.
pub const BLOCK_DIM: i32 = 4;

/// Cells per block (4 x 4 x 4).
pub const BLOCK_VOLUME: usize = 64;

/// Splat cache edge: a block plus a two-cell apron on each side.
pub const CACHE_DIM: i32 = 8;

/// Cells in a splat cache.
pub const CACHE_VOLUME: usize = 512;

/// Blur cache edge: a block plus a one-cell apron on each side.
pub const BLUR_DIM: i32 = 6;

/// Parity color classes; same-colored blocks have non-overlapping splat
/// caches and can be processed concurrently.
pub const COLOR_CLASSES: usize = 8;

/// Minimum filtered density for a cell to count as occupied.
pub const OCCUPANCY_EPSILON: f32 = 1e-4;

/// Speed applied to every region's controller while a merge is requested.
pub const MERGE_SPEED: f32 = 5.0;

/// Upward center bias per cell of vertical extent applied to flat regions.
pub const FLAT_LIFT: f32 = 0.05;

/// Regions with a vertical extent below this many cells get the lift.
pub const FLAT_EXTENT_CELLS: f32 = 3.0;

/// Per-tick smoothing factor for instance center, radius and facing.
pub const INSTANCE_SMOOTHING: f32 = 0.1;

/// Ticks before a seed controller is dropped regardless of pinned particles.
pub const SEED_MAX_AGE: u32 = 1800;
