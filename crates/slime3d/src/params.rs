//! Runtime-tunable simulation parameters.

use serde::{Deserialize, Serialize};

use crate::error::SlimeError;

/// Tunable parameters of a [`crate::SlimeSimulation3D`].
///
/// Capacities are fixed for the lifetime of the simulation; the remaining
/// fields shape the feel of the slime and are safe to adjust between ticks
/// through the accessors on the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SlimeParams {
    /// Maximum number of particles; buffers are sized once from this.
    pub particle_capacity: usize,
    /// Maximum number of 4x4x4 density blocks. When particles spread farther
    /// than this covers, the density field silently stops allocating.
    pub max_blocks: usize,
    /// Gravity along Y (negative = down).
    pub gravity: f32,
    /// Cohesion strength: how hard controllers pull their particles inward.
    pub concentration: f32,
    /// XSPH viscosity strength; higher reads thicker.
    pub viscosity: f32,
    /// Per-substep velocity damping factor.
    pub damping: f32,
    /// Hard cap on particle speed after the constraint solve.
    pub max_speed: f32,
    /// Density threshold for the reconstructed surface. Consumed by the
    /// marching-cubes collaborator and by surface ray queries.
    pub threshold: f32,
    /// Warp the splat kernel along the local particle spread. Smooths thin
    /// and flattened blobs at the cost of one eigendecomposition per particle.
    pub use_anisotropic: bool,
    /// Size of the cosmetic bubble pool.
    pub bubble_capacity: usize,
    /// Rise speed factor for bubbles, 0..1.
    pub bubble_speed: f32,
}

impl Default for SlimeParams {
    fn default() -> Self {
        Self {
            particle_capacity: 2048,
            max_blocks: 2048,
            gravity: -5.0,
            concentration: 10.0,
            viscosity: 1.0,
            damping: 0.99,
            max_speed: 30.0,
            threshold: 1.0,
            use_anisotropic: true,
            bubble_capacity: 2048,
            bubble_speed: 0.2,
        }
    }
}

impl SlimeParams {
    /// Check that the parameters describe a runnable simulation.
    pub fn validate(&self) -> Result<(), SlimeError> {
        if self.particle_capacity == 0 {
            return Err(SlimeError::NoParticleCapacity);
        }
        if self.max_blocks == 0 {
            return Err(SlimeError::NoBlockCapacity);
        }
        if self.threshold <= 0.0 {
            return Err(SlimeError::non_positive("threshold", self.threshold));
        }
        if self.max_speed <= 0.0 {
            return Err(SlimeError::non_positive("max_speed", self.max_speed));
        }
        if self.damping <= 0.0 {
            return Err(SlimeError::non_positive("damping", self.damping));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(SlimeParams::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let params = SlimeParams {
            particle_capacity: 0,
            ..Default::default()
        };
        assert_eq!(params.validate(), Err(SlimeError::NoParticleCapacity));
    }

    #[test]
    fn params_round_trip_through_serde() {
        let params = SlimeParams {
            gravity: -9.8,
            use_anisotropic: false,
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: SlimeParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.gravity, params.gravity);
        assert!(!back.use_anisotropic);
        assert_eq!(back.particle_capacity, params.particle_capacity);
    }
}
