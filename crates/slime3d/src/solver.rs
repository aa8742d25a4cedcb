//! Position-Based-Fluids constraint solver.
//!
//! One substep runs external forces + prediction, a spatial-hash rebuild, the
//! lambda and position-correction passes of PBF, collision resolution,
//! velocity reconstruction and XSPH viscosity. The whole substep runs
//! [`crate::constants::SOLVER_ROUNDS`] times per tick. Every pass fans out
//! over particles with disjoint writes; nothing in here can fail at runtime;
//! degenerate directions and densities are neutralized instead of propagated.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::constants::{
    CONSTRAINT_FLOOR, DT, GROUND_HEIGHT, H, H2, LAMBDA_EPSILON, PREDICT_STEP, TARGET_DENSITY,
    TENSILE_DQ, TENSILE_K,
};
use crate::controller::{Controller, NO_SEED};
use crate::kernels;
use crate::obstacle::BoxObstacle;
use crate::spatial::{cell_coord, cell_key, SpatialHashIndex};
use crate::Particle;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Stage 1: damping, gravity, controller coupling and position prediction.
///
/// A particle inside its controller's radius blends toward the controller
/// velocity and is pulled at the cohesion strength toward a center lifted
/// slightly above the mass. Particles pinned to a seed are pulled wherever
/// they are, so launched material stays guided in flight.
#[allow(clippy::too_many_arguments)]
pub fn apply_external_forces(
    particles: &[Particle],
    controllers: &[Controller],
    pins: &[u32],
    velocities: &mut [Vec3],
    pos_old: &mut [Vec3],
    predicted: &mut [Vec3],
    gravity: Vec3,
    damping: f32,
) {
    velocities
        .par_iter_mut()
        .zip(pos_old.par_iter_mut())
        .zip(predicted.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((vel, old), pred))| {
            let p = &particles[i];
            let mut v = *vel * damping + gravity * DT;

            if let Some(ctl) = controllers.get(p.component as usize) {
                let target = ctl.center + Vec3::new(0.0, ctl.radius * 0.05, 0.0);
                let to_center = target - p.position;
                let len = to_center.length();
                if len < ctl.radius {
                    let t = lerp(1.0, len * 0.1, ctl.concentration * 0.002);
                    v = ctl.velocity.lerp(v, t);
                    v += ctl.concentration * DT * len.min(1.0) * to_center.normalize_or_zero();
                } else if pins[i] != NO_SEED {
                    v += ctl.concentration * DT * len.min(1.0) * to_center.normalize_or_zero();
                }
            }

            *old = p.position;
            *pred = p.position + v * PREDICT_STEP;
            *vel = v;
        });
}

/// Stage 3: density constraint multipliers.
///
/// `c = max(floor, density / rho0 - 1)`, `lambda = -c / (sum |grad c|^2 + eps)`
/// with a Poly6 density estimate and Spiky-derivative gradients.
pub fn compute_lambdas(predicted: &[Vec3], hash: &SpatialHashIndex, lambdas: &mut [f32]) {
    lambdas.par_iter_mut().enumerate().for_each(|(i, lambda)| {
        let pos = predicted[i];
        let coord = cell_coord(pos, H);
        let mut density = 0.0;
        let mut grad_i = Vec3::ZERO;
        let mut sum_grad_sq = 0.0;

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = cell_key(coord + IVec3::new(dx, dy, dz));
                    for &(_, j) in hash.cell(key) {
                        let j = j as usize;
                        if j == i {
                            continue;
                        }
                        let dir = pos - predicted[j];
                        let r2 = dir.length_squared();
                        if r2 > H2 {
                            continue;
                        }
                        density += kernels::poly6(r2, H);
                        let grad_j = kernels::spiky_derivative(r2.sqrt(), H) / TARGET_DENSITY
                            * dir.normalize_or_zero();
                        sum_grad_sq += grad_j.length_squared();
                        grad_i += grad_j;
                    }
                }
            }
        }

        sum_grad_sq += grad_i.length_squared();
        let c = (density / TARGET_DENSITY - 1.0).max(CONSTRAINT_FLOOR);
        *lambda = -c / (sum_grad_sq + LAMBDA_EPSILON);
    });
}

/// Stage 4: apply the position correction
/// `dp = sum (lambda_i + lambda_j + s_corr) * W_spiky(r) * r_hat / rho0`,
/// where `s_corr` is the tensile-instability term discouraging short-range
/// clustering. The corrected position is `predicted - dp`.
pub fn project_density_constraint(
    particles: &mut [Particle],
    predicted: &[Vec3],
    lambdas: &[f32],
    hash: &SpatialHashIndex,
) {
    let w_dq = kernels::poly6(TENSILE_DQ * TENSILE_DQ, H);

    particles.par_iter_mut().enumerate().for_each(|(i, p)| {
        let pos = predicted[i];
        let lambda_i = lambdas[i];
        let coord = cell_coord(pos, H);
        let mut dp = Vec3::ZERO;

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = cell_key(coord + IVec3::new(dx, dy, dz));
                    for &(_, j) in hash.cell(key) {
                        let j = j as usize;
                        if j == i {
                            continue;
                        }
                        let dir = pos - predicted[j];
                        let r2 = dir.length_squared();
                        if r2 >= H2 {
                            continue;
                        }
                        let r = r2.sqrt();
                        let grad = kernels::spiky(r, H) * dir.normalize_or_zero();
                        let corr = kernels::poly6(r2, H) / w_dq;
                        let s_corr = -TENSILE_K * corr * corr * corr * corr;
                        dp += (lambda_i + lambdas[j] + s_corr) * grad;
                    }
                }
            }
        }

        p.position = pos - dp / TARGET_DENSITY;
    });
}

/// Stage 5: ground plane and box obstacles.
pub fn resolve_collisions(particles: &mut [Particle], obstacles: &[BoxObstacle]) {
    particles.par_iter_mut().for_each(|p| {
        p.position.y = p.position.y.max(GROUND_HEIGHT);
        for obstacle in obstacles {
            p.position = obstacle.resolve(p.position);
        }
    });
}

/// Stage 6: back-difference velocities, speed-clamped.
pub fn reconstruct_velocities(
    particles: &[Particle],
    pos_old: &[Vec3],
    velocities: &mut [Vec3],
    max_speed: f32,
) {
    velocities.par_iter_mut().enumerate().for_each(|(i, vel)| {
        let v = (particles[i].position - pos_old[i]) / DT;
        *vel = v.length().min(max_speed) * v.normalize_or_zero();
    });
}

/// Stage 7: XSPH viscosity: blend every particle's velocity toward the
/// kernel-weighted average of its neighbors'.
pub fn apply_viscosity(
    predicted: &[Vec3],
    hash: &SpatialHashIndex,
    vel_in: &[Vec3],
    vel_out: &mut [Vec3],
    viscosity: f32,
) {
    vel_out.par_iter_mut().enumerate().for_each(|(i, out)| {
        let pos = predicted[i];
        let vel = vel_in[i];
        let coord = cell_coord(pos, H);
        let mut force = Vec3::ZERO;

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = cell_key(coord + IVec3::new(dx, dy, dz));
                    for &(_, j) in hash.cell(key) {
                        let j = j as usize;
                        if j == i {
                            continue;
                        }
                        let r2 = (pos - predicted[j]).length_squared();
                        if r2 > H2 {
                            continue;
                        }
                        force += (vel_in[j] - vel) * kernels::poly6(r2, H);
                    }
                }
            }
        }

        *out = vel + force / TARGET_DENSITY * viscosity * DT;
    });
}
