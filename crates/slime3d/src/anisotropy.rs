//! Anisotropic kernel shaping.
//!
//! Each particle gets a symmetric shape matrix built from the weighted
//! covariance of its neighborhood: eigendecompose, clamp the eigenvalues away
//! from zero, invert, and rebuild. Splatting then warps the cell-to-particle
//! direction through this matrix, stretching the kernel footprint along the
//! local spread so thin or flattened blobs reconstruct smoothly.

use glam::{Mat3, Vec3};

/// Eigenvalues below this fraction of the mean are clamped before inversion.
const EIGEN_FLOOR: f32 = 0.1;

/// Outer product `a * a^T`.
#[inline]
pub fn outer(a: Vec3) -> Mat3 {
    Mat3::from_cols(a * a.x, a * a.y, a * a.z)
}

#[inline]
pub fn trace(m: Mat3) -> f32 {
    m.x_axis.x + m.y_axis.y + m.z_axis.z
}

/// Eigendecomposition of a symmetric 3x3 matrix by cyclic Jacobi rotations.
///
/// Returns `(eigenvalues, eigenvectors)` with the eigenvectors as matrix
/// columns. Convergence for symmetric 3x3 input is a handful of sweeps.
pub fn jacobi_eigen(m: Mat3) -> (Vec3, Mat3) {
    let mut a = [
        [m.x_axis.x, m.y_axis.x, m.z_axis.x],
        [m.x_axis.y, m.y_axis.y, m.z_axis.y],
        [m.x_axis.z, m.y_axis.z, m.z_axis.z],
    ];
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..8 {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        if off < 1e-12 {
            break;
        }
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            let apq = a[p][q];
            if apq.abs() < 1e-12 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for k in 0..3 {
                let akp = a[k][p];
                let akq = a[k][q];
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let apk = a[p][k];
                let aqk = a[q][k];
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for k in 0..3 {
                let vkp = v[k][p];
                let vkq = v[k][q];
                v[k][p] = c * vkp - s * vkq;
                v[k][q] = s * vkp + c * vkq;
            }
        }
    }

    (
        Vec3::new(a[0][0], a[1][1], a[2][2]),
        Mat3::from_cols(
            Vec3::new(v[0][0], v[1][0], v[2][0]),
            Vec3::new(v[0][1], v[1][1], v[2][1]),
            Vec3::new(v[0][2], v[1][2], v[2][2]),
        ),
    )
}

/// Build the inverse-stretched shape matrix from a trace-normalized
/// covariance. The result is trace-normalized again so the average kernel
/// footprint stays at the isotropic radius.
pub fn shape_matrix(cov: Mat3) -> Mat3 {
    let (lambda, v) = jacobi_eigen(cov);
    let inv = Vec3::new(
        1.0 / lambda.x.max(EIGEN_FLOOR),
        1.0 / lambda.y.max(EIGEN_FLOOR),
        1.0 / lambda.z.max(EIGEN_FLOOR),
    );
    let m = v * Mat3::from_diagonal(inv) * v.transpose();
    let mean = trace(m) / 3.0;
    if mean > 1e-6 {
        m * (1.0 / mean)
    } else {
        Mat3::IDENTITY
    }
}
