//! SPH smoothing kernels for density estimation and constraint gradients.
//!
//! All callers gate on squared distance against `h^2` before taking a square
//! root; the kernels repeat the gate so they are safe in isolation.

use std::f32::consts::PI;

/// Poly6 kernel `W(r, h) = 315 / (64 pi h^9) * (h^2 - r^2)^3` for `r < h`.
///
/// Takes the squared distance to avoid the square root in density sums.
#[inline]
pub fn poly6(r2: f32, h: f32) -> f32 {
    let h2 = h * h;
    if r2 >= h2 {
        return 0.0;
    }
    let v = h2 - r2;
    315.0 / (64.0 * PI * h.powi(9)) * v * v * v
}

/// Spiky kernel value `15 / (pi h^6) * (h - r)^3` for `r < h`.
#[inline]
pub fn spiky(r: f32, h: f32) -> f32 {
    if r >= h {
        return 0.0;
    }
    let v = h - r;
    15.0 / (PI * h.powi(6)) * v * v * v
}

/// Radial derivative of the spiky kernel, `-45 / (pi h^6) * (h - r)^2`.
///
/// Negative inside the support: the kernel falls off with distance.
#[inline]
pub fn spiky_derivative(r: f32, h: f32) -> f32 {
    if r > h {
        return 0.0;
    }
    let v = h - r;
    -45.0 / (PI * h.powi(6)) * v * v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly6_peaks_at_zero_and_vanishes_at_h() {
        let h = 1.0;
        let w0 = poly6(0.0, h);
        assert!(w0 > 0.0);
        assert_eq!(poly6(h * h, h), 0.0);

        let w_half = poly6(0.25 * h * h, h);
        assert!(w_half < w0);
        assert!(w_half > 0.0);
    }

    #[test]
    fn poly6_scales_with_radius() {
        // Wider kernels are flatter at the origin.
        assert!(poly6(0.0, 2.0) < poly6(0.0, 1.0));
    }

    #[test]
    fn spiky_value_decreases_with_distance() {
        let h = 1.0;
        assert!(spiky(0.1, h) > spiky(0.5, h));
        assert_eq!(spiky(h, h), 0.0);
    }

    #[test]
    fn spiky_derivative_is_negative_inside_support() {
        let h = 1.0;
        assert!(spiky_derivative(0.3, h) < 0.0);
        assert_eq!(spiky_derivative(1.5, h), 0.0);
    }
}
