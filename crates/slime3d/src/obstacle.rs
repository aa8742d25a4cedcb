//! Static box obstacles.
//!
//! Gathered once at startup from the host scene and read-only afterwards.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned box collider.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoxObstacle {
    pub center: Vec3,
    pub half_extent: Vec3,
}

impl BoxObstacle {
    pub fn new(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            center,
            half_extent,
        }
    }

    /// Push a position out along the axis of least penetration if it is
    /// inside the box; otherwise return it unchanged.
    pub fn resolve(&self, pos: Vec3) -> Vec3 {
        let dir = pos - self.center;
        let dist = dir.abs();
        if dist.x >= self.half_extent.x
            || dist.y >= self.half_extent.y
            || dist.z >= self.half_extent.z
        {
            return pos;
        }

        let remain = self.half_extent - dist;
        let mut axis = 0;
        if remain.y < remain[axis] {
            axis = 1;
        }
        if remain.z < remain[axis] {
            axis = 2;
        }

        let mut out = pos;
        out[axis] = self.center[axis] + dir[axis].signum() * self.half_extent[axis];
        out
    }
}
