//! Stable presentation entities over volatile per-tick regions.
//!
//! Region labels and controller indices mean nothing across ticks, so a pool
//! of instances carries identity instead: every tick the active instances and
//! the organic controllers are matched greedily by nearest center. Merges
//! retire the unmatched instances into a free pool; splits allocate or
//! recycle an instance per unmatched controller, complete with a facing and a
//! ray-cast surface anchor for presentation.

use glam::Vec3;

use crate::constants::INSTANCE_SMOOTHING;
use crate::controller::{AnchorState, ControllerManager};
use crate::grid::DensityGrid;

/// Facing pitch limits keep faces from flipping fully up or down.
const FACING_MIN_Y: f32 = -0.2;
const FACING_MAX_Y: f32 = 0.5;

#[derive(Clone, Copy, Debug)]
pub struct SlimeInstance {
    pub active: bool,
    /// Smoothed region center.
    pub center: Vec3,
    /// Smoothed region radius.
    pub radius: f32,
    /// Presentation facing, unit length.
    pub facing: Vec3,
    /// Surface point along the facing, for face/decal placement.
    pub anchor: Vec3,
    /// Controller backing this instance, valid for the current tick.
    pub controller: usize,
}

pub struct InstanceTracker {
    instances: Vec<SlimeInstance>,
    free: Vec<usize>,
    controlled: usize,
    /// Scratch for greedy matching.
    used: Vec<bool>,
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

impl InstanceTracker {
    pub fn new() -> Self {
        Self {
            instances: vec![SlimeInstance {
                active: true,
                center: Vec3::ZERO,
                radius: 1.0,
                facing: Vec3::X,
                anchor: Vec3::ZERO,
                controller: 0,
            }],
            free: Vec::new(),
            controlled: 0,
            used: Vec::new(),
        }
    }

    pub fn instances(&self) -> &[SlimeInstance] {
        &self.instances
    }

    pub fn active_count(&self) -> usize {
        self.instances.iter().filter(|s| s.active).count()
    }

    /// Index of the player-controlled instance.
    pub fn controlled(&self) -> usize {
        self.controlled
    }

    /// Take control of an active instance; returns its center on success.
    pub fn switch_to(&mut self, id: usize) -> Option<Vec3> {
        match self.instances.get(id) {
            Some(inst) if inst.active => {
                self.controlled = id;
                Some(inst.center)
            }
            _ => None,
        }
    }

    /// Match instances and controllers for this tick.
    pub fn reconcile(
        &mut self,
        manager: &mut ControllerManager,
        grid: &DensityGrid,
        threshold: f32,
        anchor: &AnchorState,
        dt: f32,
    ) {
        let organic = manager.organic_count();
        if self.active_count() > organic {
            self.retire_extras(manager, grid, threshold, anchor, dt);
        } else {
            self.grow_to_match(manager, grid, threshold, anchor, dt);
        }
    }

    /// More instances than regions: keep the nearest instance per controller,
    /// pool the rest, and re-pick the controlled instance if its region is
    /// gone.
    fn retire_extras(
        &mut self,
        manager: &mut ControllerManager,
        grid: &DensityGrid,
        threshold: f32,
        anchor: &AnchorState,
        dt: f32,
    ) {
        let organic = manager.organic_count();
        self.used.clear();
        self.used.resize(self.instances.len(), false);

        for cid in 0..organic {
            let center = manager.controllers()[cid].center;
            let mut best = None;
            let mut best_d = f32::MAX;
            for (j, inst) in self.instances.iter().enumerate() {
                if self.used[j] || !inst.active {
                    continue;
                }
                let d = (center - inst.center).length_squared();
                if d < best_d {
                    best_d = d;
                    best = Some(j);
                }
            }
            if let Some(j) = best {
                self.used[j] = true;
                self.update_matched(j, cid, manager, grid, threshold, anchor, dt);
            }
        }

        for j in 0..self.instances.len() {
            if self.used[j] || !self.instances[j].active {
                continue;
            }
            self.instances[j].active = false;
            self.free.push(j);
        }

        if !self.instances[self.controlled].active {
            let mut best = None;
            let mut best_d = f32::MAX;
            for (j, inst) in self.instances.iter().enumerate() {
                if !inst.active {
                    continue;
                }
                let d = (anchor.position - inst.center).length_squared();
                if d < best_d {
                    best_d = d;
                    best = Some(j);
                }
            }
            if let Some(j) = best {
                self.controlled = j;
                let cid = self.instances[j].controller;
                self.update_matched(j, cid, manager, grid, threshold, anchor, dt);
            }
        }
    }

    /// As many or more regions than instances: keep every instance on its
    /// nearest controller, then allocate or recycle one per leftover region.
    fn grow_to_match(
        &mut self,
        manager: &mut ControllerManager,
        grid: &DensityGrid,
        threshold: f32,
        anchor: &AnchorState,
        dt: f32,
    ) {
        let organic = manager.organic_count();
        self.used.clear();
        self.used.resize(organic, false);

        for j in 0..self.instances.len() {
            if !self.instances[j].active {
                continue;
            }
            let pos = self.instances[j].center;
            let mut best = None;
            let mut best_d = f32::MAX;
            for (cid, used) in self.used.iter().enumerate() {
                if *used {
                    continue;
                }
                let d = (manager.controllers()[cid].center - pos).length_squared();
                if d < best_d {
                    best_d = d;
                    best = Some(cid);
                }
            }
            if let Some(cid) = best {
                self.used[cid] = true;
                self.update_matched(j, cid, manager, grid, threshold, anchor, dt);
            }
        }

        for cid in 0..organic {
            if self.used[cid] {
                continue;
            }
            let ctl = manager.controllers()[cid];
            let facing = if ctl.velocity.length_squared() < 1e-3 {
                (anchor.position - ctl.center)
                    .try_normalize()
                    .unwrap_or(Vec3::X)
            } else {
                ctl.velocity.try_normalize().unwrap_or(Vec3::X)
            };
            let surface = grid
                .surface_point(ctl.center, facing, threshold)
                .unwrap_or(ctl.center + facing * ctl.radius * 0.5);
            let instance = SlimeInstance {
                active: true,
                center: ctl.center,
                radius: ctl.radius,
                facing,
                anchor: surface,
                controller: cid,
            };
            match self.free.pop() {
                Some(slot) => self.instances[slot] = instance,
                None => self.instances.push(instance),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn update_matched(
        &mut self,
        j: usize,
        cid: usize,
        manager: &mut ControllerManager,
        grid: &DensityGrid,
        threshold: f32,
        anchor: &AnchorState,
        dt: f32,
    ) {
        let controlled = j == self.controlled;
        let mut ctl = manager.controllers()[cid];
        if controlled {
            ctl.velocity = anchor.velocity;
        }

        let inst = &mut self.instances[j];
        inst.controller = cid;
        inst.radius = lerp(inst.radius, ctl.radius, INSTANCE_SMOOTHING);
        inst.center = inst.center.lerp(ctl.center, INSTANCE_SMOOTHING);

        if ctl.velocity.length_squared() > 1e-4 {
            let target = ctl.velocity.normalize();
            let mut dir = inst.facing.lerp(target, INSTANCE_SMOOTHING);
            dir.y = dir.y.clamp(FACING_MIN_Y, FACING_MAX_Y);
            inst.facing = dir.try_normalize().unwrap_or(Vec3::X);
        } else {
            // Settle toward level facing when the region is at rest.
            let level = Vec3::new(inst.facing.x, 0.0, inst.facing.z);
            inst.facing = inst
                .facing
                .lerp(level, INSTANCE_SMOOTHING)
                .try_normalize()
                .unwrap_or(Vec3::X);
        }

        match grid.surface_point(ctl.center, inst.facing, threshold) {
            Some(hit) => inst.anchor = (inst.anchor + ctl.velocity * dt).lerp(hit, INSTANCE_SMOOTHING),
            None => inst.anchor = ctl.center,
        }

        if controlled {
            // The controlled region follows the external anchor transform.
            if let Some(c) = manager.controller_mut(cid) {
                c.center = anchor.position;
                c.velocity = anchor.velocity;
            }
        }
    }
}

impl Default for InstanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
