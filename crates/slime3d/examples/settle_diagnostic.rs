//! Headless settling diagnostic: drop the default blob and report pipeline
//! metrics every 20 ticks.
//!
//! Run with: cargo run --example settle_diagnostic

use slime3d::{SlimeParams, SlimeSimulation3D};

fn main() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    let spawned = sim.spawn_half_cube(10, 0.5);
    println!("spawned {} particles", spawned);

    for tick in 0..200 {
        sim.update();

        if tick % 20 == 0 {
            let (min, max) = sim.bounds();
            let mean_y: f32 = sim
                .particles()
                .iter()
                .map(|p| p.position.y)
                .sum::<f32>()
                / sim.particle_count() as f32;
            println!(
                "tick {:4}: blocks {:4}, regions {}, instances {}, bubbles {:4}, mean_y {:.2}, bounds y [{:.1}, {:.1}]",
                tick,
                sim.block_count(),
                sim.region_count(),
                sim.active_instances().len(),
                sim.bubbles().count(),
                mean_y,
                min.y,
                max.y,
            );
        }
    }

    let below = sim
        .particles()
        .iter()
        .filter(|p| p.position.y < 1.0 - 1e-4)
        .count();
    println!("particles below ground after settling: {}", below);
}
